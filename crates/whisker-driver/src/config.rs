//! # 实验台配置
//!
//! 所有原先散落在代码里的常量（波特率、每圈步数、自动保存间隔、接触阈值偏移、
//! 宽限帧数、触探次数……）都集中在 [`RigConfig`] 中，可以从 TOML 文件加载。
//!
//! ```toml
//! steps_per_revolution = 400
//!
//! [serial]
//! bit_rate = 921600
//!
//! [motion]
//! palpate_limit = 3
//! contact_behavior = "palpate"
//!
//! [[topology]]
//! address = 0
//! channels_per_actuator = 2
//! actuators = [{ motor = 1, side = "right" }, { motor = 2, side = "left" }]
//! ```

use crate::error::DriverError;
use crate::registry::ChannelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use whisker_protocol::{
    ActuatorTarget, Command, DEFAULT_BIT_RATE, DEFAULT_SAMPLING_PERIOD_US,
    DEFAULT_STEPS_PER_REVOLUTION, Side,
};

/// 线路协议要求的最小字节间隔（微秒）
pub const MIN_INTER_BYTE_DELAY_US: u64 = 10;

/// 线路协议要求的最小命令后稳定时间（毫秒）
pub const MIN_SETTLE_DELAY_MS: u64 = 10;

/// 实验台完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// 串口设置
    pub serial: SerialConfig,
    /// 步进电机每圈步数
    pub steps_per_revolution: u32,
    /// 设备采样周期（微秒）
    pub sampling_period_us: u32,
    /// 时序参数
    pub timing: TimingConfig,
    /// 运动与接触参数
    pub motion: MotionConfig,
    /// 扩展板拓扑（注册顺序即执行器/通道编号顺序）
    pub topology: Vec<ShieldConfig>,
    /// 数据记录
    pub log: LogConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            steps_per_revolution: DEFAULT_STEPS_PER_REVOLUTION,
            sampling_period_us: DEFAULT_SAMPLING_PERIOD_US,
            timing: TimingConfig::default(),
            motion: MotionConfig::default(),
            topology: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

/// 串口设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// 串口路径；为空时自动查找 Arduino
    pub port: Option<String>,
    /// 波特率
    pub bit_rate: u32,
    /// 等待握手字节的超时（毫秒）
    pub handshake_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            bit_rate: DEFAULT_BIT_RATE,
            handshake_timeout_ms: 5_000,
        }
    }
}

/// 时序参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// 命令字节间隔（微秒，≥10）
    pub inter_byte_delay_us: u64,
    /// 命令终止符后的稳定时间（毫秒，≥10）
    pub settle_delay_ms: u64,
    /// 同一决策内连续命令之间的额外间隔（毫秒）
    pub command_gap_ms: u64,
    /// 自动保存间隔（秒）
    pub autosave_interval_s: u64,
    /// 标定时收回后的静置时间（毫秒）
    pub calibration_settle_ms: u64,
    /// 开启采样后等待数据流稳定的时间（毫秒）
    pub startup_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_byte_delay_us: MIN_INTER_BYTE_DELAY_US,
            settle_delay_ms: MIN_SETTLE_DELAY_MS,
            command_gap_ms: 1,
            autosave_interval_s: 60,
            calibration_settle_ms: 2_500,
            startup_delay_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn inter_byte_delay(&self) -> Duration {
        Duration::from_micros(self.inter_byte_delay_us)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn command_gap(&self) -> Duration {
        Duration::from_millis(self.command_gap_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_s)
    }

    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// 接触后的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactBehavior {
    /// 检测到接触后在接触点附近反复触探
    #[default]
    Palpate,
    /// 忽略接触，持续往复扫动
    Ignore,
}

/// 运动与接触参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 默认伸出目标（步）
    pub protraction_steps: i64,
    /// 默认收回目标（步）
    pub retraction_steps: i64,
    /// 触探时越过接触点的步数
    pub push_steps: i64,
    /// 触探时收回到接触点之前的步数
    pub pull_steps: i64,
    /// 一次接触后的触探次数
    pub palpate_limit: u32,
    /// 运动命令发出后的宽限帧数
    pub grace_frames: u32,
    /// 接触阈值 = 静息读数 + 此偏移
    pub contact_offset: u32,
    /// 接触行为
    pub contact_behavior: ContactBehavior,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            protraction_steps: 133,
            retraction_steps: 22,
            push_steps: 22,
            pull_steps: 6,
            palpate_limit: 3,
            grace_frames: 4,
            contact_offset: 100,
            contact_behavior: ContactBehavior::Palpate,
        }
    }
}

/// 一块电机扩展板
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldConfig {
    /// 扩展板地址位
    pub address: u8,
    /// 每个执行器上的通道数
    pub channels_per_actuator: u32,
    /// 板上的执行器（按注册顺序）
    pub actuators: Vec<ActuatorConfig>,
}

impl ShieldConfig {
    /// 本板通道总数
    pub fn num_channels(&self) -> u32 {
        self.channels_per_actuator * self.actuators.len() as u32
    }

    /// 注册命令 `s <addr> <motors> <channels> <sides>`
    pub fn register_command(&self) -> Command {
        Command::RegisterShield {
            address: self.address,
            motors: self.actuators.iter().map(|a| a.motor).collect(),
            channels: self.num_channels(),
            sides: self.actuators.iter().map(|a| a.side).collect(),
        }
    }
}

/// 单个执行器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// 扩展板上的电机编号（单个数字）
    pub motor: u8,
    /// 安装侧
    #[serde(default)]
    pub side: Side,
    /// 覆盖默认伸出目标
    #[serde(default)]
    pub protraction_steps: Option<i64>,
    /// 覆盖默认收回目标
    #[serde(default)]
    pub retraction_steps: Option<i64>,
}

/// 数据记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 是否记录遥测数据
    pub enabled: bool,
    /// 输出目录
    pub directory: PathBuf,
    /// 文件标题（为空时按启动时间生成）
    pub title: Option<String>,
    /// 写盘队列容量（批次数）
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("data"),
            title: None,
            queue_capacity: 8,
        }
    }
}

impl RigConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: RigConfig =
            toml::from_str(text).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    ///
    /// # 错误
    /// - `DriverError::InvalidConfig`: 文件无法读取、格式错误或校验失败
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            DriverError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::InvalidConfig(e.to_string()))
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), DriverError> {
        let invalid = |msg: String| Err(DriverError::InvalidConfig(msg));

        if self.topology.is_empty() {
            return invalid("topology must contain at least one shield".to_string());
        }

        let mut addresses = HashSet::new();
        for shield in &self.topology {
            if !addresses.insert(shield.address) {
                return invalid(format!("duplicate shield address {}", shield.address));
            }
            if shield.actuators.is_empty() {
                return invalid(format!("shield {} has no actuators", shield.address));
            }
            if shield.channels_per_actuator == 0 {
                return invalid(format!(
                    "shield {} must have at least one channel per actuator",
                    shield.address
                ));
            }
            if let Some(actuator) = shield.actuators.iter().find(|a| a.motor > 9) {
                return invalid(format!(
                    "shield {}: motor number {} must be a single digit",
                    shield.address, actuator.motor
                ));
            }
        }

        if self.steps_per_revolution == 0 {
            return invalid("steps_per_revolution must be positive".to_string());
        }
        if self.timing.inter_byte_delay_us < MIN_INTER_BYTE_DELAY_US {
            return invalid(format!(
                "inter_byte_delay_us must be at least {}",
                MIN_INTER_BYTE_DELAY_US
            ));
        }
        if self.timing.settle_delay_ms < MIN_SETTLE_DELAY_MS {
            return invalid(format!(
                "settle_delay_ms must be at least {}",
                MIN_SETTLE_DELAY_MS
            ));
        }
        if self.timing.autosave_interval_s == 0 {
            return invalid("autosave_interval_s must be positive".to_string());
        }
        if self.log.queue_capacity == 0 {
            return invalid("log.queue_capacity must be positive".to_string());
        }

        Ok(())
    }

    /// 执行器总数
    pub fn num_actuators(&self) -> usize {
        self.topology.iter().map(|s| s.actuators.len()).sum()
    }

    /// 通道总数
    pub fn num_channels(&self) -> usize {
        self.topology.iter().map(|s| s.num_channels() as usize).sum()
    }

    /// 按拓扑构建通道注册表
    pub fn build_registry(&self) -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        for shield in &self.topology {
            for actuator in &shield.actuators {
                registry.register_actuator(
                    actuator.side,
                    shield.channels_per_actuator,
                    actuator
                        .protraction_steps
                        .unwrap_or(self.motion.protraction_steps),
                    actuator
                        .retraction_steps
                        .unwrap_or(self.motion.retraction_steps),
                );
            }
        }
        registry
    }

    /// 启动前的初始化命令序列
    ///
    /// 注册所有扩展板、设置采样周期、完成初始化、下发默认（及逐个覆盖的）
    /// 伸出/收回目标并回零。开启数据流的 `set_sampling 1` 不在其中。
    pub fn setup_commands(&self) -> Vec<Command> {
        let mut commands: Vec<Command> =
            self.topology.iter().map(ShieldConfig::register_command).collect();

        commands.push(Command::SamplingPeriod(self.sampling_period_us));
        commands.push(Command::CompleteSetup);
        commands.push(Command::SetProtraction {
            target: ActuatorTarget::All,
            steps: self.motion.protraction_steps,
        });
        commands.push(Command::SetRetraction {
            target: ActuatorTarget::All,
            steps: self.motion.retraction_steps,
        });

        let actuators = self.topology.iter().flat_map(|s| s.actuators.iter());
        for (id, actuator) in actuators.enumerate() {
            let target = ActuatorTarget::Single(id as u32);
            if let Some(steps) = actuator.protraction_steps {
                commands.push(Command::SetProtraction { target, steps });
            }
            if let Some(steps) = actuator.retraction_steps {
                commands.push(Command::SetRetraction { target, steps });
            }
        }

        commands.push(Command::Home(ActuatorTarget::All));
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
steps_per_revolution = 400

[serial]
port = "/dev/ttyACM0"

[motion]
palpate_limit = 2
contact_behavior = "ignore"

[[topology]]
address = 0
channels_per_actuator = 2
actuators = [
    { motor = 1, side = "right" },
    { motor = 2, side = "left", protraction_steps = 150 },
]

[[topology]]
address = 1
channels_per_actuator = 1
actuators = [{ motor = 1 }]
"#;

    #[test]
    fn test_parse_sample() {
        let config = RigConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.bit_rate, DEFAULT_BIT_RATE);
        assert_eq!(config.motion.palpate_limit, 2);
        assert_eq!(config.motion.contact_behavior, ContactBehavior::Ignore);
        // 未写出的字段取默认值
        assert_eq!(config.motion.grace_frames, 4);
        assert_eq!(config.timing.autosave_interval_s, 60);
        assert_eq!(config.num_actuators(), 3);
        assert_eq!(config.num_channels(), 5);
        assert_eq!(config.topology[1].actuators[0].side, Side::Right);
    }

    #[test]
    fn test_setup_commands() {
        let config = RigConfig::from_toml_str(SAMPLE).unwrap();
        let encoded: Vec<String> = config.setup_commands().iter().map(Command::encode).collect();
        assert_eq!(
            encoded,
            vec![
                "s 0 12 4 01",
                "s 1 1 1 0",
                "p 20000",
                "c",
                "set_prot 999 133",
                "set_ret 999 22",
                "set_prot 1 150",
                "home_stepper 999",
            ]
        );
    }

    #[test]
    fn test_build_registry_uses_overrides() {
        let config = RigConfig::from_toml_str(SAMPLE).unwrap();
        let registry = config.build_registry();
        assert_eq!(registry.num_channels(), 5);
        assert_eq!(registry.num_actuators(), 3);

        let actuator = registry.actuator(1).unwrap();
        assert_eq!(actuator.side, Side::Left);
        assert_eq!(actuator.protraction_target_steps, 150);
        assert_eq!(actuator.retraction_target_steps, 22);
        assert_eq!(registry.actuator(0).unwrap().protraction_target_steps, 133);

        // 通道按 (执行器, 通道) 顺序连续编号
        let owners: Vec<u32> = registry.channels().iter().map(|c| c.actuator_id).collect();
        assert_eq!(owners, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_validate_rejects_bad_topology() {
        assert!(matches!(
            RigConfig::default().validate(),
            Err(DriverError::InvalidConfig(_))
        ));

        let text = r#"
[[topology]]
address = 0
channels_per_actuator = 1
actuators = [{ motor = 12 }]
"#;
        assert!(RigConfig::from_toml_str(text).is_err());

        let text = r#"
[[topology]]
address = 0
channels_per_actuator = 1
actuators = [{ motor = 1 }]

[[topology]]
address = 0
channels_per_actuator = 1
actuators = [{ motor = 2 }]
"#;
        let err = RigConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate shield address"));
    }

    #[test]
    fn test_validate_rejects_fast_pacing() {
        let mut config = RigConfig::from_toml_str(SAMPLE).unwrap();
        config.timing.inter_byte_delay_us = 5;
        assert!(config.validate().is_err());

        let mut config = RigConfig::from_toml_str(SAMPLE).unwrap();
        config.timing.settle_delay_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RigConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        let parsed = RigConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RigConfig::load("/nonexistent/rig.toml").unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }
}
