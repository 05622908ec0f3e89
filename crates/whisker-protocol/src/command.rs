//! 控制命令构建
//!
//! 每条命令编码为 `名称 参数 参数 ...` 形式的 ASCII 文本。
//! 终止符（`\r`）和逐字节节奏由驱动层的编码器负责，这里只生成命令体。

use crate::{ALL_ACTUATORS, ProtocolError};
use std::fmt;

/// 执行器安装侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Side {
    #[default]
    Right,
    Left,
}

impl Side {
    /// 固件使用的侧别编码（右 = 0，左 = 1）
    pub fn wire_digit(self) -> char {
        match self {
            Side::Right => '0',
            Side::Left => '1',
        }
    }
}

/// 命令作用对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActuatorTarget {
    /// 所有执行器（广播 ID 999）
    #[default]
    All,
    /// 单个执行器
    Single(u32),
}

impl ActuatorTarget {
    /// 线路上的执行器 ID
    pub fn wire_id(self) -> u32 {
        match self {
            ActuatorTarget::All => ALL_ACTUATORS,
            ActuatorTarget::Single(id) => id,
        }
    }
}

impl From<u32> for ActuatorTarget {
    fn from(id: u32) -> Self {
        if id == ALL_ACTUATORS {
            ActuatorTarget::All
        } else {
            ActuatorTarget::Single(id)
        }
    }
}

/// 主机 → 设备命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 注册一块电机扩展板：`s <addr> <motors> <channels> <sides>`
    ///
    /// `motors` 为电机编号（按引用顺序），`sides` 与之一一对应。
    RegisterShield {
        address: u8,
        motors: Vec<u8>,
        channels: u32,
        sides: Vec<Side>,
    },
    /// 设置采样周期（微秒）：`p <us>`
    SamplingPeriod(u32),
    /// 完成初始化：`c`
    CompleteSetup,
    /// 开启/关闭遥测数据流：`set_sampling 0|1`
    SetSampling(bool),
    /// 回零：`home_stepper <id>`
    Home(ActuatorTarget),
    /// 执行一次扫动（protract → retract）：`whisk <id>`
    Sweep(ActuatorTarget),
    /// 回到收回位置：`retract <id>`
    Retract(ActuatorTarget),
    /// 设置伸出目标（步）：`set_prot <id> <steps>`
    SetProtraction { target: ActuatorTarget, steps: i64 },
    /// 设置收回目标（步）：`set_ret <id> <steps>`
    SetRetraction { target: ActuatorTarget, steps: i64 },
    /// 设置加速度（步/秒²）：`set_accel <id> <value>`
    SetAcceleration { target: ActuatorTarget, value: u32 },
    /// 设置最大速度（步/秒）：`set_speed <id> <value>`
    SetSpeed { target: ActuatorTarget, value: u32 },
    /// 任意命令（名称 + 整数参数）
    ///
    /// 名称只能由 ASCII 字母、数字和 `_` 组成，否则一条命令会被拆成多条。
    /// 用 [`Command::raw`] 构造或在发送前调用 [`Command::validate`]。
    Raw { name: String, args: Vec<i64> },
}

impl Command {
    /// 构造经过校验的任意命令
    ///
    /// # 错误
    /// - `ProtocolError::InvalidCommandName`: 名称为空或含有 `[A-Za-z0-9_]` 以外的字符
    pub fn raw(name: impl Into<String>, args: Vec<i64>) -> Result<Self, ProtocolError> {
        let command = Command::Raw {
            name: name.into(),
            args,
        };
        command.validate()?;
        Ok(command)
    }

    /// 检查命令能否作为单条命令上线
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Command::Raw { name, .. }
                if name.is_empty()
                    || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') =>
            {
                Err(ProtocolError::InvalidCommandName(name.clone()))
            },
            _ => Ok(()),
        }
    }

    /// 命令名称（线路上的第一个字段）
    pub fn name(&self) -> &str {
        match self {
            Command::RegisterShield { .. } => "s",
            Command::SamplingPeriod(_) => "p",
            Command::CompleteSetup => "c",
            Command::SetSampling(_) => "set_sampling",
            Command::Home(_) => "home_stepper",
            Command::Sweep(_) => "whisk",
            Command::Retract(_) => "retract",
            Command::SetProtraction { .. } => "set_prot",
            Command::SetRetraction { .. } => "set_ret",
            Command::SetAcceleration { .. } => "set_accel",
            Command::SetSpeed { .. } => "set_speed",
            Command::Raw { name, .. } => name,
        }
    }

    /// 是否为运动命令
    ///
    /// 运动命令发出后，设备需要若干帧才会在遥测中报告 `is_moving=1`，
    /// 驱动层据此设置宽限计数器。
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Command::Sweep(_) | Command::Retract(_) | Command::Home(_)
        )
    }

    /// 编码为 ASCII 命令体（不含终止符）
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Command::RegisterShield {
                address,
                motors,
                channels,
                sides,
            } => {
                let motors: String = motors.iter().map(|m| m.to_string()).collect();
                let sides: String = sides.iter().map(|s| s.wire_digit()).collect();
                write!(f, " {} {} {} {}", address, motors, channels, sides)
            },
            Command::SamplingPeriod(us) => write!(f, " {}", us),
            Command::CompleteSetup => Ok(()),
            Command::SetSampling(on) => write!(f, " {}", u8::from(*on)),
            Command::Home(target) | Command::Sweep(target) | Command::Retract(target) => {
                write!(f, " {}", target.wire_id())
            },
            Command::SetProtraction { target, steps } | Command::SetRetraction { target, steps } => {
                write!(f, " {} {}", target.wire_id(), steps)
            },
            Command::SetAcceleration { target, value } | Command::SetSpeed { target, value } => {
                write!(f, " {} {}", target.wire_id(), value)
            },
            Command::Raw { args, .. } => {
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_commands() {
        assert_eq!(Command::Sweep(ActuatorTarget::All).encode(), "whisk 999");
        assert_eq!(Command::Retract(ActuatorTarget::Single(2)).encode(), "retract 2");
        assert_eq!(Command::Home(ActuatorTarget::All).encode(), "home_stepper 999");

        assert!(Command::Sweep(ActuatorTarget::All).is_motion());
        assert!(Command::Retract(ActuatorTarget::All).is_motion());
        assert!(Command::Home(ActuatorTarget::All).is_motion());
        assert!(!Command::SetSampling(true).is_motion());
    }

    #[test]
    fn test_target_commands() {
        let cmd = Command::SetProtraction {
            target: ActuatorTarget::All,
            steps: 133,
        };
        assert_eq!(cmd.encode(), "set_prot 999 133");

        let cmd = Command::SetRetraction {
            target: ActuatorTarget::Single(1),
            steps: -4,
        };
        assert_eq!(cmd.encode(), "set_ret 1 -4");

        let cmd = Command::SetSpeed {
            target: ActuatorTarget::All,
            value: 800,
        };
        assert_eq!(cmd.encode(), "set_speed 999 800");

        let cmd = Command::SetAcceleration {
            target: ActuatorTarget::Single(0),
            value: 4000,
        };
        assert_eq!(cmd.encode(), "set_accel 0 4000");
    }

    #[test]
    fn test_setup_commands() {
        let cmd = Command::RegisterShield {
            address: 0,
            motors: vec![1, 2],
            channels: 4,
            sides: vec![Side::Right, Side::Left],
        };
        assert_eq!(cmd.encode(), "s 0 12 4 01");
        assert_eq!(Command::SamplingPeriod(20_000).encode(), "p 20000");
        assert_eq!(Command::CompleteSetup.encode(), "c");
        assert_eq!(Command::SetSampling(true).encode(), "set_sampling 1");
        assert_eq!(Command::SetSampling(false).encode(), "set_sampling 0");
    }

    #[test]
    fn test_raw_command() {
        let cmd = Command::Raw {
            name: "whisk".to_string(),
            args: vec![999],
        };
        assert_eq!(cmd.encode(), "whisk 999");
        assert_eq!(cmd.name(), "whisk");
        // Raw 命令不参与宽限计数
        assert!(!cmd.is_motion());
    }

    #[test]
    fn test_raw_command_name_is_validated() {
        assert!(Command::raw("set_sampling", vec![1]).is_ok());
        for name in ["", "whisk 999", "whisk\r", "retract\n", "a-b"] {
            assert_eq!(
                Command::raw(name, vec![]),
                Err(ProtocolError::InvalidCommandName(name.to_string()))
            );
        }
        // 直接构造的变体也能校验
        let cmd = Command::Raw {
            name: "whisk 999\rretract".to_string(),
            args: vec![],
        };
        assert!(cmd.validate().is_err());
        assert!(Command::Sweep(ActuatorTarget::All).validate().is_ok());
    }

    #[test]
    fn test_target_from_u32() {
        assert_eq!(ActuatorTarget::from(999), ActuatorTarget::All);
        assert_eq!(ActuatorTarget::from(3), ActuatorTarget::Single(3));
        assert_eq!(ActuatorTarget::All.wire_id(), 999);
    }
}
