//! 运动状态机
//!
//! 在每个帧边界执行一次决策，把各通道的运动标志和传感器读数转换为：
//!
//! 1. 扫动完成检测（带宽限计数）
//! 2. 连续扫动模式下的接触检测与触探（palpation）
//!
//! 概念状态：`Idle → Sweeping → {SweepComplete} → Sweeping | Idle`，
//! 与 `NotPalpating ↔ Palpating(probe_count)` 正交叠加。没有终止状态。
//!
//! 决策看到的是上一帧结束时的注册表状态（帧边界由新帧第一条记录触发）。

use crate::config::{ContactBehavior, MotionConfig};
use crate::encoder::CommandSink;
use crate::error::DriverError;
use crate::registry::ChannelRegistry;
use crate::signals::RigSignals;
use smallvec::SmallVec;
use std::time::Duration;
use tracing::{debug, info};
use whisker_protocol::{ActuatorTarget, Command};

/// 单次决策中发出的命令（通常不超过 4 条）
pub type IssuedCommands = SmallVec<[Command; 4]>;

/// 触探会话
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PalpationSession {
    pub active: bool,
    /// 已开始的触探次数（0..=palpate_limit）
    pub probe_count: u32,
    /// 检测到接触时所有执行器位置的均值（步）
    pub center_steps: i64,
}

/// 扫动阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Idle,
    Sweeping,
}

/// 触探会话的状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalpationEvent {
    Started { center_steps: i64 },
    Probe { probe_count: u32 },
    Finished,
}

/// 状态机对外可见的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionStatus {
    /// 连续扫动模式
    pub continuous: bool,
    /// 标定等操作暂停了连续扫动与接触反应
    pub suspended: bool,
    pub behavior: ContactBehavior,
    pub grace: u32,
    pub palpation: PalpationSession,
}

/// 一次帧决策的结果
#[derive(Debug, Clone, Default)]
pub struct FrameDecision {
    /// 决策后 `sweep_complete` 是否置位
    pub sweep_complete: bool,
    /// 是否有通道超过接触阈值
    pub contact: bool,
    /// 成功发出的命令
    pub issued: IssuedCommands,
    pub palpation: Option<PalpationEvent>,
}

/// 运动状态机
///
/// 只在采集线程中运行；所有命令都经由 [`CommandSink`] 串行发出。
#[derive(Debug)]
pub struct MotionStateMachine {
    config: MotionConfig,
    command_gap: Duration,
    /// 宽限计数：运动命令发出后，在多少个静止帧内不宣告扫动完成
    grace: u32,
    continuous: bool,
    behavior: ContactBehavior,
    /// 标定期间暂停第 2 步（连续扫动与接触反应）
    suspended: bool,
    palpation: PalpationSession,
}

impl MotionStateMachine {
    pub fn new(config: MotionConfig, command_gap: Duration) -> Self {
        let behavior = config.contact_behavior;
        Self {
            config,
            command_gap,
            grace: 0,
            continuous: false,
            behavior,
            suspended: false,
            palpation: PalpationSession::default(),
        }
    }

    pub fn grace(&self) -> u32 {
        self.grace
    }

    pub fn palpation(&self) -> PalpationSession {
        self.palpation
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn behavior(&self) -> ContactBehavior {
        self.behavior
    }

    pub fn set_behavior(&mut self, behavior: ContactBehavior) {
        self.behavior = behavior;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// 暂停/恢复连续扫动与接触反应
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn status(&self) -> MotionStatus {
        MotionStatus {
            continuous: self.continuous,
            suspended: self.suspended,
            behavior: self.behavior,
            grace: self.grace,
            palpation: self.palpation,
        }
    }

    pub fn phase(&self, signals: &RigSignals) -> SweepPhase {
        if signals.sweep_complete.is_set() {
            SweepPhase::Idle
        } else {
            SweepPhase::Sweeping
        }
    }

    /// 开启连续扫动并立即发出第一次扫动
    pub fn start_sweeping(
        &mut self,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
    ) -> Result<(), DriverError> {
        self.issue(Command::Sweep(ActuatorTarget::All), registry, signals, sink)?;
        self.continuous = true;
        info!("Continuous sweeping enabled");
        Ok(())
    }

    /// 关闭连续扫动（当前扫动会自然结束）
    pub fn stop_sweeping(&mut self) {
        self.continuous = false;
        info!("Continuous sweeping disabled");
    }

    /// 发出一条命令并应用其副作用
    ///
    /// 只有写入成功后才会：运动命令重置宽限计数并清除 `sweep_complete`；
    /// 目标命令更新注册表中的目标值。写入失败时状态保持不变。
    pub fn issue(
        &mut self,
        command: Command,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
    ) -> Result<(), DriverError> {
        sink.send(&command)?;

        if command.is_motion() {
            self.grace = self.config.grace_frames;
            signals.sweep_complete.clear();
        }
        match command {
            Command::SetProtraction { target, steps } => {
                registry.set_protraction_target(target, steps)
            },
            Command::SetRetraction { target, steps } => {
                registry.set_retraction_target(target, steps)
            },
            _ => {},
        }
        Ok(())
    }

    /// 依次发出多条命令，命令之间插入固定间隔
    fn issue_all(
        &mut self,
        commands: impl IntoIterator<Item = Command>,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
        issued: &mut IssuedCommands,
    ) -> Result<(), DriverError> {
        for command in commands {
            if !issued.is_empty() {
                spin_sleep::sleep(self.command_gap);
            }
            self.issue(command.clone(), registry, signals, sink)?;
            issued.push(command);
        }
        Ok(())
    }

    /// 帧边界决策
    ///
    /// # 错误
    /// - `DriverError::Transport`: 命令写入失败；失败的命令及其后续命令均未生效
    pub fn on_frame(
        &mut self,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
    ) -> Result<FrameDecision, DriverError> {
        let mut decision = FrameDecision::default();

        // 第 1 步：扫动完成检测
        if registry.any_moving() {
            signals.sweep_complete.clear();
            self.grace = 0;
        } else if self.grace == 0 {
            signals.sweep_complete.set();
        } else {
            self.grace -= 1;
        }

        decision.contact = registry.update_contacts();

        // 第 2 步：连续扫动模式下的行为
        let result = if self.continuous && !self.suspended {
            self.react(registry, signals, sink, &mut decision)
        } else {
            Ok(())
        };

        decision.sweep_complete = signals.sweep_complete.is_set();
        result.map(|_| decision)
    }

    fn react(
        &mut self,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
        decision: &mut FrameDecision,
    ) -> Result<(), DriverError> {
        let sweep_complete = signals.sweep_complete.is_set();
        let sweep = || Command::Sweep(ActuatorTarget::All);

        match self.behavior {
            ContactBehavior::Ignore => {
                if sweep_complete {
                    self.issue_all([sweep()], registry, signals, sink, &mut decision.issued)?;
                }
            },
            ContactBehavior::Palpate if !self.palpation.active => {
                if decision.contact {
                    self.start_palpation(registry, signals, sink, decision)?;
                } else if sweep_complete {
                    self.issue_all([sweep()], registry, signals, sink, &mut decision.issued)?;
                }
            },
            ContactBehavior::Palpate => {
                if !sweep_complete {
                    return Ok(());
                }
                if self.palpation.probe_count == self.config.palpate_limit {
                    self.finish_palpation(registry, signals, sink, decision)?;
                } else {
                    self.issue_all([sweep()], registry, signals, sink, &mut decision.issued)?;
                    self.palpation.probe_count += 1;
                    debug!("Palpation probe {}", self.palpation.probe_count);
                    decision.palpation = Some(PalpationEvent::Probe {
                        probe_count: self.palpation.probe_count,
                    });
                }
            },
        }
        Ok(())
    }

    fn start_palpation(
        &mut self,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
        decision: &mut FrameDecision,
    ) -> Result<(), DriverError> {
        let center_steps = registry.mean_actuator_position();
        // 先拉回到接触点附近，再把伸出目标设到接触点之外
        let commands = [
            Command::SetRetraction {
                target: ActuatorTarget::All,
                steps: center_steps.saturating_sub(self.config.pull_steps),
            },
            Command::Retract(ActuatorTarget::All),
            Command::SetProtraction {
                target: ActuatorTarget::All,
                steps: center_steps.saturating_add(self.config.push_steps),
            },
        ];
        self.issue_all(commands, registry, signals, sink, &mut decision.issued)?;

        self.palpation = PalpationSession {
            active: true,
            probe_count: 0,
            center_steps,
        };
        info!("Contact detected, palpating around {} steps", center_steps);
        decision.palpation = Some(PalpationEvent::Started { center_steps });
        Ok(())
    }

    fn finish_palpation(
        &mut self,
        registry: &mut ChannelRegistry,
        signals: &RigSignals,
        sink: &mut dyn CommandSink,
        decision: &mut FrameDecision,
    ) -> Result<(), DriverError> {
        let mut commands: SmallVec<[Command; 4]> = SmallVec::new();
        match registry.shared_defaults() {
            Some((protraction, retraction)) => {
                commands.push(Command::SetRetraction {
                    target: ActuatorTarget::All,
                    steps: retraction,
                });
                commands.push(Command::SetProtraction {
                    target: ActuatorTarget::All,
                    steps: protraction,
                });
            },
            None => {
                for actuator in registry.actuators() {
                    let target = ActuatorTarget::Single(actuator.id);
                    commands.push(Command::SetRetraction {
                        target,
                        steps: actuator.default_retraction_steps,
                    });
                    commands.push(Command::SetProtraction {
                        target,
                        steps: actuator.default_protraction_steps,
                    });
                }
            },
        }
        commands.push(Command::Retract(ActuatorTarget::All));

        self.issue_all(commands, registry, signals, sink, &mut decision.issued)?;
        self.palpation.active = false;
        info!(
            "Palpation finished after {} probes",
            self.palpation.probe_count
        );
        decision.palpation = Some(PalpationEvent::Finished);
        Ok(())
    }
}
