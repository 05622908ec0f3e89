//! 驱动层模块
//!
//! 本模块提供触须阵列实验台的主机侧驱动，包括：
//! - 采集线程（遥测解析、帧检测、注册表更新）
//! - 运动状态机（宽限计数、连续扫动、触探）
//! - 状态同步（ArcSwap 无锁快照 + 电平触发信号）
//! - 按协议节奏发送命令
//! - 遥测数据异步写盘
//!
//! # 线程模型
//!
//! ```text
//! 控制线程 ──Request──▶ whisker-io（注册表、状态机、编码器的唯一所有者）
//!     ▲                       │
//!     └── 快照 / 信号 ◀───────┤
//!                             └──批次──▶ whisker-writer（CSV）
//! ```

mod builder;
pub mod config;
pub mod encoder;
mod error;
pub mod metrics;
pub mod motion;
pub mod persistence;
pub mod pipeline;
pub mod reader;
pub mod registry;
mod rig;
pub mod signals;

pub use builder::RigBuilder;
pub use config::{
    ActuatorConfig, ContactBehavior, LogConfig, MotionConfig, RigConfig, SerialConfig,
    ShieldConfig, TimingConfig,
};
pub use encoder::{CommandEncoder, CommandSink, Pacing};
pub use error::DriverError;
pub use metrics::{MetricsSnapshot, RigMetrics};
pub use motion::{MotionStateMachine, MotionStatus, PalpationSession, SweepPhase};
pub use persistence::{CsvFileSink, MemorySink, PersistenceSink};
pub use pipeline::{PipelineConfig, Request, RigContext, ingest_loop};
pub use reader::{FrameReader, FrameTracker};
pub use registry::{
    Actuator, Channel, ChannelRegistry, ChannelState, HistoryEntry, RegistrySnapshot,
};
pub use rig::Rig;
pub use signals::{LevelSignal, RigSignals};
