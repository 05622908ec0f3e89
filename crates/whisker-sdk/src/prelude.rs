//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use whisker_sdk::prelude::*;
//! ```

// 驱动层
pub use whisker_driver::{
    ContactBehavior, MetricsSnapshot, MotionStatus, RegistrySnapshot, Rig, RigBuilder, RigConfig,
    SweepPhase,
};

// 协议层
pub use whisker_protocol::{ActuatorTarget, Command, Side, TelemetryRecord};

// 传输层（常用 Trait）
pub use whisker_serial::Transport;

// 错误类型
pub use whisker_driver::DriverError;
pub use whisker_protocol::ProtocolError;
pub use whisker_serial::TransportError;
