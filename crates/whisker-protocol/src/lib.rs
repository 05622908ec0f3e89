//! # Whisker Protocol
//!
//! 触须阵列（whisker array）串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量定义
//! - `telemetry`: 遥测记录解析（设备 → 主机）
//! - `command`: 控制命令构建（主机 → 设备）
//! - `units`: 步数/角度换算
//!
//! ## 线路格式
//!
//! 协议为纯 ASCII 文本：
//!
//! ```text
//! 设备 → 主机: "<timestamp> <channel> <actuator> <moving> <steps> <sensor>\n"
//! 主机 → 设备: "<name> <arg> <arg> ...\r"（逐字节发送，字节间隔 ≥10µs）
//! ```

pub mod command;
pub mod constants;
pub mod telemetry;
pub mod units;

// 重新导出常用类型
pub use command::{ActuatorTarget, Command, Side};
pub use constants::*;
pub use telemetry::TelemetryRecord;
pub use units::{degrees_to_steps, steps_to_degrees};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid field count: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Field {field} is not a non-negative integer: {value:?}")]
    NotNumeric { field: &'static str, value: String },

    #[error("Invalid moving status: {0} (expected 0 or 1)")]
    InvalidStatus(u64),

    #[error("Line is not valid ASCII/UTF-8")]
    Encoding,

    #[error("Invalid command name: {0:?}")]
    InvalidCommandName(String),
}
