//! Whisker SDK - 触须阵列实验台 Rust SDK
//!
//! 主机侧驱动：通过串口接收逐通道遥测、按帧做运动决策（连续扫动、接触检测、触探），
//! 并按设备要求的节奏下发命令。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 遥测行解析与命令编码
//! - **传输层** (`serial`): 非阻塞按行读取的串口抽象
//! - **驱动层** (`driver`): 采集线程、运动状态机、同步信号、持久化
//!
//! # 快速开始
//!
//! ```no_run
//! use whisker_sdk::prelude::*;
//!
//! whisker_sdk::init_logger();
//! let config = RigConfig::load("rig.toml").unwrap();
//! let rig = RigBuilder::new(config).calibrate_on_start(true).connect().unwrap();
//! rig.start_sweeping().unwrap();
//! rig.wait_sweep_complete().unwrap();
//! rig.shutdown().unwrap();
//! ```

pub use whisker_driver as driver;
pub use whisker_protocol as protocol;
pub use whisker_serial as serial;

pub mod prelude;

// --- 用户以此为界 ---

pub use whisker_driver::{
    ContactBehavior, DriverError, HistoryEntry, MetricsSnapshot, RegistrySnapshot, Rig, RigBuilder,
    RigConfig,
};
pub use whisker_protocol::{ActuatorTarget, Command, ProtocolError, Side, TelemetryRecord};
pub use whisker_serial::{Transport, TransportError};

/// 初始化日志
///
/// `RUST_LOG` 未设置时默认 `info`；`log` 生态的记录（如 `serialport`）
/// 也会转发到 `tracing`。重复调用是安全的。
pub fn init_logger() {
    init_logger_with_default("info");
}

/// 以指定的默认过滤规则初始化日志
pub fn init_logger_with_default(default_directive: &str) {
    use tracing_subscriber::EnvFilter;

    // 已有 logger 时忽略
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
