//! 命令定义和实现

pub mod calibrate;
pub mod config;
pub mod ports;
pub mod run;

pub use calibrate::CalibrateCommand;
pub use config::ConfigCommand;
pub use ports::PortsCommand;
pub use run::RunCommand;
