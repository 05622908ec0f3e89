//! 驱动层错误类型定义

use thiserror::Error;
use whisker_protocol::ProtocolError;
use whisker_serial::TransportError;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误（写命令失败时即 TransportWriteFailure）
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 遥测行解析失败
    #[error("Malformed telemetry: {0}")]
    Protocol(#[from] ProtocolError),

    /// 遥测记录的通道 ID 超出已注册范围
    #[error("Channel {channel_id} out of range (registered channels: {num_channels})")]
    ChannelOutOfRange { channel_id: u32, num_channels: usize },

    /// 请求通道已关闭（采集线程退出）
    #[error("Request channel closed")]
    ChannelClosed,

    /// 采集线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 配置无效
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 持久化失败（只记录日志，不会中断采集）
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl DriverError {
    /// 是否为传输写失败
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Transport(_))
    }
}
