//! # Whisker Serial Transport Layer
//!
//! 串口传输抽象层，为驱动层提供统一的、非阻塞的按行读取接口。
//!
//! - [`Transport`]: 传输 trait（驱动层只依赖此 trait）
//! - [`LineBuffer`]: 字节流 → 行 的切分器
//! - [`SerialTransport`]: 基于 `serialport` 的真实串口实现（`serial` feature）
//! - [`mock::MockTransport`]: 无硬件的脚本化实现（`mock` feature）

use std::time::Duration;
use thiserror::Error;

mod line_buffer;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "mock")]
pub mod mock;

pub use line_buffer::LineBuffer;

#[cfg(feature = "serial")]
pub use serial::{PortInfo, SerialTransport, find_arduino_port, list_ports};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Handshake not received within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Transport disconnected")]
    Disconnected,
}

/// 行式传输接口
///
/// 实现必须保证 `try_read_line` 不阻塞：没有完整行时立即返回 `Ok(None)`。
/// 返回的行不包含行终止符 `\n`。
pub trait Transport {
    /// 非阻塞读取一行
    fn try_read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// 写出单个字节（节奏由调用方控制）
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError>;

    /// 丢弃所有尚未读取的输入
    fn flush_incoming(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn try_read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        (**self).try_read_line()
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        (**self).write_byte(byte)
    }

    fn flush_incoming(&mut self) -> Result<(), TransportError> {
        (**self).flush_incoming()
    }
}
