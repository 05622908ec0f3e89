//! 基于 `serialport` 的串口传输实现
//!
//! 负责设备发现、打开端口以及启动握手；这些步骤都在驱动 IO 线程启动之前完成。

use crate::{LineBuffer, Transport, TransportError};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use whisker_protocol::HANDSHAKE_BYTE;

/// 串口读写超时（只影响阻塞调用；`try_read_line` 先检查可读字节数，不会阻塞）
const PORT_TIMEOUT: Duration = Duration::from_millis(10);

/// 收到握手字节后等待设备输出稳定的时间
const POST_HANDSHAKE_DELAY: Duration = Duration::from_millis(250);

/// 单次读取的最大字节数
const READ_CHUNK: usize = 1024;

/// 在设备描述中查找的关键字
const DEVICE_KEYWORD: &str = "arduino";

/// 可用串口的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// USB 厂商/产品描述（非 USB 端口为空）
    pub description: Option<String>,
    /// 描述中是否包含 "Arduino"
    pub is_arduino: bool,
}

/// 列出系统中所有串口
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => {
                let labels: Vec<&str> = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect();
                let is_arduino =
                    labels.iter().any(|s| s.to_ascii_lowercase().contains(DEVICE_KEYWORD));
                trace!(
                    "Found USB port {} (vid={:04x}, pid={:04x})",
                    port.port_name, usb.vid, usb.pid
                );
                PortInfo {
                    name: port.port_name,
                    description: (!labels.is_empty()).then(|| labels.join(" ")),
                    is_arduino,
                }
            },
            _ => PortInfo {
                name: port.port_name,
                description: None,
                is_arduino: false,
            },
        })
        .collect())
}

/// 查找第一个描述中包含 "Arduino" 的 USB 串口
pub fn find_arduino_port() -> Result<String, TransportError> {
    let port = list_ports()?.into_iter().find(|p| p.is_arduino).ok_or_else(|| {
        TransportError::NotFound("no USB serial port reporting an Arduino".to_string())
    })?;
    debug!("Matched device {}", port.name);
    Ok(port.name)
}

/// 真实串口传输
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
    port_name: String,
}

impl SerialTransport {
    /// 打开指定串口
    pub fn open(path: &str, bit_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, bit_rate).timeout(PORT_TIMEOUT).open()?;
        info!("Serial port {} opened at {} baud", path, bit_rate);

        Ok(Self {
            port,
            lines: LineBuffer::new(),
            port_name: path.to_string(),
        })
    }

    /// 自动发现并打开设备
    pub fn discover(bit_rate: u32) -> Result<Self, TransportError> {
        let path = find_arduino_port()?;
        Self::open(&path, bit_rate)
    }

    /// 端口名称
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// 等待设备发送握手字节 `!`
    ///
    /// 收到后等待 250ms，再清空输入缓冲区，保证后续读取从干净的状态开始。
    ///
    /// # 错误
    /// - `TransportError::HandshakeTimeout`: 超时未收到握手字节
    pub fn wait_for_handshake(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        while Instant::now() < deadline {
            let available = self.port.bytes_to_read()? as usize;
            if available == 0 {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }

            let n = self.port.read(&mut chunk[..available.min(READ_CHUNK)])?;
            if chunk[..n].contains(&HANDSHAKE_BYTE) {
                std::thread::sleep(POST_HANDSHAKE_DELAY);
                self.flush_incoming()?;
                info!("Handshake complete on {}", self.port_name);
                return Ok(());
            }
        }

        Err(TransportError::HandshakeTimeout(timeout))
    }
}

impl Transport for SerialTransport {
    fn try_read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(line) = self.lines.pop_line() {
            return Ok(Some(line));
        }

        let available = self.port.bytes_to_read()? as usize;
        if available > 0 {
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.port.read(&mut chunk[..available.min(READ_CHUNK)])?;
            trace!("Read {} bytes from {}", n, self.port_name);
            self.lines.push(&chunk[..n]);
        }

        Ok(self.lines.pop_line())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        self.port.write_all(&[byte])?;
        Ok(())
    }

    fn flush_incoming(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::Input)?;
        self.lines.clear();
        Ok(())
    }
}
