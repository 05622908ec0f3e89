//! 命令编码器
//!
//! 把命令编码为 ASCII 文本并逐字节写入传输层：
//!
//! ```text
//! w ─10µs─ h ─10µs─ i ─ ... ─ 9 ─10µs─ \r ─10µs─ [settle ≥10ms]
//! ```
//!
//! 设备的接收缓冲很小，不按节奏发送会丢字符。

use crate::config::TimingConfig;
use crate::error::DriverError;
use std::time::Duration;
use tracing::{debug, error};
use whisker_protocol::{COMMAND_TERMINATOR, Command};
use whisker_serial::Transport;

/// 命令出口
///
/// 运动状态机只依赖此 trait，便于在测试中替换为记录器。
pub trait CommandSink {
    /// 发送一条命令，返回后才能发送下一条
    fn send(&mut self, command: &Command) -> Result<(), DriverError>;
}

/// 发送节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// 字节间隔
    pub inter_byte: Duration,
    /// 终止符后的稳定时间
    pub settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for Pacing {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            inter_byte: timing.inter_byte_delay(),
            settle: timing.settle_delay(),
        }
    }
}

/// 逐字节节奏发送的命令编码器
///
/// 任意时刻只有一个所有者（启动前为构建器，启动后为采集线程），
/// 因此命令之间天然串行。
pub struct CommandEncoder<T: Transport> {
    transport: T,
    pacing: Pacing,
    sent: u64,
}

impl<T: Transport> CommandEncoder<T> {
    pub fn new(transport: T, pacing: Pacing) -> Self {
        Self {
            transport,
            pacing,
            sent: 0,
        }
    }

    /// 已成功发送的命令数
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// 访问底层传输（读取遥测）
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 发送原始命令体（不含终止符）
    ///
    /// # 错误
    /// - `DriverError::Transport`: 任一字节写入失败；命令视为未发送
    pub fn send_text(&mut self, text: &str) -> Result<(), DriverError> {
        for byte in text.bytes().chain(std::iter::once(COMMAND_TERMINATOR)) {
            if let Err(e) = self.transport.write_byte(byte) {
                error!("Failed to write command {:?}: {}", text, e);
                return Err(e.into());
            }
            spin_sleep::sleep(self.pacing.inter_byte);
        }
        spin_sleep::sleep(self.pacing.settle);

        self.sent += 1;
        debug!("Sent command {:?}", text);
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: Transport> CommandSink for CommandEncoder<T> {
    fn send(&mut self, command: &Command) -> Result<(), DriverError> {
        command.validate()?;
        self.send_text(&command.encode())
    }
}
