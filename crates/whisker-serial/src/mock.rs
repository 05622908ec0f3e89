//! Mock 传输（无硬件依赖）
//!
//! 克隆出的句柄共享同一份内部状态：测试代码保留一个句柄用于注入遥测行、
//! 检查写出的字节，另一个句柄交给驱动层。

use crate::{Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use whisker_protocol::COMMAND_TERMINATOR;

/// 写出的单个字节及其写出时刻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenByte {
    pub byte: u8,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<WrittenByte>,
    fail_writes: bool,
    flushes: usize,
}

/// 脚本化的 Mock 传输
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注入一行输入（不含 `\n`）
    pub fn push_line(&self, line: impl AsRef<[u8]>) {
        self.state().incoming.push_back(line.as_ref().to_vec());
    }

    /// 批量注入输入行
    pub fn push_lines<I, L>(&self, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut state = self.state();
        for line in lines {
            state.incoming.push_back(line.as_ref().to_vec());
        }
    }

    /// 尚未被读取的输入行数
    pub fn pending_lines(&self) -> usize {
        self.state().incoming.len()
    }

    /// 令后续写入全部失败（模拟设备断开）
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// 所有写出的原始字节
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state().written.iter().map(|w| w.byte).collect()
    }

    /// 所有写出的字节及时间戳
    pub fn written_log(&self) -> Vec<WrittenByte> {
        self.state().written.clone()
    }

    /// 按 `\r` 切分出的完整命令（不含终止符）
    pub fn written_commands(&self) -> Vec<String> {
        let bytes = self.written_bytes();
        bytes
            .split(|&b| b == COMMAND_TERMINATOR)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    /// 清空写出记录
    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    /// `flush_incoming` 被调用的次数
    pub fn flush_count(&self) -> usize {
        self.state().flushes
    }
}

impl Transport for MockTransport {
    fn try_read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.state().incoming.pop_front())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(TransportError::Disconnected);
        }
        state.written.push(WrittenByte {
            byte,
            at: Instant::now(),
        });
        Ok(())
    }

    fn flush_incoming(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.incoming.clear();
        state.flushes += 1;
        Ok(())
    }
}
