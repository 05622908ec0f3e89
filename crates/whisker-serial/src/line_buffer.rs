//! 字节流切分为行

use std::collections::VecDeque;
use tracing::warn;
use whisker_protocol::LINE_TERMINATOR;

/// 单行最大长度（字节）
///
/// 合法遥测行远小于此值；超过即认为串口失步，丢弃直到下一个换行符。
pub const DEFAULT_MAX_LINE_LEN: usize = 256;

/// 行缓冲区
///
/// 累积原始字节，按 `\n` 切分出完整行。
#[derive(Debug)]
pub struct LineBuffer {
    partial: Vec<u8>,
    lines: VecDeque<Vec<u8>>,
    max_line_len: usize,
    /// 是否处于失步丢弃状态（等待下一个换行符）
    discarding: bool,
    overflowed: u64,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            partial: Vec::with_capacity(64),
            lines: VecDeque::new(),
            max_line_len,
            discarding: false,
            overflowed: 0,
        }
    }

    /// 追加原始字节
    pub fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == LINE_TERMINATOR {
                if self.discarding {
                    self.discarding = false;
                } else {
                    self.lines.push_back(std::mem::take(&mut self.partial));
                }
                continue;
            }

            if self.discarding {
                continue;
            }

            self.partial.push(byte);
            if self.partial.len() > self.max_line_len {
                warn!(
                    "Line exceeded {} bytes without terminator, resyncing",
                    self.max_line_len
                );
                self.partial.clear();
                self.discarding = true;
                self.overflowed += 1;
            }
        }
    }

    /// 取出最早的完整行
    pub fn pop_line(&mut self) -> Option<Vec<u8>> {
        self.lines.pop_front()
    }

    /// 已完成但尚未取出的行数
    pub fn pending(&self) -> usize {
        self.lines.len()
    }

    /// 因超长而丢弃的行数
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// 清空所有缓存（包括未完成的行）
    pub fn clear(&mut self) {
        self.partial.clear();
        self.lines.clear();
        self.discarding = false;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
