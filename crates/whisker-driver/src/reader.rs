//! 遥测帧读取
//!
//! 设备按通道交错输出记录，同一帧的所有记录共享一个时间戳。
//! 时间戳变化即意味着上一帧已经结束（帧边界）。

use whisker_protocol::{ProtocolError, TelemetryRecord};

/// 一条记录在帧序列中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    /// 时间戳变化：本记录开启新帧，上一帧已完成
    Boundary {
        /// 上一帧的时间戳
        previous: u64,
    },
    /// 与上一条记录同一帧
    Continuation,
}

/// 帧边界检测
///
/// `last_timestamp` 初始为 0，因此以时间戳 0 开始的数据流不会在第一条记录处
/// 产生边界。
#[derive(Debug, Default)]
pub struct FrameTracker {
    last_timestamp: u64,
    /// 当前帧中已见到的重复记录数（新帧第一条记录时为 0）
    samples_at_timestamp: u32,
    frames: u64,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 观察一条有效记录的时间戳
    pub fn observe(&mut self, timestamp: u64) -> FramePosition {
        if timestamp == self.last_timestamp {
            self.samples_at_timestamp += 1;
            FramePosition::Continuation
        } else {
            let previous = self.last_timestamp;
            self.last_timestamp = timestamp;
            self.samples_at_timestamp = 0;
            self.frames += 1;
            FramePosition::Boundary { previous }
        }
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn samples_at_timestamp(&self) -> u32 {
        self.samples_at_timestamp
    }

    /// 已检测到的帧边界数
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// 一行遥测的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// 格式错误，已丢弃
    Malformed(ProtocolError),
    /// 有效记录
    Record {
        record: TelemetryRecord,
        position: FramePosition,
    },
}

/// 遥测帧读取器：解析 + 帧边界检测
#[derive(Debug, Default)]
pub struct FrameReader {
    tracker: FrameTracker,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一行原始数据
    ///
    /// 格式错误的行不参与帧边界检测。
    pub fn read_line(&mut self, line: &[u8]) -> LineOutcome {
        match TelemetryRecord::parse_line(line) {
            Ok(record) => LineOutcome::Record {
                record,
                position: self.tracker.observe(record.timestamp),
            },
            Err(e) => LineOutcome::Malformed(e),
        }
    }

    pub fn tracker(&self) -> &FrameTracker {
        &self.tracker
    }
}
