//! 运行指标
//!
//! 原子计数器，采集线程和写盘线程更新，任何线程都可以无锁读取。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 实验台运行指标
///
/// ```rust
/// use whisker_driver::RigMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = RigMetrics::new();
/// metrics.lines_total.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().lines_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct RigMetrics {
    /// 读取到的总行数（包括损坏行）
    pub lines_total: AtomicU64,
    /// 有效记录数（已应用到注册表）
    pub records_valid: AtomicU64,
    /// 格式错误被丢弃的行数
    pub malformed: AtomicU64,
    /// 通道 ID 越界被丢弃的记录数
    pub out_of_range: AtomicU64,
    /// 帧边界数
    pub frames: AtomicU64,
    /// 执行的帧决策数
    pub decisions: AtomicU64,
    /// 成功发出的命令数
    pub commands_sent: AtomicU64,
    /// 写入失败的命令数
    pub command_failures: AtomicU64,
    /// 触发触探的接触事件数
    pub contacts: AtomicU64,
    /// 完成的触探会话数
    pub palpations_completed: AtomicU64,
    /// 成功写盘的批次数
    pub persistence_batches: AtomicU64,
    /// 因写盘队列满而丢弃的批次数
    pub persistence_dropped: AtomicU64,
    /// 写盘失败次数
    pub persistence_failures: AtomicU64,
}

impl RigMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// 读取所有计数器的快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_total: self.lines_total.load(Ordering::Relaxed),
            records_valid: self.records_valid.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            decisions: self.decisions.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            contacts: self.contacts.load(Ordering::Relaxed),
            palpations_completed: self.palpations_completed.load(Ordering::Relaxed),
            persistence_batches: self.persistence_batches.load(Ordering::Relaxed),
            persistence_dropped: self.persistence_dropped.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub lines_total: u64,
    pub records_valid: u64,
    pub malformed: u64,
    pub out_of_range: u64,
    pub frames: u64,
    pub decisions: u64,
    pub commands_sent: u64,
    pub command_failures: u64,
    pub contacts: u64,
    pub palpations_completed: u64,
    pub persistence_batches: u64,
    pub persistence_dropped: u64,
    pub persistence_failures: u64,
}

impl MetricsSnapshot {
    /// 被丢弃的行占比
    pub fn discard_ratio(&self) -> f64 {
        if self.lines_total == 0 {
            return 0.0;
        }
        (self.malformed + self.out_of_range) as f64 / self.lines_total as f64
    }
}
