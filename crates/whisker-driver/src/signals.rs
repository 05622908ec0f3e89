//! 同步信号
//!
//! 采集线程与控制线程之间共享的两个电平触发标志：
//!
//! - `sweep_complete`: 当前没有正在进行的扫动
//! - `frame_ready`: 注册表反映了一帧完整数据（所有通道已更新、决策已执行）
//!
//! 电平触发：信号已置位时，等待方立即返回，不需要捕捉边沿。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// 电平触发信号（原子标志 + 条件变量）
#[derive(Debug, Default)]
pub struct LevelSignal {
    flag: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl LevelSignal {
    pub fn new(initial: bool) -> Self {
        Self {
            flag: AtomicBool::new(initial),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// 置位并唤醒所有等待者
    ///
    /// Release: 置位前对注册表的所有写入，对观察到置位的线程可见。
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
        // 持锁后再通知：等待者要么尚未检查标志，要么已经进入 wait
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 阻塞直到信号置位
    pub fn wait(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.is_set() {
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 带超时的等待，返回信号是否已置位
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.is_set() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// 实验台的两个同步信号
#[derive(Debug, Default)]
pub struct RigSignals {
    /// 没有正在进行的扫动
    pub sweep_complete: LevelSignal,
    /// 注册表反映了一帧完整数据
    pub frame_ready: LevelSignal,
}

impl RigSignals {
    pub fn new() -> Self {
        Self::default()
    }
}
