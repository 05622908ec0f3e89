//! Rig API 模块
//!
//! 对外的 [`Rig`] 句柄：控制线程通过它发出高层请求、等待同步信号、读取快照。
//! 控制线程从不直接修改注册表。

use crate::config::{ContactBehavior, TimingConfig};
use crate::error::DriverError;
use crate::metrics::MetricsSnapshot;
use crate::motion::MotionStatus;
use crate::pipeline::{Reply, Request, RigContext};
use crate::registry::{HistoryEntry, RegistrySnapshot};
use crate::signals::{LevelSignal, RigSignals};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use whisker_protocol::{ActuatorTarget, Command};

/// 无超时等待时检查采集线程存活的间隔
const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: std::marker::Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = bounded(1);

        // 看门狗线程负责真正的 join；超时后它会继续运行直到目标线程结束
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 触须阵列实验台（对外 API）
///
/// 由 [`RigBuilder`](crate::RigBuilder) 创建。所有发命令的操作都交给采集线程执行，
/// 结果经应答通道同步返回，因此传输写失败会直接反映到调用方。
pub struct Rig {
    /// 请求通道（Drop 时先于 join 关闭）
    requests: Option<Sender<(Request, Reply)>>,
    ctx: Arc<RigContext>,
    io_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
    /// 运行标志（用于线程生命周期联动）
    is_running: Arc<AtomicBool>,
    timing: TimingConfig,
    request_timeout: Duration,
    join_timeout: Duration,
    port_name: String,
    log_path: Option<PathBuf>,
}

/// [`Rig`] 的组成部分（由构建器组装）
pub(crate) struct RigParts {
    pub requests: Sender<(Request, Reply)>,
    pub ctx: Arc<RigContext>,
    pub io_thread: JoinHandle<()>,
    pub writer_thread: Option<JoinHandle<()>>,
    pub is_running: Arc<AtomicBool>,
    pub timing: TimingConfig,
    pub request_timeout: Duration,
    pub port_name: String,
    pub log_path: Option<PathBuf>,
}

impl Rig {
    pub(crate) fn from_parts(parts: RigParts) -> Self {
        Self {
            requests: Some(parts.requests),
            ctx: parts.ctx,
            io_thread: Some(parts.io_thread),
            writer_thread: parts.writer_thread,
            is_running: parts.is_running,
            timing: parts.timing,
            request_timeout: parts.request_timeout,
            join_timeout: Duration::from_secs(2),
            port_name: parts.port_name,
            log_path: parts.log_path,
        }
    }

    /// 把请求交给采集线程并等待结果
    ///
    /// # 错误
    /// - `DriverError::ChannelClosed`: 采集线程已退出
    /// - `DriverError::Timeout`: 采集线程未在 `request_timeout` 内应答
    /// - 请求本身的错误（如 `DriverError::Transport`）
    fn request(&self, request: Request) -> Result<(), DriverError> {
        let requests = self.requests.as_ref().ok_or(DriverError::ChannelClosed)?;
        let (reply_tx, reply_rx) = bounded(1);
        requests
            .send((request, reply_tx))
            .map_err(|_| DriverError::ChannelClosed)?;

        match reply_rx.recv_timeout(self.request_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DriverError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::ChannelClosed),
        }
    }

    /// 发出任意命令
    pub fn send_command(&self, command: Command) -> Result<(), DriverError> {
        self.request(Request::Command(command))
    }

    /// 开启连续扫动
    pub fn start_sweeping(&self) -> Result<(), DriverError> {
        self.request(Request::StartSweeping)
    }

    /// 关闭连续扫动（进行中的扫动会自然结束）
    pub fn stop_sweeping(&self) -> Result<(), DriverError> {
        self.request(Request::StopSweeping)
    }

    /// 执行一次扫动
    pub fn sweep(&self, target: ActuatorTarget) -> Result<(), DriverError> {
        self.send_command(Command::Sweep(target))
    }

    /// 回到收回位置
    pub fn retract(&self, target: ActuatorTarget) -> Result<(), DriverError> {
        self.send_command(Command::Retract(target))
    }

    /// 回零
    pub fn home(&self, target: ActuatorTarget) -> Result<(), DriverError> {
        self.send_command(Command::Home(target))
    }

    /// 设置伸出目标（步）
    pub fn set_protraction(&self, target: ActuatorTarget, steps: i64) -> Result<(), DriverError> {
        self.send_command(Command::SetProtraction { target, steps })
    }

    /// 设置收回目标（步）
    pub fn set_retraction(&self, target: ActuatorTarget, steps: i64) -> Result<(), DriverError> {
        self.send_command(Command::SetRetraction { target, steps })
    }

    /// 设置加速度（步/秒²）
    pub fn set_acceleration(&self, target: ActuatorTarget, value: u32) -> Result<(), DriverError> {
        self.send_command(Command::SetAcceleration { target, value })
    }

    /// 设置最大速度（步/秒）
    pub fn set_speed(&self, target: ActuatorTarget, value: u32) -> Result<(), DriverError> {
        self.send_command(Command::SetSpeed { target, value })
    }

    /// 切换接触行为
    pub fn set_contact_behavior(&self, behavior: ContactBehavior) -> Result<(), DriverError> {
        self.request(Request::SetContactBehavior(behavior))
    }

    /// 标定接触阈值
    ///
    /// 暂停接触反应和连续扫动，收回到收回位置，等待扫动完成和完整帧，
    /// 再静置 `calibration_settle_ms`，最后以各通道当前读数加偏移作为阈值。
    /// 无论成功与否都会恢复原来的行为。
    ///
    /// # 错误
    /// - `DriverError::Transport`: 收回命令写入失败
    /// - `DriverError::ChannelClosed`: 等待期间采集线程退出
    pub fn calibrate(&self) -> Result<Arc<RegistrySnapshot>, DriverError> {
        info!("Calibrating contact thresholds");
        self.request(Request::Suspend(true))?;

        let result = self
            .retract(ActuatorTarget::All)
            .and_then(|_| self.wait_sweep_complete())
            .and_then(|_| self.wait_frame_ready())
            .and_then(|_| {
                std::thread::sleep(self.timing.calibration_settle());
                self.request(Request::CaptureThresholds)
            });

        let restored = self.request(Request::Suspend(false));
        result?;
        restored?;

        let snapshot = self.snapshot();
        info!(
            "Calibration complete: {:?}",
            snapshot
                .channels
                .iter()
                .map(|c| c.contact_threshold)
                .collect::<Vec<_>>()
        );
        Ok(snapshot)
    }

    /// 等待信号；采集线程退出时返回错误而不是永远阻塞
    fn wait_signal(&self, signal: &LevelSignal, timeout: Option<Duration>) -> Result<(), DriverError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DriverError::Timeout);
                    }
                    (deadline - now).min(LIVENESS_POLL)
                },
                None => LIVENESS_POLL,
            };
            if signal.wait_timeout(slice) {
                return Ok(());
            }
            if !self.is_healthy() {
                return Err(DriverError::ChannelClosed);
            }
        }
    }

    /// 阻塞直到没有正在进行的扫动
    pub fn wait_sweep_complete(&self) -> Result<(), DriverError> {
        self.wait_signal(&self.ctx.signals.sweep_complete, None)
    }

    /// 带超时地等待扫动完成
    pub fn wait_sweep_complete_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        self.wait_signal(&self.ctx.signals.sweep_complete, Some(timeout))
    }

    /// 阻塞直到注册表反映一帧完整数据
    pub fn wait_frame_ready(&self) -> Result<(), DriverError> {
        self.wait_signal(&self.ctx.signals.frame_ready, None)
    }

    /// 带超时地等待完整帧
    pub fn wait_frame_ready_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        self.wait_signal(&self.ctx.signals.frame_ready, Some(timeout))
    }

    /// 最近一个完整帧的注册表快照（无锁）
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.ctx.snapshot.load_full()
    }

    /// 导出单个通道自启动以来的全部历史
    ///
    /// 历史由采集线程持有，这里复制一份返回。
    ///
    /// # 错误
    /// - `DriverError::ChannelOutOfRange`: 通道 ID 未注册
    /// - `DriverError::ChannelClosed`: 采集线程已退出
    /// - `DriverError::Timeout`: 采集线程未在 `request_timeout` 内应答
    pub fn channel_history(&self, channel_id: u32) -> Result<Vec<HistoryEntry>, DriverError> {
        let (respond, history) = bounded(1);
        self.request(Request::ChannelHistory {
            channel_id,
            respond,
        })?;
        history.try_recv().map_err(|_| DriverError::ChannelClosed)
    }

    /// 状态机状态
    pub fn motion_status(&self) -> MotionStatus {
        **self.ctx.motion.load()
    }

    /// 同步信号
    pub fn signals(&self) -> &RigSignals {
        &self.ctx.signals
    }

    /// 获取性能指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 采集线程是否仍在运行
    pub fn is_healthy(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
            && self.io_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// 遥测 CSV 路径（如果启用了文件记录）
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// 关闭实验台
    ///
    /// 发送 `set_sampling 0`，停止采集线程并等待其退出，再等待写盘线程写完剩余数据。
    ///
    /// # 错误
    /// - `set_sampling 0` 发送失败（线程仍会被停止）
    pub fn shutdown(mut self) -> Result<(), DriverError> {
        let result = self.request(Request::Command(Command::SetSampling(false)));
        self.stop();
        info!("Rig shut down");
        result
    }

    fn stop(&mut self) {
        // Release: 之前的所有写入对采集线程可见
        self.is_running.store(false, Ordering::Release);

        // 关闭请求通道，确保采集线程不会再等待新请求
        drop(self.requests.take());

        if let Some(handle) = self.io_thread.take()
            && let Err(_e) = handle.join_timeout(self.join_timeout)
        {
            error!(
                "Ingestion thread panicked or failed to shut down within {:?}",
                self.join_timeout
            );
        }

        // 采集线程退出后写盘队列的发送端已销毁，写盘线程写完即退出
        if let Some(handle) = self.writer_thread.take()
            && let Err(_e) = handle.join_timeout(self.join_timeout)
        {
            error!(
                "Persistence thread panicked or failed to shut down within {:?}",
                self.join_timeout
            );
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        if self.io_thread.is_none() {
            return;
        }
        if self.is_healthy()
            && let Err(e) = self.request(Request::Command(Command::SetSampling(false)))
        {
            warn!("Failed to stop sampling while dropping rig: {}", e);
        }
        self.stop();
    }
}
