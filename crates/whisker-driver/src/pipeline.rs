//! 采集循环
//!
//! 单个后台线程同时负责：
//!
//! 1. 处理控制线程的请求（命令在这里串行发出，编码器只有这一个所有者）
//! 2. 非阻塞读取遥测行，解析、检测帧边界、更新注册表
//! 3. 在帧边界运行运动状态机，发布注册表快照并置位 `frame_ready`
//! 4. 按保存间隔把记录交给写盘线程
//!
//! 除命令协议规定的短暂延时外，循环从不阻塞。

use crate::config::ContactBehavior;
use crate::encoder::CommandEncoder;
use crate::error::DriverError;
use crate::metrics::RigMetrics;
use crate::motion::{MotionStateMachine, MotionStatus, PalpationEvent};
use crate::persistence::{AutosaveBuffer, PersistenceQueue};
use crate::reader::{FramePosition, FrameReader, LineOutcome};
use crate::registry::{ChannelRegistry, HistoryEntry, RegistrySnapshot};
use crate::signals::RigSignals;
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use whisker_protocol::Command;
use whisker_serial::Transport;

/// 采集循环配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 没有数据时的轮询间隔（微秒）
    pub poll_interval_us: u64,
    /// 每轮最多处理的行数（保证请求能及时得到处理）
    pub max_lines_per_poll: usize,
    /// 退出时提交最后一批记录的最长等待（毫秒）
    pub final_flush_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 200,
            max_lines_per_poll: 256,
            final_flush_timeout_ms: 1_000,
        }
    }
}

/// 控制线程 → 采集线程的请求
#[derive(Debug, Clone)]
pub enum Request {
    /// 发出一条命令
    Command(Command),
    /// 开启连续扫动并发出第一次扫动
    StartSweeping,
    /// 关闭连续扫动
    StopSweeping,
    /// 切换接触行为
    SetContactBehavior(ContactBehavior),
    /// 暂停/恢复连续扫动与接触反应
    Suspend(bool),
    /// 以当前读数为静息值设置接触阈值
    CaptureThresholds,
    /// 导出单个通道的历史（复制到 `respond`）
    ChannelHistory {
        channel_id: u32,
        respond: Sender<Vec<HistoryEntry>>,
    },
}

/// 请求的应答通道
pub type Reply = Sender<Result<(), DriverError>>;

/// 采集线程与控制线程共享的上下文
#[derive(Debug)]
pub struct RigContext {
    pub signals: RigSignals,
    /// 最近一个完整帧的注册表快照
    pub snapshot: ArcSwap<RegistrySnapshot>,
    /// 最近一次发布的状态机状态
    pub motion: ArcSwap<MotionStatus>,
    pub metrics: Arc<RigMetrics>,
}

impl RigContext {
    pub fn new(metrics: Arc<RigMetrics>) -> Self {
        Self {
            signals: RigSignals::new(),
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            motion: ArcSwap::from_pointee(MotionStatus::default()),
            metrics,
        }
    }
}

/// 采集线程持有的全部状态
///
/// 注册表、状态机和编码器只在这里被修改。
pub struct Ingestor<T: Transport> {
    encoder: CommandEncoder<T>,
    reader: FrameReader,
    registry: ChannelRegistry,
    motion: MotionStateMachine,
    ctx: Arc<RigContext>,
    persistence: Option<(AutosaveBuffer, PersistenceQueue)>,
    contact_offset: u32,
    /// 最近一次发布快照对应的帧时间戳
    published_timestamp: u64,
}

impl<T: Transport> Ingestor<T> {
    pub fn new(
        encoder: CommandEncoder<T>,
        registry: ChannelRegistry,
        motion: MotionStateMachine,
        ctx: Arc<RigContext>,
        contact_offset: u32,
    ) -> Self {
        let ingestor = Self {
            encoder,
            reader: FrameReader::new(),
            registry,
            motion,
            ctx,
            persistence: None,
            contact_offset,
            published_timestamp: 0,
        };
        ingestor.publish_snapshot();
        ingestor.publish_motion();
        ingestor
    }

    /// 启用攒批写盘
    pub fn with_persistence(mut self, buffer: AutosaveBuffer, queue: PersistenceQueue) -> Self {
        self.persistence = Some((buffer, queue));
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn motion(&self) -> &MotionStateMachine {
        &self.motion
    }

    fn metrics(&self) -> &RigMetrics {
        &self.ctx.metrics
    }

    fn publish_snapshot(&self) {
        let snapshot = self
            .registry
            .snapshot(self.published_timestamp, self.reader.tracker().frames());
        self.ctx.snapshot.store(Arc::new(snapshot));
    }

    fn publish_motion(&self) {
        self.ctx.motion.store(Arc::new(self.motion.status()));
    }

    /// 统计一次操作中编码器发出的命令数和失败
    fn account_commands<R>(&self, sent_before: u64, result: &Result<R, DriverError>) {
        RigMetrics::add(
            &self.metrics().commands_sent,
            self.encoder.sent() - sent_before,
        );
        if let Err(e) = result
            && e.is_transport()
        {
            RigMetrics::incr(&self.metrics().command_failures);
        }
    }

    /// 处理一行遥测数据
    pub fn handle_line(&mut self, line: &[u8]) {
        RigMetrics::incr(&self.metrics().lines_total);

        let (record, position) = match self.reader.read_line(line) {
            LineOutcome::Record { record, position } => (record, position),
            LineOutcome::Malformed(e) => {
                RigMetrics::incr(&self.metrics().malformed);
                warn!(
                    "Discarding malformed telemetry line {:?}: {}",
                    String::from_utf8_lossy(line),
                    e
                );
                return;
            },
        };

        match position {
            FramePosition::Boundary { previous } => self.on_frame_boundary(previous),
            FramePosition::Continuation => self.ctx.signals.frame_ready.clear(),
        }

        match self.registry.apply(&record) {
            Ok(()) => {
                RigMetrics::incr(&self.metrics().records_valid);
                trace!("Applied {}", record);
            },
            Err(e) => {
                RigMetrics::incr(&self.metrics().out_of_range);
                warn!("Discarding telemetry record: {}", e);
            },
        }

        if let Some((buffer, _)) = self.persistence.as_mut() {
            buffer.push(record);
        }
    }

    /// 帧边界：决策 → 发布快照 → 置位 `frame_ready`
    ///
    /// 此时触发边界的记录尚未应用，决策看到的是上一帧结束时的状态。
    fn on_frame_boundary(&mut self, previous: u64) {
        RigMetrics::incr(&self.metrics().frames);

        let sent_before = self.encoder.sent();
        let result = self
            .motion
            .on_frame(&mut self.registry, &self.ctx.signals, &mut self.encoder);
        RigMetrics::incr(&self.metrics().decisions);
        self.account_commands(sent_before, &result);

        match result {
            Ok(decision) => match decision.palpation {
                Some(PalpationEvent::Started { .. }) => {
                    RigMetrics::incr(&self.metrics().contacts)
                },
                Some(PalpationEvent::Finished) => {
                    RigMetrics::incr(&self.metrics().palpations_completed)
                },
                _ => {},
            },
            Err(e) => error!("Frame decision could not issue command: {}", e),
        }

        self.published_timestamp = previous;
        self.publish_snapshot();
        self.publish_motion();
        self.ctx.signals.frame_ready.set();
        debug!(
            "Frame {} complete ({} frames)",
            previous,
            self.reader.tracker().frames()
        );
    }

    /// 处理控制线程的请求
    pub fn handle_request(&mut self, request: Request) -> Result<(), DriverError> {
        let sent_before = self.encoder.sent();
        let signals = &self.ctx.signals;

        let result = match request {
            Request::Command(command) => {
                debug!("Requested command {:?}", command.encode());
                self.motion
                    .issue(command, &mut self.registry, signals, &mut self.encoder)
            },
            Request::StartSweeping => {
                self.motion
                    .start_sweeping(&mut self.registry, signals, &mut self.encoder)
            },
            Request::StopSweeping => {
                self.motion.stop_sweeping();
                Ok(())
            },
            Request::SetContactBehavior(behavior) => {
                info!("Contact behavior set to {:?}", behavior);
                self.motion.set_behavior(behavior);
                Ok(())
            },
            Request::Suspend(suspended) => {
                self.motion.set_suspended(suspended);
                Ok(())
            },
            Request::CaptureThresholds => {
                self.registry.capture_thresholds(self.contact_offset);
                info!(
                    "Contact thresholds captured (offset {})",
                    self.contact_offset
                );
                self.publish_snapshot();
                Ok(())
            },
            Request::ChannelHistory {
                channel_id,
                respond,
            } => self.export_history(channel_id, &respond),
        };

        self.account_commands(sent_before, &result);
        self.publish_motion();
        result
    }

    fn export_history(
        &self,
        channel_id: u32,
        respond: &Sender<Vec<HistoryEntry>>,
    ) -> Result<(), DriverError> {
        let channel =
            self.registry
                .channel(channel_id)
                .ok_or(DriverError::ChannelOutOfRange {
                    channel_id,
                    num_channels: self.registry.num_channels(),
                })?;
        // 请求方已放弃等待时直接丢弃
        let _ = respond.try_send(channel.history().to_vec());
        Ok(())
    }

    /// 到达保存间隔时把缓存交给写盘线程
    pub fn poll_autosave(&mut self, now: Instant) {
        if let Some((buffer, queue)) = self.persistence.as_mut()
            && let Some(batch) = buffer.take_due(now)
        {
            queue.submit(batch);
        }
    }

    /// 退出前提交剩余记录
    pub fn finish(&mut self, timeout: Duration) {
        if let Some((buffer, queue)) = self.persistence.as_mut() {
            queue.submit_final(buffer.take_all(), timeout);
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.encoder.transport_mut()
    }
}

/// 采集线程主循环
///
/// # 参数
/// - `ingestor`: 采集状态（会被移动到采集线程）
/// - `requests`: 控制线程请求
/// - `is_running`: 运行标志（每轮检查一次）
/// - `config`: 循环配置
///
/// 运行标志清除或请求通道断开后退出；退出前把剩余记录交给写盘线程。
pub fn ingest_loop<T: Transport>(
    mut ingestor: Ingestor<T>,
    requests: Receiver<(Request, Reply)>,
    is_running: Arc<AtomicBool>,
    config: PipelineConfig,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Ingestion thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set ingestion thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    let poll_interval = Duration::from_micros(config.poll_interval_us);

    'outer: loop {
        // Acquire: 看到 false 时，也能看到设置方之前的所有写入
        if !is_running.load(Ordering::Acquire) {
            trace!("Ingestion thread: is_running flag is false, exiting");
            break;
        }

        // 1. 请求
        loop {
            match requests.try_recv() {
                Ok((request, reply)) => {
                    let result = ingestor.handle_request(request);
                    // 请求方可能已放弃等待
                    let _ = reply.send(result);
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Request channel disconnected, exiting ingestion loop");
                    break 'outer;
                },
            }
        }

        // 2. 遥测
        let mut idle = true;
        for _ in 0..config.max_lines_per_poll {
            match ingestor.transport_mut().try_read_line() {
                Ok(Some(line)) => {
                    idle = false;
                    ingestor.handle_line(&line);
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Transport read error: {}", e);
                    break;
                },
            }
        }

        // 3. 写盘
        ingestor.poll_autosave(Instant::now());

        if idle {
            spin_sleep::sleep(poll_interval);
        }
    }

    ingestor.finish(Duration::from_millis(config.final_flush_timeout_ms));
    info!("Ingestion loop stopped");
}
