//! Builder 模式实现
//!
//! 提供链式构造 `Rig` 实例的便捷方式。

use crate::config::RigConfig;
use crate::encoder::{CommandEncoder, CommandSink, Pacing};
use crate::error::DriverError;
use crate::metrics::RigMetrics;
use crate::motion::MotionStateMachine;
use crate::persistence::{AutosaveBuffer, CsvFileSink, PersistenceSink, spawn_writer};
use crate::pipeline::{Ingestor, PipelineConfig, RigContext, ingest_loop};
use crate::rig::{Rig, RigParts};
use crossbeam_channel::bounded;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use whisker_protocol::Command;
use whisker_serial::Transport;

/// 控制线程请求队列容量
const REQUEST_QUEUE_CAPACITY: usize = 16;

/// Rig Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use whisker_driver::{RigBuilder, RigConfig};
///
/// let config = RigConfig::load("rig.toml").unwrap();
/// let rig = RigBuilder::new(config)
///     .calibrate_on_start(true)
///     .connect()
///     .unwrap();
/// rig.start_sweeping().unwrap();
/// ```
pub struct RigBuilder {
    config: RigConfig,
    /// Pipeline 配置
    pipeline_config: Option<PipelineConfig>,
    /// 显式指定的持久化目标（覆盖 `log` 配置）
    persistence_sink: Option<Box<dyn PersistenceSink>>,
    request_timeout: Duration,
    calibrate_on_start: bool,
}

impl RigBuilder {
    pub fn new(config: RigConfig) -> Self {
        Self {
            config,
            pipeline_config: None,
            persistence_sink: None,
            request_timeout: Duration::from_secs(5),
            calibrate_on_start: false,
        }
    }

    /// 设置 Pipeline 配置（可选）
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    /// 使用自定义持久化目标，而不是 `<directory>/<title>.csv`
    pub fn persistence_sink(mut self, sink: impl PersistenceSink + 'static) -> Self {
        self.persistence_sink = Some(Box::new(sink));
        self
    }

    /// 控制线程等待请求应答的最长时间（默认 5s）
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 启动后先标定接触阈值
    pub fn calibrate_on_start(mut self, enabled: bool) -> Self {
        self.calibrate_on_start = enabled;
        self
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// 打开串口（配置中的端口，否则自动发现）、完成握手并构建
    ///
    /// # 错误
    /// - `DriverError::Transport`: 找不到设备、无法打开或握手超时
    #[cfg(feature = "serial")]
    pub fn connect(self) -> Result<Rig, DriverError> {
        use whisker_serial::SerialTransport;

        self.config.validate()?;
        let serial = &self.config.serial;
        let mut transport = match serial.port.as_deref() {
            Some(path) => SerialTransport::open(path, serial.bit_rate)?,
            None => SerialTransport::discover(serial.bit_rate)?,
        };
        transport.wait_for_handshake(Duration::from_millis(serial.handshake_timeout_ms))?;
        let port_name = transport.port_name().to_string();
        self.build_named(transport, port_name)
    }

    /// 在已就绪的传输上构建实验台
    ///
    /// 依次执行：校验配置、发送初始化命令和 `set_sampling 1`、
    /// 启动写盘线程和采集线程，可选地等待启动延时后标定。
    ///
    /// # 错误
    /// - `DriverError::InvalidConfig`: 配置校验失败
    /// - `DriverError::Transport`: 初始化命令写入失败
    /// - `DriverError::Persistence`: 无法创建数据文件
    /// - `DriverError::IoThread`: 线程创建失败
    pub fn build<T: Transport + Send + 'static>(self, transport: T) -> Result<Rig, DriverError> {
        self.build_named(transport, "custom".to_string())
    }

    fn build_named<T: Transport + Send + 'static>(
        self,
        transport: T,
        port_name: String,
    ) -> Result<Rig, DriverError> {
        let RigBuilder {
            config,
            pipeline_config,
            persistence_sink,
            request_timeout,
            calibrate_on_start,
        } = self;
        config.validate()?;

        let metrics = Arc::new(RigMetrics::new());
        let ctx = Arc::new(RigContext::new(metrics.clone()));

        // 1. 初始化命令在采集线程启动前同步发出
        let mut encoder = CommandEncoder::new(transport, Pacing::from(&config.timing));
        let mut setup = config.setup_commands();
        setup.push(Command::SetSampling(true));
        for command in &setup {
            debug!("Setup: {}", command.encode());
            encoder.send(command)?;
        }
        RigMetrics::add(&metrics.commands_sent, encoder.sent());
        info!(
            "Rig configured: {} shields, {} actuators, {} channels",
            config.topology.len(),
            config.num_actuators(),
            config.num_channels()
        );

        // 2. 写盘线程
        let (sink, log_path): (Option<Box<dyn PersistenceSink>>, Option<PathBuf>) =
            match persistence_sink {
                Some(sink) => (Some(sink), None),
                None if config.log.enabled => {
                    let title = config.log.title.clone().unwrap_or_else(default_title);
                    let sink = CsvFileSink::create(&config.log.directory, &title)?;
                    let path = sink.path().to_path_buf();
                    (Some(Box::new(sink) as Box<dyn PersistenceSink>), Some(path))
                },
                None => (None, None),
            };

        let mut ingestor = Ingestor::new(
            encoder,
            config.build_registry(),
            MotionStateMachine::new(config.motion.clone(), config.timing.command_gap()),
            ctx.clone(),
            config.motion.contact_offset,
        );
        let writer_thread = match sink {
            Some(sink) => {
                let (queue, handle) =
                    spawn_writer(sink, config.log.queue_capacity, metrics.clone())?;
                ingestor = ingestor.with_persistence(
                    AutosaveBuffer::new(config.timing.autosave_interval()),
                    queue,
                );
                Some(handle)
            },
            None => None,
        };

        // 3. 采集线程
        let (requests_tx, requests_rx) = bounded(REQUEST_QUEUE_CAPACITY);
        let is_running = Arc::new(AtomicBool::new(true));
        let io_thread = {
            let is_running = is_running.clone();
            let pipeline_config = pipeline_config.unwrap_or_default();
            thread::Builder::new()
                .name("whisker-io".to_string())
                .spawn(move || ingest_loop(ingestor, requests_rx, is_running, pipeline_config))
                .map_err(|e| DriverError::IoThread(e.to_string()))?
        };

        let rig = Rig::from_parts(RigParts {
            requests: requests_tx,
            ctx,
            io_thread,
            writer_thread,
            is_running,
            timing: config.timing.clone(),
            request_timeout,
            port_name,
            log_path,
        });

        // 4. 标定（可选）
        if calibrate_on_start {
            thread::sleep(config.timing.startup_delay());
            rig.calibrate()?;
        }

        Ok(rig)
    }
}

/// 默认文件标题：`whisker-<unix 秒>`
fn default_title() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("whisker-{}", secs)
}
