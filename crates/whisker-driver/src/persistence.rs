//! 遥测数据持久化
//!
//! 采集线程只负责攒批：每隔 `autosave_interval` 把缓存的记录交给有界队列
//! （`try_send`，从不阻塞，队列满则丢弃该批并计数）。独立的写盘线程从队列
//! 取出批次写入 [`PersistenceSink`]，失败只记录日志和计数。

use crate::error::DriverError;
use crate::metrics::RigMetrics;
use crossbeam_channel::{Sender, TrySendError, bounded};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use whisker_protocol::{TELEMETRY_FIELDS, TelemetryRecord};

/// 持久化目标
pub trait PersistenceSink: Send {
    /// 追加一批记录
    fn append_frame(&mut self, rows: &[TelemetryRecord]) -> Result<(), DriverError>;

    /// 把缓冲写入底层存储
    fn flush(&mut self) -> Result<(), DriverError>;
}

impl<S: PersistenceSink + ?Sized> PersistenceSink for Box<S> {
    fn append_frame(&mut self, rows: &[TelemetryRecord]) -> Result<(), DriverError> {
        (**self).append_frame(rows)
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        (**self).flush()
    }
}

fn io_error(path: &Path, e: std::io::Error) -> DriverError {
    DriverError::Persistence(format!("{}: {}", path.display(), e))
}

/// CSV 文件输出：`<directory>/<title>.csv`
pub struct CsvFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvFileSink {
    /// 创建目录和文件，并写入表头
    pub fn create(directory: impl AsRef<Path>, title: &str) -> Result<Self, DriverError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|e| io_error(directory, e))?;

        let path = directory.join(format!("{}.csv", title.trim_end_matches(".csv")));
        let file = File::create(&path).map_err(|e| io_error(&path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", TELEMETRY_FIELDS.join(",")).map_err(|e| io_error(&path, e))?;

        info!("Logging telemetry to {}", path.display());
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSink for CsvFileSink {
    fn append_frame(&mut self, rows: &[TelemetryRecord]) -> Result<(), DriverError> {
        for row in rows {
            writeln!(self.writer, "{}", row.to_csv_row()).map_err(|e| io_error(&self.path, e))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        self.writer.flush().map_err(|e| io_error(&self.path, e))
    }
}

/// 内存输出（测试和嵌入式使用）
///
/// 克隆出的句柄共享同一份数据。
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<TelemetryRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<TelemetryRecord> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistenceSink for MemorySink {
    fn append_frame(&mut self, rows: &[TelemetryRecord]) -> Result<(), DriverError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(rows);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// 采集线程侧的攒批缓冲
#[derive(Debug)]
pub struct AutosaveBuffer {
    rows: Vec<TelemetryRecord>,
    interval: Duration,
    last_save: Instant,
}

impl AutosaveBuffer {
    pub fn new(interval: Duration) -> Self {
        Self {
            rows: Vec::new(),
            interval,
            last_save: Instant::now(),
        }
    }

    pub fn push(&mut self, record: TelemetryRecord) {
        self.rows.push(record);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 到达保存间隔时取出缓存的记录
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<TelemetryRecord>> {
        if now.duration_since(self.last_save) < self.interval {
            return None;
        }
        self.last_save = now;
        Some(mem::take(&mut self.rows))
    }

    /// 无条件取出全部记录
    pub fn take_all(&mut self) -> Vec<TelemetryRecord> {
        self.last_save = Instant::now();
        mem::take(&mut self.rows)
    }
}

/// 写盘队列的发送端（由采集线程持有）
pub struct PersistenceQueue {
    tx: Sender<Vec<TelemetryRecord>>,
    metrics: Arc<RigMetrics>,
}

impl PersistenceQueue {
    /// 非阻塞提交一批记录，返回是否入队
    pub fn submit(&self, batch: Vec<TelemetryRecord>) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.tx.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(batch)) => {
                RigMetrics::incr(&self.metrics.persistence_dropped);
                warn!(
                    "Persistence queue full, dropping {} telemetry rows",
                    batch.len()
                );
                false
            },
            Err(TrySendError::Disconnected(batch)) => {
                RigMetrics::incr(&self.metrics.persistence_failures);
                warn!(
                    "Persistence writer gone, dropping {} telemetry rows",
                    batch.len()
                );
                false
            },
        }
    }

    /// 阻塞提交最后一批（仅在退出时使用），最多等待 `timeout`
    pub fn submit_final(&self, batch: Vec<TelemetryRecord>, timeout: Duration) {
        if batch.is_empty() {
            return;
        }
        let len = batch.len();
        if self.tx.send_timeout(batch, timeout).is_err() {
            RigMetrics::incr(&self.metrics.persistence_dropped);
            warn!("Could not hand final {} rows to persistence writer", len);
        }
    }
}

/// 启动写盘线程
///
/// 返回队列发送端和线程句柄；发送端全部销毁后线程写完剩余批次、flush 并退出。
///
/// # 错误
/// - `DriverError::IoThread`: 线程创建失败
pub fn spawn_writer(
    mut sink: Box<dyn PersistenceSink>,
    capacity: usize,
    metrics: Arc<RigMetrics>,
) -> Result<(PersistenceQueue, JoinHandle<()>), DriverError> {
    let (tx, rx) = bounded::<Vec<TelemetryRecord>>(capacity);
    let writer_metrics = metrics.clone();

    let handle = thread::Builder::new()
        .name("whisker-writer".to_string())
        .spawn(move || {
            for batch in rx.iter() {
                let result = sink.append_frame(&batch).and_then(|_| sink.flush());
                match result {
                    Ok(()) => {
                        RigMetrics::incr(&writer_metrics.persistence_batches);
                        debug!("Persisted {} telemetry rows", batch.len());
                    },
                    Err(e) => {
                        RigMetrics::incr(&writer_metrics.persistence_failures);
                        warn!("Failed to persist {} telemetry rows: {}", batch.len(), e);
                    },
                }
            }
            if let Err(e) = sink.flush() {
                RigMetrics::incr(&writer_metrics.persistence_failures);
                warn!("Final persistence flush failed: {}", e);
            }
            debug!("Persistence writer exited");
        })
        .map_err(|e| DriverError::IoThread(e.to_string()))?;

    Ok((PersistenceQueue { tx, metrics }, handle))
}
