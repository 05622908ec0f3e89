//! 运行命令
//!
//! 连续扫动、按配置的接触行为触探，并把遥测写入 CSV，直到时长用完或 Ctrl+C。

use crate::utils::{BehaviorArg, RigArgs};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use whisker_sdk::{MetricsSnapshot, Rig, RigBuilder};

/// 停止扫动后等待当前扫动结束的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 运行命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    #[command(flatten)]
    pub rig: RigArgs,

    /// 运行时长（秒），0 表示直到 Ctrl+C
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// 接触行为（覆盖配置）
    #[arg(long, value_enum)]
    pub behavior: Option<BehaviorArg>,

    /// 数据文件标题（覆盖配置）
    #[arg(short, long)]
    pub title: Option<String>,

    /// 不记录遥测
    #[arg(long)]
    pub no_log: bool,

    /// 跳过启动标定（阈值未设置时不会检测接触）
    #[arg(long)]
    pub skip_calibration: bool,

    /// 状态输出间隔（秒），0 表示不输出
    #[arg(long, default_value_t = 5)]
    pub status_interval: u64,

    /// 结束时以 JSON 输出统计
    #[arg(long)]
    pub json: bool,
}

/// 运行结束时的统计
#[derive(Debug, Serialize)]
struct RunSummary {
    port: String,
    elapsed_s: f64,
    log_path: Option<String>,
    metrics: MetricsSnapshot,
}

impl RunCommand {
    pub fn execute(&self) -> Result<()> {
        let mut config = self.rig.load()?;
        if let Some(behavior) = self.behavior {
            config.motion.contact_behavior = behavior.into();
        }
        if let Some(title) = &self.title {
            config.log.title = Some(title.clone());
        }
        if self.no_log {
            config.log.enabled = false;
        }

        // Ctrl+C 只置位标志，由主循环完成收尾
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = interrupted.clone();
            ctrlc::set_handler(move || {
                eprintln!("\nReceived interrupt signal. Stopping...");
                interrupted.store(true, Ordering::Release);
            })
            .context("无法注册 Ctrl+C 处理")?;
        }

        println!("⏳ 连接到实验台...");
        let rig = RigBuilder::new(config)
            .calibrate_on_start(!self.skip_calibration)
            .connect()
            .context("连接实验台失败")?;
        println!("✅ 已连接: {}", rig.port_name());
        if let Some(path) = rig.log_path() {
            println!("📝 记录到 {}", path.display());
        }

        let start = Instant::now();
        rig.start_sweeping()?;
        self.monitor(&rig, &interrupted, start);

        rig.stop_sweeping()?;
        if let Err(e) = rig.wait_sweep_complete_timeout(DRAIN_TIMEOUT) {
            warn!("Sweep did not finish before shutdown: {}", e);
        }

        let summary = RunSummary {
            port: rig.port_name().to_string(),
            elapsed_s: start.elapsed().as_secs_f64(),
            log_path: rig.log_path().map(|p| p.display().to_string()),
            metrics: rig.metrics(),
        };
        rig.shutdown()?;
        self.report(&summary)
    }

    /// 等待时长用完、Ctrl+C 或采集线程退出
    fn monitor(&self, rig: &Rig, interrupted: &AtomicBool, start: Instant) {
        let deadline = (self.duration > 0).then(|| start + Duration::from_secs(self.duration));
        let status_interval = Duration::from_secs(self.status_interval);
        let mut last_status = Instant::now();

        loop {
            if interrupted.load(Ordering::Acquire) {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!("Run duration reached");
                break;
            }
            if !rig.is_healthy() {
                warn!("Ingestion thread stopped unexpectedly");
                break;
            }

            if self.status_interval > 0 && last_status.elapsed() >= status_interval {
                last_status = Instant::now();
                let metrics = rig.metrics();
                let status = rig.motion_status();
                info!(
                    "frames={} contacts={} palpations={} palpating={} discard={:.2}%",
                    metrics.frames,
                    metrics.contacts,
                    metrics.palpations_completed,
                    status.palpation.active,
                    metrics.discard_ratio() * 100.0
                );
            }

            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn report(&self, summary: &RunSummary) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(summary)?);
            return Ok(());
        }

        let m = &summary.metrics;
        println!("✅ 运行结束（{:.1}s）", summary.elapsed_s);
        println!("   帧数:       {}", m.frames);
        println!("   有效记录:   {}", m.records_valid);
        println!("   丢弃行:     {} ({:.2}%)", m.malformed + m.out_of_range, m.discard_ratio() * 100.0);
        println!("   接触:       {}", m.contacts);
        println!("   触探完成:   {}", m.palpations_completed);
        println!("   命令:       {} (失败 {})", m.commands_sent, m.command_failures);
        if m.persistence_dropped > 0 || m.persistence_failures > 0 {
            println!(
                "   ⚠️ 写盘丢弃 {} 批, 失败 {} 次",
                m.persistence_dropped, m.persistence_failures
            );
        }
        Ok(())
    }
}
