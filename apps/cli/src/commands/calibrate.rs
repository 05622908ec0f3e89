//! 标定命令
//!
//! 连接实验台、收回到静息位置并以当前读数加偏移作为接触阈值。

use crate::utils::RigArgs;
use anyhow::{Context, Result};
use clap::Args;
use whisker_sdk::RigBuilder;

/// 标定命令参数
#[derive(Args, Debug)]
pub struct CalibrateCommand {
    #[command(flatten)]
    pub rig: RigArgs,

    /// 接触偏移（覆盖配置）
    #[arg(long)]
    pub offset: Option<u32>,

    /// 以 JSON 输出标定结果
    #[arg(long)]
    pub json: bool,
}

impl CalibrateCommand {
    pub fn execute(&self) -> Result<()> {
        let mut config = self.rig.load()?;
        if let Some(offset) = self.offset {
            config.motion.contact_offset = offset;
        }
        // 标定不需要记录遥测
        config.log.enabled = false;

        println!("⏳ 连接到实验台...");
        let rig = RigBuilder::new(config)
            .calibrate_on_start(true)
            .connect()
            .context("连接或标定失败")?;
        println!("✅ 已连接: {}", rig.port_name());

        let snapshot = rig.snapshot();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&snapshot.channels)?);
        } else {
            println!("{:>8} {:>9} {:>8} {:>10}", "channel", "actuator", "reading", "threshold");
            for channel in &snapshot.channels {
                println!(
                    "{:>8} {:>9} {:>8} {:>10}",
                    channel.id,
                    channel.actuator_id,
                    channel.sensor_value,
                    channel
                        .contact_threshold
                        .map_or_else(|| "-".to_string(), |t| t.to_string())
                );
            }
        }

        rig.shutdown()?;
        Ok(())
    }
}
