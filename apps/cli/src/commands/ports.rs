//! 串口列表命令

use anyhow::{Context, Result};
use clap::Args;
use whisker_sdk::serial::list_ports;

/// 串口列表参数
#[derive(Args, Debug)]
pub struct PortsCommand {
    /// 只显示 Arduino 设备
    #[arg(long)]
    pub arduino_only: bool,
}

impl PortsCommand {
    pub fn execute(&self) -> Result<()> {
        let ports = list_ports().context("枚举串口失败")?;
        let ports: Vec<_> = ports
            .into_iter()
            .filter(|p| !self.arduino_only || p.is_arduino)
            .collect();

        if ports.is_empty() {
            println!("未找到串口");
            return Ok(());
        }

        for port in ports {
            let marker = if port.is_arduino { "*" } else { " " };
            println!(
                "{} {:<20} {}",
                marker,
                port.name,
                port.description.as_deref().unwrap_or("-")
            );
        }
        Ok(())
    }
}
