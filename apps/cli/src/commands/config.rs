//! 配置管理命令
//!
//! 生成示例配置、检查配置并显示将要发送的初始化命令。

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::fs;
use std::path::PathBuf;
use whisker_sdk::driver::{ActuatorConfig, ShieldConfig};
use whisker_sdk::{Command, RigConfig, Side};

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 生成示例配置文件
    Init {
        /// 输出路径
        #[arg(short, long, default_value = "rig.toml")]
        output: PathBuf,

        /// 覆盖已存在的文件
        #[arg(short, long)]
        force: bool,
    },

    /// 检查配置文件
    Check {
        /// 配置文件路径
        #[arg(default_value = "rig.toml")]
        path: PathBuf,

        /// 以 JSON 输出解析后的配置
        #[arg(long)]
        json: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Init { output, force } => {
                if output.exists() && !force {
                    bail!("{} 已存在（使用 --force 覆盖）", output.display());
                }
                let text = example_config().to_toml_string()?;
                fs::write(&output, text)
                    .with_context(|| format!("写入配置文件失败: {}", output.display()))?;
                println!("✅ 已生成 {}", output.display());
                Ok(())
            },
            ConfigCommand::Check { path, json } => {
                let config = RigConfig::load(&path)
                    .with_context(|| format!("配置无效: {}", path.display()))?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    return Ok(());
                }

                println!("✅ {} 有效", path.display());
                println!(
                    "   {} 块扩展板, {} 个执行器, {} 个通道",
                    config.topology.len(),
                    config.num_actuators(),
                    config.num_channels()
                );
                println!("   初始化命令:");
                for command in config.setup_commands() {
                    println!("     {}", command.encode());
                }
                println!("     {}", Command::SetSampling(true).encode());
                Ok(())
            },
        }
    }
}

/// 示例：一块扩展板，左右各一个执行器，每个执行器 2 个通道
fn example_config() -> RigConfig {
    let actuator = |motor, side| ActuatorConfig {
        motor,
        side,
        protraction_steps: None,
        retraction_steps: None,
    };

    RigConfig {
        topology: vec![ShieldConfig {
            address: 0,
            channels_per_actuator: 2,
            actuators: vec![actuator(1, Side::Right), actuator(2, Side::Left)],
        }],
        ..RigConfig::default()
    }
}
