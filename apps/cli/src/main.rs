//! # Whisker CLI
//!
//! Command-line interface for whisker array rigs.
//!
//! ```bash
//! # 生成并检查配置
//! whisker-cli config init --output rig.toml
//! whisker-cli config check rig.toml
//!
//! # 列出串口
//! whisker-cli ports
//!
//! # 标定接触阈值
//! whisker-cli calibrate --config rig.toml
//!
//! # 连续扫动 60 秒（Ctrl+C 提前结束），记录遥测
//! whisker-cli run --config rig.toml --duration 60
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::{CalibrateCommand, ConfigCommand, PortsCommand, RunCommand};

/// Whisker CLI - 触须阵列实验台命令行工具
#[derive(Parser, Debug)]
#[command(name = "whisker-cli")]
#[command(about = "Command-line interface for whisker array rigs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 列出可用串口
    Ports {
        #[command(flatten)]
        args: PortsCommand,
    },

    /// 标定接触阈值
    Calibrate {
        #[command(flatten)]
        args: CalibrateCommand,
    },

    /// 连续扫动并记录遥测
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    whisker_sdk::init_logger_with_default("whisker_cli=info,whisker_driver=info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Ports { args } => args.execute(),
        Commands::Calibrate { args } => args.execute(),
        Commands::Run { args } => args.execute(),
    }
}
