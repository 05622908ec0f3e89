//! 工具函数

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use whisker_sdk::{ContactBehavior, RigConfig};

/// 接触行为（命令行取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BehaviorArg {
    Palpate,
    Ignore,
}

impl From<BehaviorArg> for ContactBehavior {
    fn from(arg: BehaviorArg) -> Self {
        match arg {
            BehaviorArg::Palpate => ContactBehavior::Palpate,
            BehaviorArg::Ignore => ContactBehavior::Ignore,
        }
    }
}

/// 连接实验台所需的公共参数
#[derive(Args, Debug, Clone)]
pub struct RigArgs {
    /// 配置文件路径
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// 串口路径（覆盖配置；都未指定时自动查找 Arduino）
    #[arg(short, long)]
    pub port: Option<String>,

    /// 波特率（覆盖配置）
    #[arg(short, long)]
    pub bit_rate: Option<u32>,
}

impl RigArgs {
    /// 加载配置并应用命令行覆盖
    pub fn load(&self) -> Result<RigConfig> {
        let mut config = RigConfig::load(&self.config)
            .with_context(|| format!("加载配置失败: {}", self.config.display()))?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut RigConfig) {
        if let Some(port) = &self.port {
            config.serial.port = Some(port.clone());
        }
        if let Some(bit_rate) = self.bit_rate {
            config.serial.bit_rate = bit_rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_mapping() {
        assert_eq!(ContactBehavior::from(BehaviorArg::Ignore), ContactBehavior::Ignore);
        assert_eq!(ContactBehavior::from(BehaviorArg::Palpate), ContactBehavior::Palpate);
    }

    #[test]
    fn test_overrides_apply() {
        let args = RigArgs {
            config: PathBuf::from("rig.toml"),
            port: Some("/dev/ttyUSB3".to_string()),
            bit_rate: Some(9600),
        };
        let mut config = RigConfig::default();
        args.apply(&mut config);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.serial.bit_rate, 9600);
    }

    #[test]
    fn test_load_reports_path() {
        let args = RigArgs {
            config: PathBuf::from("/nonexistent/rig.toml"),
            port: None,
            bit_rate: None,
        };
        let err = args.load().unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/rig.toml"));
    }
}
