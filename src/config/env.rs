//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use self::constants::{
    CONFIG_FILE_NAME, DEFAULT_DELETE_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_STOP_TIMEOUT_SECS,
};

/// 环境配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvConfig {
    /// 数据目录（配置文件与备份）
    pub data_dir: PathBuf,
    /// 配置文件路径
    pub config_path: PathBuf,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 删除目标文件的最长重试时间（秒）
    pub delete_timeout_secs: u64,
    /// 等待服务/进程停止的最长时间（秒）
    pub stop_timeout_secs: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(".");
        Self {
            config_path: data_dir.join(CONFIG_FILE_NAME),
            data_dir,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            delete_timeout_secs: DEFAULT_DELETE_TIMEOUT_SECS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let data_dir = env::var("DEPLOYER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let config_path = env::var("DEPLOYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(CONFIG_FILE_NAME));

        let poll_interval_ms = parse_var("DEPLOYER_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
        let delete_timeout_secs =
            parse_var("DEPLOYER_DELETE_TIMEOUT_SECS", DEFAULT_DELETE_TIMEOUT_SECS);
        let stop_timeout_secs = parse_var("DEPLOYER_STOP_TIMEOUT_SECS", DEFAULT_STOP_TIMEOUT_SECS);

        Self {
            data_dir,
            config_path,
            // Zero would turn every wait into a busy loop
            poll_interval_ms: poll_interval_ms.max(1),
            delete_timeout_secs,
            stop_timeout_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// 解析数值环境变量，无效值回退默认值
fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// 常量
pub mod constants {
    /// 轮询间隔（毫秒）
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

    /// 删除重试超时（秒）
    pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 30;

    /// 停止超时（秒）
    pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

    /// 保留的历史运行记录数
    pub const MAX_RUN_HISTORY: usize = 50;

    /// 默认配置文件名
    pub const CONFIG_FILE_NAME: &str = "deployer.json";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
