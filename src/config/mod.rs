//! 配置模块
//!
//! 环境变量解析与配置文件持久化

pub mod env;
pub mod store;

pub use env::EnvConfig;
pub use store::ConfigStore;
