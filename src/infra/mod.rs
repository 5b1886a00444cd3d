//! 基础设施模块
//!
//! 封装平台能力（文件系统、进程、Windows 服务）

pub mod fs;
pub mod process;
pub mod scm;

#[cfg(test)]
pub mod fake;

pub use fs::{DirEntryInfo, FileSystem, LocalFileSystem};
pub use process::{ProcessControl, ProcessHandle, ServiceHandle, ServiceStatus, SystemProcessControl};
