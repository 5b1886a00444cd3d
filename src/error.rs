//! 统一错误处理
//!
//! Library code returns `DeployError`; only cancellation and programming errors
//! ever reach the caller of a deployment. Per-file failures are turned into
//! reports by the orchestrator instead.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum DeployError {
    /// The run was cancelled through its cancellation token
    #[error("The operation was canceled")]
    Cancelled,

    /// Another deployment is already active
    #[error("A deployment is already in progress")]
    AlreadyRunning,

    /// A configuration item id or name did not resolve
    #[error("Configuration not found: {0}")]
    ConfigurationNotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process or service control failure
    #[error("Platform error: {0}")]
    Platform(String),

    /// A destination could not be deleted in time; `cause` is the last
    /// failure seen
    #[error("Timed out waiting for {} to be deleted: {cause}", path.display())]
    Timeout { path: PathBuf, cause: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// 是否为取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }
}

/// 便捷类型别名
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = DeployError::io(
            "/srv/app/locked.dll",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let text = err.to_string();
        assert!(text.contains("locked.dll"));
        assert!(text.contains("denied"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(DeployError::Cancelled.is_cancelled());
        assert!(!DeployError::platform("boom").is_cancelled());
    }
}
