//! 复制阶段
//!
//! Replace one destination entry: clear attributes, delete with retry until it
//! is really gone, then copy.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::FileCopyPair;
use crate::error::{DeployError, DeployResult};
use crate::infra::FileSystem;

/// One delete attempt; Ok(true) once `path` is gone
fn delete_attempt(fs: &dyn FileSystem, path: &Path, is_directory: bool) -> io::Result<bool> {
    let exists = |fs: &dyn FileSystem| {
        if is_directory {
            fs.directory_exists(path)
        } else {
            fs.file_exists(path)
        }
    };
    if !exists(fs) {
        return Ok(true);
    }

    let result = if is_directory {
        fs.delete_directory_recursive(path)
    } else {
        let _ = fs.set_attributes_normal(path);
        fs.delete_file(path)
    };
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    // The entry lingers while another handle still has it open
    Ok(!exists(fs))
}

/// Delete `path` (file or directory), retrying while a closing handle still
/// holds it. Gives up with [`DeployError::Timeout`] after `timeout`, carrying
/// the last failure.
pub async fn delete_with_retry(
    fs: Arc<dyn FileSystem>,
    path: &Path,
    is_directory: bool,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> DeployResult<()> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    let mut last_error: Option<io::Error> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        attempts += 1;
        let task_fs = fs.clone();
        let target = path.to_path_buf();
        let attempt =
            tokio::task::spawn_blocking(move || delete_attempt(task_fs.as_ref(), &target, is_directory))
                .await
                .map_err(|e| DeployError::platform(format!("Delete task failed: {}", e)))?;
        match attempt {
            Ok(true) => {
                if attempts > 1 {
                    tracing::debug!(path = %path.display(), attempts, "Deleted after retries");
                }
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => last_error = Some(e),
        }

        if Instant::now() >= deadline {
            let cause = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "it still exists".to_string());
            tracing::warn!(
                path = %path.display(),
                attempts,
                cause = %cause,
                "Giving up deleting destination"
            );
            return Err(DeployError::Timeout {
                path: path.to_path_buf(),
                cause,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Replace the destination of `pair` with its source
pub async fn copy_entry(
    fs: Arc<dyn FileSystem>,
    pair: &FileCopyPair,
    poll_interval: Duration,
    delete_timeout: Duration,
    cancel: &CancellationToken,
) -> DeployResult<()> {
    let source = pair.source.full_path.clone();
    let destination = pair.destination_path();
    let is_directory = pair.is_directory;

    delete_with_retry(
        fs.clone(),
        &destination,
        is_directory,
        poll_interval,
        delete_timeout,
        cancel,
    )
    .await?;

    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }

    let target = destination.clone();
    tokio::task::spawn_blocking(move || {
        if is_directory {
            fs.copy_directory_recursive(&source, &target, true)
        } else {
            fs.copy_file(&source, &target, true)
        }
    })
    .await
    .map_err(|e| DeployError::platform(format!("Copy task failed: {}", e)))?
    .map_err(|e| DeployError::io(&destination, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileEntry;
    use crate::infra::{DirEntryInfo, LocalFileSystem};
    use chrono::Utc;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn pair(source: PathBuf, destination_dir: PathBuf, is_directory: bool) -> FileCopyPair {
        FileCopyPair {
            source: FileEntry {
                name: source.file_name().unwrap().to_string_lossy().to_string(),
                full_path: source,
                size: None,
                modified: Utc::now(),
                is_directory,
                other: false,
                has_other: false,
                overwrite: false,
                get_overwritten: false,
                excluded: false,
                included: false,
            },
            destination_dir,
            is_directory,
        }
    }

    #[tokio::test]
    async fn test_replaces_readonly_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src/app.dll");
        let out = dir.path().join("out");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(&source, "new").unwrap();
        fs::write(out.join("app.dll"), "old").unwrap();
        let mut permissions = fs::metadata(out.join("app.dll")).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(out.join("app.dll"), permissions).unwrap();

        copy_entry(
            Arc::new(LocalFileSystem),
            &pair(source, out.clone(), false),
            Duration::from_millis(1),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(fs::read_to_string(out.join("app.dll")).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_replaces_directory_recursively() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src/bin");
        let out = dir.path().join("out");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("sub/new.dll"), "n").unwrap();
        fs::create_dir_all(out.join("bin")).unwrap();
        fs::write(out.join("bin/stale.dll"), "s").unwrap();

        copy_entry(
            Arc::new(LocalFileSystem),
            &pair(source, out.clone(), true),
            Duration::from_millis(1),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(out.join("bin/sub/new.dll").is_file());
        assert!(!out.join("bin/stale.dll").exists());
    }

    /// A file system whose deletes always fail
    struct StuckFs;

    impl FileSystem for StuckFs {
        fn list_directory(&self, _: &Path) -> io::Result<Vec<DirEntryInfo>> {
            Ok(Vec::new())
        }
        fn directory_exists(&self, _: &Path) -> bool {
            false
        }
        fn file_exists(&self, _: &Path) -> bool {
            true
        }
        fn copy_file(&self, _: &Path, _: &Path, _: bool) -> io::Result<()> {
            Ok(())
        }
        fn copy_directory_recursive(&self, _: &Path, _: &Path, _: bool) -> io::Result<()> {
            Ok(())
        }
        fn delete_file(&self, _: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "sharing violation"))
        }
        fn delete_directory_recursive(&self, _: &Path) -> io::Result<()> {
            Ok(())
        }
        fn set_attributes_normal(&self, _: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delete_gives_up_after_timeout() {
        let result = delete_with_retry(
            Arc::new(StuckFs),
            Path::new("/srv/held.dll"),
            false,
            Duration::from_millis(2),
            Duration::from_millis(30),
            &CancellationToken::new(),
        )
        .await;
        match result {
            Err(DeployError::Timeout { path, cause }) => {
                assert_eq!(path, PathBuf::from("/srv/held.dll"));
                assert_eq!(cause, "sharing violation");
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        // The underlying failure reaches the per-file report
        let report = crate::domain::ErrorReport::new(
            "Failed to copy held.dll",
            DeployError::Timeout {
                path: PathBuf::from("/srv/held.dll"),
                cause: "sharing violation".to_string(),
            },
        );
        assert!(report.cause.contains("sharing violation"));
    }

    #[tokio::test]
    async fn test_delete_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = delete_with_retry(
            Arc::new(StuckFs),
            Path::new("/srv/held.dll"),
            false,
            Duration::from_millis(2),
            Duration::from_secs(30),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DeployError::Cancelled)));
    }
}
