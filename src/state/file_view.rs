//! 文件视图状态
//!
//! Latest diff of the selected pairing, both sides. Every refresh supersedes
//! the one still in flight: the older one is cancelled and its result is never
//! stored.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::{DeploymentPolicy, DirectoryPairing, FileEntry, FileViewMode};
use crate::error::{DeployError, DeployResult};
use crate::infra::FileSystem;
use crate::services::diff::{diff, Side};

/// Stored diff of one pairing
#[derive(Clone, Debug, Default)]
pub struct FileViewSnapshot {
    pub generation: u64,
    pub pairing: Option<DirectoryPairing>,
    pub view: FileViewMode,
    pub left: Vec<FileEntry>,
    pub right: Vec<FileEntry>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl FileViewSnapshot {
    pub fn entries(&self, side: Side) -> &[FileEntry] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { left: usize, right: usize },
    /// A newer refresh started before this one finished
    Superseded,
}

/// 文件视图
pub struct FileView {
    fs: Arc<dyn FileSystem>,
    snapshot: RwLock<FileViewSnapshot>,
    generation: AtomicU64,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl FileView {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            snapshot: RwLock::new(FileViewSnapshot::default()),
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    /// Recompute both sides of `pairing`
    pub async fn refresh(
        &self,
        pairing: &DirectoryPairing,
        policy: &DeploymentPolicy,
        view: FileViewMode,
    ) -> DeployResult<RefreshOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| DeployError::platform("file view lock poisoned"))?;
            if let Some(previous) = in_flight.replace(token.clone()) {
                previous.cancel();
            }
        }

        let fs = self.fs.clone();
        let left_dir = pairing.left.clone();
        let right_dir = pairing.right.clone();
        let policy_copy = policy.clone();
        let task = tokio::task::spawn_blocking(move || -> DeployResult<_> {
            let left = diff(fs.as_ref(), &left_dir, &right_dir, Side::Left, &policy_copy, view)?;
            let right = diff(fs.as_ref(), &right_dir, &left_dir, Side::Right, &policy_copy, view)?;
            Ok((left, right))
        });

        let (left, right) = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(generation, "File view refresh superseded");
                return Ok(RefreshOutcome::Superseded);
            }
            joined = task => joined
                .map_err(|e| DeployError::platform(format!("Diff task failed: {}", e)))??,
        };

        let mut snapshot = self.snapshot.write().await;
        if token.is_cancelled() || snapshot.generation > generation {
            return Ok(RefreshOutcome::Superseded);
        }

        let outcome = RefreshOutcome::Updated {
            left: left.len(),
            right: right.len(),
        };
        *snapshot = FileViewSnapshot {
            generation,
            pairing: Some(pairing.clone()),
            view,
            left,
            right,
            refreshed_at: Some(Utc::now()),
        };
        tracing::debug!(
            generation,
            left = %pairing.left.display(),
            right = %pairing.right.display(),
            "File view refreshed"
        );
        Ok(outcome)
    }

    pub async fn snapshot(&self) -> FileViewSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Cancel whatever refresh is running
    pub fn cancel(&self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some(token) = in_flight.take() {
                token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NonExistingFileAction;
    use crate::infra::{DirEntryInfo, LocalFileSystem};
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Local file system that stalls on directories named "slow"
    struct SlowFs(LocalFileSystem);

    impl FileSystem for SlowFs {
        fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
            if path.file_name().map_or(false, |n| n == "slow") {
                std::thread::sleep(Duration::from_millis(200));
            }
            self.0.list_directory(path)
        }
        fn directory_exists(&self, path: &Path) -> bool {
            self.0.directory_exists(path)
        }
        fn file_exists(&self, path: &Path) -> bool {
            self.0.file_exists(path)
        }
        fn copy_file(&self, s: &Path, d: &Path, o: bool) -> io::Result<()> {
            self.0.copy_file(s, d, o)
        }
        fn copy_directory_recursive(&self, s: &Path, d: &Path, o: bool) -> io::Result<()> {
            self.0.copy_directory_recursive(s, d, o)
        }
        fn delete_file(&self, path: &Path) -> io::Result<()> {
            self.0.delete_file(path)
        }
        fn delete_directory_recursive(&self, path: &Path) -> io::Result<()> {
            self.0.delete_directory_recursive(path)
        }
        fn set_attributes_normal(&self, path: &Path) -> io::Result<()> {
            self.0.set_attributes_normal(path)
        }
    }

    fn pairing(left: PathBuf, right: PathBuf) -> DirectoryPairing {
        DirectoryPairing {
            raw_left: left.to_string_lossy().to_string(),
            raw_right: right.to_string_lossy().to_string(),
            left,
            right,
        }
    }

    fn dirs(root: &Path, left: &str, files: &[&str]) -> DirectoryPairing {
        let l = root.join(left);
        let r = root.join(format!("{left}-out"));
        fs::create_dir_all(&l).unwrap();
        fs::create_dir_all(&r).unwrap();
        for f in files {
            fs::write(l.join(f), "x").unwrap();
        }
        pairing(l, r)
    }

    fn policy() -> DeploymentPolicy {
        DeploymentPolicy {
            left_but_not_right: NonExistingFileAction::Copy,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_stores_both_sides() {
        let root = TempDir::new().unwrap();
        let p = dirs(root.path(), "build", &["a.txt", "b.txt"]);
        fs::write(p.right.join("c.txt"), "x").unwrap();

        let view = FileView::new(Arc::new(LocalFileSystem::new()));
        let outcome = view.refresh(&p, &policy(), FileViewMode::All).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Updated { left: 3, right: 3 });

        let snapshot = view.snapshot().await;
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.entries(Side::Left).len(), 3);
        assert_eq!(snapshot.pairing, Some(p));
    }

    #[tokio::test]
    async fn test_newer_refresh_supersedes_slow_one() {
        let root = TempDir::new().unwrap();
        let slow = dirs(root.path(), "slow", &["old.txt"]);
        let fast = dirs(root.path(), "fast", &["new1.txt", "new2.txt"]);

        let view = Arc::new(FileView::new(Arc::new(SlowFs(LocalFileSystem::new()))));
        let first = {
            let view = view.clone();
            let policy = policy();
            tokio::spawn(async move { view.refresh(&slow, &policy, FileViewMode::All).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = view.refresh(&fast, &policy(), FileViewMode::All).await.unwrap();
        assert_eq!(second, RefreshOutcome::Updated { left: 2, right: 2 });
        assert_eq!(first.await.unwrap().unwrap(), RefreshOutcome::Superseded);

        let snapshot = view.snapshot().await;
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.pairing.unwrap().left, fast.left);
    }

    #[tokio::test]
    async fn test_pending_view_of_missing_destination() {
        let root = TempDir::new().unwrap();
        let left = root.path().join("build");
        fs::create_dir_all(&left).unwrap();
        fs::write(left.join("a.txt"), "x").unwrap();

        let view = FileView::new(Arc::new(LocalFileSystem::new()));
        let p = pairing(left, root.path().join("missing"));
        view.refresh(&p, &policy(), FileViewMode::Pending).await.unwrap();

        let snapshot = view.snapshot().await;
        assert_eq!(snapshot.left.len(), 1);
        // The incoming file, seen from the destination
        assert_eq!(snapshot.right.len(), 1);
        assert!(snapshot.right[0].other);
    }
}
