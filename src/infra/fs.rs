//! 文件系统能力
//!
//! 部署引擎需要的目录列举与复制/删除原语。Listing, copying and deleting
//! block; the orchestrator moves them onto `spawn_blocking`.

use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// One immediate child of a listed directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    /// None for directories
    pub size: Option<u64>,
    pub modified: DateTime<Utc>,
    pub is_directory: bool,
}

/// Filesystem primitives used by the diff engine and the copy phase
pub trait FileSystem: Send + Sync {
    /// Immediate children of `path`, files first then directories.
    /// Fails with `NotFound` when `path` does not exist.
    fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;

    fn directory_exists(&self, path: &Path) -> bool;

    fn file_exists(&self, path: &Path) -> bool;

    /// Network share path (`\\server\share\...`)
    fn is_remote_path(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        text.starts_with(r"\\") || text.starts_with("//")
    }

    fn copy_file(&self, source: &Path, destination: &Path, overwrite: bool) -> io::Result<()>;

    fn copy_directory_recursive(
        &self,
        source: &Path,
        destination: &Path,
        overwrite: bool,
    ) -> io::Result<()>;

    fn delete_file(&self, path: &Path) -> io::Result<()>;

    fn delete_directory_recursive(&self, path: &Path) -> io::Result<()>;

    /// Clear read-only (and on Windows hidden/system) attributes
    fn set_attributes_normal(&self, path: &Path) -> io::Result<()>;
}

/// `std::fs` backed implementation
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn modified_utc(metadata: &fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

/// Copy and carry the source's modification time over, so a later diff sees
/// both sides in sync
fn copy_with_times(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;
    // The copy inherits the read-only bit, so no write handle is opened here
    let modified = FileTime::from_last_modification_time(&fs::metadata(source)?);
    filetime::set_file_mtime(destination, modified)
}

/// `\\host` prefix of a network path
#[cfg_attr(not(windows), allow(dead_code))]
fn share_host(path: &Path) -> Option<String> {
    let text = path.to_string_lossy();
    let rest = text.strip_prefix(r"\\").or_else(|| text.strip_prefix("//"))?;
    let host = rest
        .split(|c: char| c == '\\' || c == '/')
        .next()
        .filter(|h| !h.is_empty())?;
    Some(format!(r"\\{host}"))
}

/// Connect to the host of a share before it is probed, so a stat does not
/// report a missing directory for a host we never authenticated against.
/// Each host is tried once per process.
#[cfg(windows)]
fn connect_share(path: &Path) {
    use std::collections::HashSet;
    use std::sync::{Mutex, OnceLock};

    static CONNECTED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

    let Some(host) = share_host(path) else {
        return;
    };
    // Held across `net use`: concurrent probes of one host wait for the first
    let Ok(mut connected) = CONNECTED.get_or_init(|| Mutex::new(HashSet::new())).lock() else {
        return;
    };
    if !connected.insert(host.to_lowercase()) {
        return;
    }

    match std::process::Command::new("net").args(["use", host.as_str()]).output() {
        Ok(output) if output.status.success() => {
            tracing::debug!(host = %host, "Connected to network host");
        }
        Ok(output) => tracing::warn!(
            host = %host,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Failed to connect to network host"
        ),
        Err(e) => tracing::warn!(host = %host, error = %e, "Failed to run net use"),
    }
}

// Shares are reached through mounts here; there is nothing to connect
#[cfg(not(windows))]
fn connect_share(_path: &Path) {}

impl FileSystem for LocalFileSystem {
    fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut files = Vec::new();
        let mut directories = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(m) => m,
                // Vanished between read_dir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let info = DirEntryInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size: (!metadata.is_dir()).then(|| metadata.len()),
                modified: modified_utc(&metadata),
                is_directory: metadata.is_dir(),
            };
            if info.is_directory {
                directories.push(info);
            } else {
                files.push(info);
            }
        }

        files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        directories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        files.extend(directories);
        Ok(files)
    }

    fn directory_exists(&self, path: &Path) -> bool {
        if self.is_remote_path(path) {
            connect_share(path);
        }
        path.is_dir()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn copy_file(&self, source: &Path, destination: &Path, overwrite: bool) -> io::Result<()> {
        if !overwrite && destination.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", destination.display()),
            ));
        }
        copy_with_times(source, destination)
    }

    fn copy_directory_recursive(
        &self,
        source: &Path,
        destination: &Path,
        overwrite: bool,
    ) -> io::Result<()> {
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let target = destination.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                self.copy_file(entry.path(), &target, overwrite)?;
            }
        }
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn delete_directory_recursive(&self, path: &Path) -> io::Result<()> {
        for entry in WalkDir::new(path) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_dir() {
                self.set_attributes_normal(entry.path())?;
            }
        }
        fs::remove_dir_all(path)
    }

    #[cfg(unix)]
    fn set_attributes_normal(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)?.permissions();
        let mode = permissions.mode();
        if mode & 0o200 == 0 {
            permissions.set_mode(mode | 0o200);
            fs::set_permissions(path, permissions)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_attributes_normal(&self, path: &Path) -> io::Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions)?;
        }
        Ok(())
    }
}
