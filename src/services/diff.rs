//! 目录差异引擎
//!
//! Compares the immediate children of two directories and classifies every
//! entry: newer/older than its counterpart, present on one side only, and
//! excluded or not. A pending view then keeps only what a deployment from left
//! to right would actually copy.
//!
//! Names are matched case-insensitively. Equal modification times count as in
//! sync. The returned list holds this side's entries (files, then directories)
//! followed by the other side's unmatched entries.

use std::io;
use std::path::Path;

use crate::domain::{
    DeploymentPolicy, ExistingFileAction, FileEntry, FileViewMode, NonExistingFileAction,
};
use crate::error::{DeployError, DeployResult};
use crate::infra::{DirEntryInfo, FileSystem};

/// Which side of a pairing a listing is viewed from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Source
    Left,
    /// Destination
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// List a directory; a missing directory shows no entries
fn list(
    fs: &dyn FileSystem,
    dir: &Path,
    include_directories: bool,
) -> DeployResult<Vec<DirEntryInfo>> {
    match fs.list_directory(dir) {
        Ok(entries) => Ok(entries
            .into_iter()
            .filter(|e| include_directories || !e.is_directory)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(DeployError::io(dir, e)),
    }
}

struct Filters {
    exclusions: crate::domain::PatternList,
    inclusions: crate::domain::PatternList,
}

impl Filters {
    fn new(policy: &DeploymentPolicy) -> Self {
        Self {
            exclusions: policy.exclusion_patterns(),
            inclusions: policy.inclusion_patterns(),
        }
    }

    fn entry(&self, dir: &Path, info: DirEntryInfo, other: bool) -> FileEntry {
        let included = !self.inclusions.is_empty() && self.inclusions.matches(&info.name);
        let excluded = self.exclusions.matches(&info.name)
            || (!self.inclusions.is_empty() && !included);

        FileEntry {
            full_path: dir.join(&info.name),
            name: info.name,
            size: info.size,
            modified: info.modified,
            is_directory: info.is_directory,
            other,
            has_other: false,
            overwrite: false,
            get_overwritten: false,
            excluded,
            included,
        }
    }
}

/// Compute the classified entry list of `dir` against `other_dir`.
///
/// `side` says whether `dir` is the source (left) or the destination (right);
/// it only matters for the pending view.
pub fn diff(
    fs: &dyn FileSystem,
    dir: &Path,
    other_dir: &Path,
    side: Side,
    policy: &DeploymentPolicy,
    view: FileViewMode,
) -> DeployResult<Vec<FileEntry>> {
    let filters = Filters::new(policy);

    let mut entries: Vec<FileEntry> = list(fs, dir, policy.include_directories)?
        .into_iter()
        .map(|info| filters.entry(dir, info, false))
        .collect();
    let mut others: Vec<FileEntry> = list(fs, other_dir, policy.include_directories)?
        .into_iter()
        .map(|info| filters.entry(other_dir, info, true))
        .collect();

    for entry in &mut entries {
        let key = entry.name.to_lowercase();
        if let Some(index) = others.iter().position(|o| o.name.to_lowercase() == key) {
            let other = others.remove(index);
            entry.overwrite = entry.modified > other.modified;
            entry.get_overwritten = other.modified > entry.modified;
            entry.has_other = true;
        }
    }
    entries.extend(others);

    match view {
        FileViewMode::All => {}
        FileViewMode::Excluded => entries.retain(|e| e.excluded),
        FileViewMode::Pending => retain_pending(&mut entries, side, policy),
    }

    Ok(entries)
}

fn retain_pending(entries: &mut Vec<FileEntry>, side: Side, policy: &DeploymentPolicy) {
    entries.retain(|e| !e.is_in_sync() && !e.excluded);

    let skip_newer_left = policy.newer_on_left == ExistingFileAction::Skip;
    let skip_newer_right = policy.newer_on_right == ExistingFileAction::Skip;
    let skip_left_only = policy.left_but_not_right == NonExistingFileAction::Skip;

    match side {
        Side::Left => entries.retain(|e| {
            !(skip_newer_left && e.overwrite)
                && !(skip_newer_right && e.get_overwritten)
                && !(skip_left_only && !e.has_other)
                // Nothing is ever copied right to left
                && !e.other
        }),
        Side::Right => entries.retain(|e| {
            !(skip_newer_right && e.overwrite)
                && !(skip_newer_left && e.get_overwritten)
                && !(skip_left_only && e.other)
                // Destination-only entries are never copied back
                && (e.has_other || e.other)
        }),
    }
}
