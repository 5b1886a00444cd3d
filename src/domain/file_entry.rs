//! 文件条目
//!
//! One filesystem object seen by the diff engine, with its diff-state flags.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A file or directory considered for copy
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub full_path: PathBuf,
    /// Unknown for directories
    pub size: Option<u64>,
    pub modified: DateTime<Utc>,
    pub is_directory: bool,
    /// Listed from the other side of the pairing
    pub other: bool,
    /// A same-named entry exists on the other side
    pub has_other: bool,
    /// Newer than the other side's entry
    pub overwrite: bool,
    /// Older than the other side's entry
    pub get_overwritten: bool,
    pub excluded: bool,
    /// Matched a non-empty inclusion list
    pub included: bool,
}

impl FileEntry {
    pub fn kind(&self) -> &'static str {
        if self.is_directory {
            "folder"
        } else {
            "file"
        }
    }

    /// Exists on both sides with identical timestamps
    pub fn is_in_sync(&self) -> bool {
        self.has_other && !(self.overwrite || self.get_overwritten)
    }

    /// Exists only on this side
    pub fn is_this_side_only(&self) -> bool {
        !self.other && !self.has_other
    }

    /// Human-readable summary, one fact per line
    pub fn description(&self) -> String {
        let mut lines = vec![format!("Full path: {}", self.full_path.display())];
        if let Some(size) = self.size {
            lines.push(format!("Size: {} bytes", size));
        }
        lines.push(format!(
            "Last modified at: {}",
            self.modified.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));

        let kind = self.kind();
        let state = if self.excluded {
            Some(format!("This {kind} matches an exclusion pattern."))
        } else if self.other {
            Some(format!("This {kind} exists on the other side only."))
        } else if self.overwrite {
            Some(format!("This {kind} is newer than the {kind} on the other side."))
        } else if self.get_overwritten {
            Some(format!("This {kind} is older than the {kind} on the other side."))
        } else {
            None
        };

        if let Some(state) = state {
            lines.push(String::new());
            lines.push(state);
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> FileEntry {
        FileEntry {
            name: "a.txt".to_string(),
            full_path: PathBuf::from("/src/a.txt"),
            size: Some(12),
            modified: Utc::now(),
            is_directory: false,
            other: false,
            has_other: false,
            overwrite: false,
            get_overwritten: false,
            excluded: false,
            included: false,
        }
    }

    #[test]
    fn test_in_sync_requires_match_and_equal_times() {
        let mut e = entry();
        assert!(!e.is_in_sync());
        e.has_other = true;
        assert!(e.is_in_sync());
        e.overwrite = true;
        assert!(!e.is_in_sync());
    }

    #[test]
    fn test_description_mentions_state() {
        let mut e = entry();
        e.has_other = true;
        e.overwrite = true;
        let text = e.description();
        assert!(text.contains("/src/a.txt"));
        assert!(text.contains("Size: 12 bytes"));
        assert!(text.contains("is newer than the file on the other side"));

        e.excluded = true;
        assert!(e.description().contains("exclusion pattern"));
    }
}
