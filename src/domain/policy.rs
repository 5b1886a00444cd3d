//! 部署策略
//!
//! Copy-decision knobs for one configuration item, plus the compiled wildcard
//! lists used by the diff engine.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What to do with a file that exists on the left but not on the right
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NonExistingFileAction {
    #[default]
    Skip,
    Copy,
}

/// What to do with a file that exists on both sides and is newer on one of them
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExistingFileAction {
    #[default]
    Skip,
    Replace,
}

/// What to do when the destination file is held open by a process
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockedFileAction {
    #[default]
    StopLockingProcesses,
    WaitForLockingProcesses,
    Skip,
}

/// How a locking service gets stopped
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopServiceMethod {
    #[default]
    ShutdownGracefully,
    Kill,
}

/// Which entries a file listing shows
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileViewMode {
    #[default]
    All,
    Pending,
    Excluded,
}

impl FileViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileViewMode::All => "all",
            FileViewMode::Pending => "pending",
            FileViewMode::Excluded => "excluded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Some(FileViewMode::All),
            "pending" => Some(FileViewMode::Pending),
            "excluded" => Some(FileViewMode::Excluded),
            _ => None,
        }
    }
}

/// A setting that only takes effect once the user opts into it
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionalSetting<T> {
    #[serde(default)]
    pub selected: bool,
    pub value: T,
}

impl<T> OptionalSetting<T> {
    /// The value, but only while the option is selected
    pub fn active(&self) -> Option<&T> {
        self.selected.then_some(&self.value)
    }
}

/// Copy policy for one configuration item
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeploymentPolicy {
    pub enabled: bool,
    /// Also consider immediate subdirectories (copied recursively)
    pub include_directories: bool,
    pub left_but_not_right: NonExistingFileAction,
    pub newer_on_left: ExistingFileAction,
    pub newer_on_right: ExistingFileAction,
    pub locked_file_action: LockedFileAction,
    pub stop_method: StopServiceMethod,
    /// Restart stopped services and relaunch killed processes after copying
    pub restart_stopped_processes: bool,
    /// One wildcard per line
    pub exclusions: String,
    /// One wildcard per line; when non-empty only matching entries are deployed
    pub inclusions: String,
    pub view_mode: FileViewMode,
    pub next_configuration: OptionalSetting<Option<Uuid>>,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            include_directories: false,
            left_but_not_right: NonExistingFileAction::Skip,
            newer_on_left: ExistingFileAction::Replace,
            newer_on_right: ExistingFileAction::Skip,
            locked_file_action: LockedFileAction::StopLockingProcesses,
            stop_method: StopServiceMethod::ShutdownGracefully,
            restart_stopped_processes: true,
            exclusions: String::new(),
            inclusions: String::new(),
            view_mode: FileViewMode::All,
            next_configuration: OptionalSetting::default(),
        }
    }
}

impl DeploymentPolicy {
    pub fn exclusion_patterns(&self) -> PatternList {
        PatternList::parse(&self.exclusions)
    }

    pub fn inclusion_patterns(&self) -> PatternList {
        PatternList::parse(&self.inclusions)
    }

    /// The chained configuration, if the option is selected and points somewhere
    pub fn next_configuration(&self) -> Option<Uuid> {
        self.next_configuration.active().copied().flatten()
    }
}

/// Case-insensitive wildcard list
#[derive(Clone, Debug, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl PatternList {
    /// Parse a line-delimited list (`\n`, `\r\n` or `\r`), dropping empty lines
    pub fn parse(text: &str) -> Self {
        let patterns = text
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .filter_map(|line| match Pattern::new(line) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %line, error = %e, "Ignoring invalid wildcard pattern");
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(name, MATCH_OPTIONS))
    }
}
