//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio

pub mod configuration;
pub mod deployment;
pub mod file_entry;
pub mod path_variable;
pub mod policy;
pub mod settings;

// Re-exports for convenience
pub use configuration::{Configuration, ConfigurationItem, DirectoryPairing, LoadMode};
pub use deployment::{
    DeployEvent, DeployOutcome, DeployProgress, DeployReport, DeploymentItem, ErrorReport,
    FileCopyPair, RunSummary,
};
pub use file_entry::FileEntry;
pub use path_variable::{resolve_path, PathVariable, PossibleValue};
pub use policy::{
    DeploymentPolicy, ExistingFileAction, FileViewMode, LockedFileAction, NonExistingFileAction,
    OptionalSetting, PatternList, StopServiceMethod,
};
pub use settings::{SettingDescriptor, SettingKey, SettingKind, SettingsGroup};
