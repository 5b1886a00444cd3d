//! 运行时状态模块
//!
//! 当前运行、运行历史与文件视图

pub mod app_state;
pub mod file_view;
pub mod run_history;

pub use app_state::{get_shutdown_token, trigger_shutdown, AppState};
pub use file_view::{FileView, FileViewSnapshot, RefreshOutcome};
pub use run_history::{RunHistory, RunRecord};
