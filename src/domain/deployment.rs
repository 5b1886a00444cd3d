//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use super::file_entry::FileEntry;
use super::policy::DeploymentPolicy;

/// One source entry and the directory it is copied into
#[derive(Clone, Debug, Serialize)]
pub struct FileCopyPair {
    pub source: FileEntry,
    pub destination_dir: PathBuf,
    pub is_directory: bool,
}

impl FileCopyPair {
    /// Full destination path (`destination_dir` joined with the source name)
    pub fn destination_path(&self) -> PathBuf {
        self.destination_dir.join(&self.source.name)
    }
}

/// 部署快照
///
/// Built once per run from the pending diff and never mutated afterwards.
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentItem {
    pub id: Uuid,
    pub name: String,
    pub policy: DeploymentPolicy,
    pub files: Vec<FileCopyPair>,
    pub prepared_at: DateTime<Utc>,
}

impl DeploymentItem {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Progress update for one step of a run
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DeployProgress {
    pub step: String,
    pub details: String,
    pub percent_complete: Option<f64>,
}

impl DeployProgress {
    pub fn new(step: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            details: details.into(),
            percent_complete: None,
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent_complete = Some(percent);
        self
    }
}

/// A recoverable per-file failure
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ErrorReport {
    pub details: String,
    pub cause: String,
}

impl ErrorReport {
    pub fn new(details: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            details: details.into(),
            cause: cause.to_string(),
        }
    }

    /// "details: cause", the line used in summaries
    pub fn summary_line(&self) -> String {
        format!("{}: {}", self.details, self.cause)
    }
}

/// 部署事件
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployEvent {
    Progress(DeployProgress),
    Error(ErrorReport),
}

/// Result of one `deploy` call
#[derive(Clone, Debug, Default, Serialize)]
pub struct DeployReport {
    pub item_name: String,
    pub files_copied: usize,
    pub files_skipped: usize,
    pub errors: Vec<ErrorReport>,
    /// Service names in the order they were stopped
    pub stopped_services: Vec<String>,
    /// Executable paths of killed plain processes
    pub killed_processes: Vec<PathBuf>,
    pub cancelled: bool,
}

impl DeployReport {
    pub fn new(item_name: impl Into<String>) -> Self {
        Self {
            item_name: item_name.into(),
            ..Default::default()
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// 运行结果
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeployOutcome {
    NoErrors,
    HandledErrors { count: usize, details: String },
    Aborted { reason: String },
}

impl DeployOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployOutcome::NoErrors => "no_errors",
            DeployOutcome::HandledErrors { .. } => "handled_errors",
            DeployOutcome::Aborted { .. } => "aborted",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeployOutcome::NoErrors)
    }
}

/// Aggregate over every run of a chain
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<DeployReport>,
    /// Set when the chain stopped on cancellation or an unhandled error
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn push(&mut self, report: DeployReport) {
        if report.cancelled && self.aborted.is_none() {
            self.aborted = Some("The operation was canceled".to_string());
        }
        self.reports.push(report);
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }

    pub fn error_count(&self) -> usize {
        self.reports.iter().map(|r| r.error_count()).sum()
    }

    pub fn files_copied(&self) -> usize {
        self.reports.iter().map(|r| r.files_copied).sum()
    }

    /// Every error line across the chain, one per line
    pub fn error_details(&self) -> String {
        self.reports
            .iter()
            .flat_map(|r| r.errors.iter())
            .map(|e| e.summary_line())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn outcome(&self) -> DeployOutcome {
        if let Some(reason) = &self.aborted {
            return DeployOutcome::Aborted {
                reason: reason.clone(),
            };
        }
        match self.error_count() {
            0 => DeployOutcome::NoErrors,
            count => DeployOutcome::HandledErrors {
                count,
                details: self.error_details(),
            },
        }
    }
}
