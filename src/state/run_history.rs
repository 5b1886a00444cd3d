//! 运行历史
//!
//! Finished runs, newest first, capped in size.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::env::constants::MAX_RUN_HISTORY;
use crate::domain::{DeployOutcome, RunSummary};

/// One finished run
#[derive(Clone, Debug, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub item_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: DeployOutcome,
    pub files_copied: usize,
    pub error_count: usize,
}

impl RunRecord {
    pub fn new(
        run_id: Uuid,
        item_name: impl Into<String>,
        started_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Self {
        Self {
            run_id,
            item_name: item_name.into(),
            started_at,
            finished_at: Utc::now(),
            outcome: summary.outcome(),
            files_copied: summary.files_copied(),
            error_count: summary.error_count(),
        }
    }
}

/// 历史记录存储
pub struct RunHistory {
    records: RwLock<VecDeque<RunRecord>>,
    max_records: usize,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RUN_HISTORY)
    }

    pub fn with_capacity(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records,
        }
    }

    /// 添加记录
    pub async fn push(&self, record: RunRecord) {
        let mut records = self.records.write().await;
        records.push_front(record);

        while records.len() > self.max_records {
            records.pop_back();
        }
    }

    /// Newest first, optionally only one configuration's runs
    pub async fn list(&self, limit: usize, item_name: Option<&str>) -> Vec<RunRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| item_name.map_or(true, |n| r.item_name.eq_ignore_ascii_case(n)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get(&self, run_id: Uuid) -> Option<RunRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.run_id == run_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeployReport;

    fn record(name: &str) -> RunRecord {
        let mut summary = RunSummary::default();
        let mut report = DeployReport::new(name);
        report.files_copied = 3;
        summary.push(report);
        RunRecord::new(Uuid::new_v4(), name, Utc::now(), &summary)
    }

    #[tokio::test]
    async fn test_newest_first_and_filtered() {
        let history = RunHistory::new();
        history.push(record("web")).await;
        history.push(record("api")).await;
        history.push(record("Web")).await;

        let all = history.list(10, None).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].item_name, "Web");
        assert_eq!(all[0].files_copied, 3);
        assert_eq!(all[0].outcome, DeployOutcome::NoErrors);

        let web = history.list(10, Some("web")).await;
        assert_eq!(web.len(), 2);

        let id = all[1].run_id;
        assert_eq!(history.get(id).await.unwrap().item_name, "api");
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let history = RunHistory::with_capacity(5);
        for i in 0..8 {
            history.push(record(&format!("item-{i}"))).await;
        }
        assert_eq!(history.len().await, 5);
        let records = history.list(10, None).await;
        assert_eq!(records[0].item_name, "item-7");
        assert_eq!(records[4].item_name, "item-3");
    }
}
