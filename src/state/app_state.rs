//! 应用状态

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::env::EnvConfig;
use crate::domain::RunSummary;
use crate::error::{DeployError, DeployResult};
use crate::services::deploy::DeployContext;

use super::run_history::{RunHistory, RunRecord};

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 运行中的部署信息
pub struct RunningDeploy {
    pub run_id: Uuid,
    pub item_name: String,
    pub started_at: DateTime<Utc>,
    pub cancel_token: CancellationToken,
}

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 启动时间
    pub started_at: DateTime<Utc>,
    /// The one active deployment, if any
    running: RwLock<Option<RunningDeploy>>,
    /// 历史记录
    pub history: RunHistory,
}

impl AppState {
    pub fn new(config: EnvConfig) -> Self {
        tracing::info!(
            config_path = %config.config_path.display(),
            poll_interval_ms = config.poll_interval_ms,
            delete_timeout_secs = config.delete_timeout_secs,
            stop_timeout_secs = config.stop_timeout_secs,
            "Loaded configuration"
        );

        Self {
            config,
            started_at: Utc::now(),
            running: RwLock::new(None),
            history: RunHistory::new(),
        }
    }

    /// Register a new run. Fails with [`DeployError::AlreadyRunning`] while
    /// another one is active.
    ///
    /// The run's token is a child of the global shutdown token, so a shutdown
    /// cancels it too.
    pub async fn begin_run(&self, item_name: &str) -> DeployResult<DeployContext> {
        let mut running = self.running.write().await;
        if let Some(active) = running.as_ref() {
            tracing::warn!(
                active_run = %active.run_id,
                active_item = %active.item_name,
                requested = %item_name,
                "Deployment rejected, another run is active"
            );
            return Err(DeployError::AlreadyRunning);
        }

        let cancel_token = get_shutdown_token().child_token();
        let ctx = DeployContext::new(cancel_token.clone());
        *running = Some(RunningDeploy {
            run_id: ctx.run_id,
            item_name: item_name.to_string(),
            started_at: Utc::now(),
            cancel_token,
        });
        Ok(ctx)
    }

    /// Unregister the active run and keep its record
    pub async fn finish_run(&self, run_id: Uuid, summary: &RunSummary) {
        let finished = {
            let mut running = self.running.write().await;
            match running.as_ref() {
                Some(active) if active.run_id == run_id => running.take(),
                _ => None,
            }
        };

        match finished {
            Some(run) => {
                let record = RunRecord::new(run.run_id, run.item_name, run.started_at, summary);
                tracing::info!(
                    run_id = %record.run_id,
                    item = %record.item_name,
                    outcome = record.outcome.as_str(),
                    "Run finished"
                );
                self.history.push(record).await;
            }
            None => tracing::warn!(run_id = %run_id, "Finished run was not registered"),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.read().await.is_some()
    }

    /// (run id, configuration name) of the active run
    pub async fn running_run(&self) -> Option<(Uuid, String)> {
        let running = self.running.read().await;
        running.as_ref().map(|r| (r.run_id, r.item_name.clone()))
    }

    /// 取消当前部署
    pub async fn cancel_run(&self) -> bool {
        let running = self.running.read().await;
        match running.as_ref() {
            Some(run) => {
                tracing::info!(run_id = %run.run_id, item = %run.item_name, "Cancelling run");
                run.cancel_token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(EnvConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeployReport;

    #[tokio::test]
    async fn test_single_active_run() {
        let state = AppState::default();
        let ctx = state.begin_run("web").await.unwrap();
        assert!(state.is_running().await);

        let second = state.begin_run("api").await;
        assert!(matches!(second, Err(DeployError::AlreadyRunning)));

        state.finish_run(ctx.run_id, &RunSummary::default()).await;
        assert!(!state.is_running().await);
        assert!(state.begin_run("api").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_reaches_run_context() {
        let state = AppState::default();
        assert!(!state.cancel_run().await);

        let ctx = state.begin_run("web").await.unwrap();
        assert_eq!(state.running_run().await, Some((ctx.run_id, "web".to_string())));
        assert!(state.cancel_run().await);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_finish_records_history() {
        let state = AppState::default();
        let ctx = state.begin_run("web").await.unwrap();

        let mut summary = RunSummary::default();
        let mut report = DeployReport::new("web");
        report.files_copied = 2;
        summary.push(report);
        state.finish_run(ctx.run_id, &summary).await;

        let history = state.history.list(10, None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].run_id, ctx.run_id);
        assert_eq!(history[0].files_copied, 2);
    }

    #[tokio::test]
    async fn test_finishing_unknown_run_keeps_active_one() {
        let state = AppState::default();
        let _ctx = state.begin_run("web").await.unwrap();
        state.finish_run(Uuid::new_v4(), &RunSummary::default()).await;
        assert!(state.is_running().await);
    }
}
