//! 部署服务模块
//!
//! `prepare` turns a configuration item into an immutable [`DeploymentItem`]
//! from the pending diff of each of its directory pairings; `deploy` copies it
//! file by file (resolving locks on the way) and then restarts what it
//! stopped; `deploy_chain` follows "next configuration" links.

pub mod context;
pub mod copy;
pub mod locks;

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::EnvConfig;
use crate::domain::{
    Configuration, DeployReport, DeploymentItem, ErrorReport, FileCopyPair, FileViewMode,
    RunSummary,
};
use crate::error::{DeployError, DeployResult};
use crate::infra::{FileSystem, LocalFileSystem, ProcessControl, SystemProcessControl};
use crate::services::diff::{diff, Side};
use crate::services::restart::RestartManager;

pub use context::DeployContext;
pub use locks::{LockResolution, LockResolver, LockedResourceChain, StoppedResources};

/// Timing knobs of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploySettings {
    pub poll_interval: Duration,
    /// Upper bound for deleting one destination entry
    pub delete_timeout: Duration,
    /// Upper bound for a service to stop/start or a killed process to exit
    pub stop_timeout: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self::from(&EnvConfig::default())
    }
}

impl From<&EnvConfig> for DeploySettings {
    fn from(config: &EnvConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            delete_timeout: config.delete_timeout(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// 部署引擎
pub struct Deployer {
    fs: Arc<dyn FileSystem>,
    platform: Arc<dyn ProcessControl>,
    settings: DeploySettings,
}

impl Deployer {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        platform: Arc<dyn ProcessControl>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            fs,
            platform,
            settings,
        }
    }

    /// Local file system and OS process table
    pub fn local(settings: DeploySettings) -> Self {
        Self::new(
            Arc::new(LocalFileSystem::new()),
            Arc::new(SystemProcessControl::new()),
            settings,
        )
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Snapshot the pending copies of one configuration item
    pub async fn prepare(&self, config: &Configuration, item_id: Uuid) -> DeployResult<DeploymentItem> {
        let item = config
            .item(item_id)
            .ok_or_else(|| DeployError::ConfigurationNotFound(item_id.to_string()))?;

        let mut files = Vec::new();
        for pairing in item.pairings(&config.path_variables) {
            let fs = self.fs.clone();
            let policy = item.policy.clone();
            let left = pairing.left.clone();
            let right = pairing.right.clone();

            let entries = tokio::task::spawn_blocking(move || {
                diff(fs.as_ref(), &left, &right, Side::Left, &policy, FileViewMode::Pending)
            })
            .await
            .map_err(|e| DeployError::platform(format!("Diff task failed: {}", e)))??;

            tracing::debug!(
                left = %pairing.left.display(),
                right = %pairing.right.display(),
                pending = entries.len(),
                "Pairing diffed"
            );

            files.extend(entries.into_iter().map(|entry| FileCopyPair {
                is_directory: entry.is_directory,
                source: entry,
                destination_dir: pairing.right.clone(),
            }));
        }

        Ok(DeploymentItem {
            id: item.id,
            name: item.name.clone(),
            policy: item.policy.clone(),
            files,
            prepared_at: Utc::now(),
        })
    }

    /// Copy every pair of `item` in order.
    ///
    /// Per-file failures end up in the report; cancellation stops the loop and
    /// returns `Ok` with `cancelled` set, leaving stopped resources stopped.
    pub async fn deploy(&self, item: &DeploymentItem, ctx: &DeployContext) -> DeployResult<DeployReport> {
        let mut report = DeployReport::new(&item.name);
        let mut stopped = StoppedResources::default();
        let total = item.files.len();

        tracing::info!(run_id = %ctx.run_id, item = %item.name, files = total, "Starting deployment");
        if total == 0 {
            ctx.progress("Nothing to deploy", item.name.clone());
        }

        let resolver = LockResolver::new(
            self.platform.clone(),
            ctx,
            &item.policy,
            self.settings.poll_interval,
            self.settings.stop_timeout,
        );

        for (index, pair) in item.files.iter().enumerate() {
            if ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let destination = pair.destination_path();
            let percent = (index + 1) as f64 / total as f64 * 100.0;
            ctx.progress_percent(
                "Deploying",
                format!(
                    "{} \u{2192} {}",
                    pair.source.full_path.display(),
                    pair.destination_dir.display()
                ),
                percent,
            );

            if !pair.is_directory && self.fs.file_exists(&destination) {
                if self.fs.is_remote_path(&destination) {
                    ctx.progress(
                        "Checking locks",
                        format!(
                            "{} is on a network share; processes on the remote host cannot be detected",
                            destination.display()
                        ),
                    );
                }

                let (resolution, chain) = resolver.resolve(&destination).await;
                report.errors.extend(chain.errors.iter().cloned());
                stopped.merge(&chain);

                match resolution {
                    LockResolution::Unlocked => {}
                    LockResolution::Skipped => {
                        report.files_skipped += 1;
                        continue;
                    }
                    LockResolution::Cancelled => {
                        report.cancelled = true;
                        break;
                    }
                }
            }

            match copy::copy_entry(
                self.fs.clone(),
                pair,
                self.settings.poll_interval,
                self.settings.delete_timeout,
                &ctx.cancel_token,
            )
            .await
            {
                Ok(()) => report.files_copied += 1,
                Err(DeployError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    let error = ErrorReport::new(
                        format!(
                            "Failed to copy {} to {}",
                            pair.source.full_path.display(),
                            pair.destination_dir.display()
                        ),
                        e,
                    );
                    ctx.error(error.clone());
                    report.errors.push(error);
                }
            }
        }

        report.stopped_services = stopped.service_names();
        report.killed_processes = stopped.killed_processes().to_vec();

        if report.cancelled {
            tracing::warn!(run_id = %ctx.run_id, item = %item.name, "Deployment cancelled");
            return Ok(report);
        }

        if item.policy.restart_stopped_processes && !stopped.is_empty() {
            let restart = RestartManager::new(
                self.platform.as_ref(),
                ctx,
                self.settings.poll_interval,
                self.settings.stop_timeout,
            );
            report.errors.extend(restart.restart(&stopped).await);
        }

        tracing::info!(
            run_id = %ctx.run_id,
            item = %item.name,
            copied = report.files_copied,
            skipped = report.files_skipped,
            errors = report.error_count(),
            "Deployment finished"
        );
        Ok(report)
    }

    /// Deploy `start_id`, then every configuration it chains to.
    ///
    /// Stops at the end of the chain, on cancellation, on an unknown link, and
    /// on a link back to a configuration already deployed in this chain.
    pub async fn deploy_chain(
        &self,
        config: &Configuration,
        start_id: Uuid,
        ctx: &DeployContext,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut deployed: HashSet<Uuid> = HashSet::new();
        let mut next = Some(start_id);

        while let Some(id) = next.take() {
            if ctx.is_cancelled() {
                summary.abort(DeployError::Cancelled.to_string());
                break;
            }
            if !deployed.insert(id) {
                tracing::warn!(item = %id, "Configuration chain loops back, stopping");
                break;
            }

            let item = match self.prepare(config, id).await {
                Ok(item) => item,
                Err(e) => {
                    tracing::error!(item = %id, error = %e, "Failed to prepare deployment");
                    summary.abort(e.to_string());
                    break;
                }
            };

            let report = match self.deploy(&item, ctx).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(item = %item.name, error = %e, "Deployment failed");
                    summary.abort(e.to_string());
                    break;
                }
            };
            let cancelled = report.cancelled;
            summary.push(report);
            if cancelled {
                break;
            }

            next = item.policy.next_configuration();
            if let Some(next_id) = next {
                match config.item(next_id) {
                    Some(next_item) => ctx.progress(
                        "Chaining",
                        format!("{} \u{2192} {}", item.name, next_item.name),
                    ),
                    None => {
                        tracing::warn!(item = %item.name, next = %next_id, "Chained configuration no longer exists");
                        next = None;
                    }
                }
            }
        }

        summary
    }
}
