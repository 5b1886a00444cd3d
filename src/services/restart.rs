//! 重启阶段
//!
//! After the copy loop: start every service the run stopped (each before its
//! dependents) and relaunch killed processes from their executable paths.
//! Relaunch is best-effort; arguments of the original process are not known.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ErrorReport;
use crate::error::DeployError;
use crate::infra::{ProcessControl, ServiceHandle, ServiceStatus};
use crate::services::deploy::context::DeployContext;
use crate::services::deploy::locks::StoppedResources;
use crate::services::wait::{wait_until, WaitOutcome};

/// 重启错误类型
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("Failed to start service {name}: {source}")]
    ServiceStart {
        name: String,
        #[source]
        source: DeployError,
    },

    #[error("Service {name} did not reach the running state within {timeout:?}")]
    ServiceTimeout { name: String, timeout: Duration },

    #[error("Failed to relaunch {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: DeployError,
    },
}

impl RestartError {
    fn into_report(self) -> ErrorReport {
        let details = match &self {
            RestartError::ServiceStart { name, .. } | RestartError::ServiceTimeout { name, .. } => {
                format!("Restart service {}", name)
            }
            RestartError::Launch { path, .. } => format!("Relaunch {}", path.display()),
        };
        ErrorReport::new(details, self)
    }
}

/// 重启管理器
pub struct RestartManager<'a> {
    platform: &'a dyn ProcessControl,
    ctx: &'a DeployContext,
    poll_interval: Duration,
    start_timeout: Duration,
}

impl<'a> RestartManager<'a> {
    pub fn new(
        platform: &'a dyn ProcessControl,
        ctx: &'a DeployContext,
        poll_interval: Duration,
        start_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            ctx,
            poll_interval,
            start_timeout,
        }
    }

    /// Restart everything in `stopped`; returns the (non-fatal) failures
    pub async fn restart(&self, stopped: &StoppedResources) -> Vec<ErrorReport> {
        let mut errors = Vec::new();

        for service in stopped.restart_order() {
            if self.ctx.is_cancelled() {
                tracing::info!("Restart phase cancelled, leaving remaining services stopped");
                return errors;
            }
            if let Err(e) = self.start_service(service.as_ref()).await {
                let report = e.into_report();
                self.ctx.error(report.clone());
                errors.push(report);
            }
        }

        for path in stopped.killed_processes() {
            if self.ctx.is_cancelled() {
                tracing::info!("Restart phase cancelled, leaving remaining processes stopped");
                return errors;
            }
            self.ctx
                .progress("Restarting process", format!("Starting {}", path.display()));
            if let Err(source) = self.platform.launch(path) {
                let report = RestartError::Launch {
                    path: path.clone(),
                    source,
                }
                .into_report();
                self.ctx.error(report.clone());
                errors.push(report);
            }
        }

        errors
    }

    /// Start a service unless someone else already has
    async fn start_service(&self, service: &dyn ServiceHandle) -> Result<(), RestartError> {
        let name = service.name();
        if let Err(e) = service.refresh() {
            tracing::debug!(service = %name, error = %e, "Failed to refresh service status");
        }
        if service.status() != ServiceStatus::Stopped {
            tracing::info!(service = %name, status = service.status().as_str(), "Service already restarted");
            return Ok(());
        }

        self.ctx.progress(
            "Restarting service",
            format!("Starting {}", service.display_name()),
        );
        service
            .start()
            .map_err(|source| RestartError::ServiceStart {
                name: name.clone(),
                source,
            })?;

        let outcome = wait_until(
            || {
                let _ = service.refresh();
                service.status() == ServiceStatus::Running
            },
            self.poll_interval,
            Some(self.start_timeout),
            &self.ctx.cancel_token,
        )
        .await;

        match outcome {
            WaitOutcome::TimedOut => Err(RestartError::ServiceTimeout {
                name,
                timeout: self.start_timeout,
            }),
            WaitOutcome::Satisfied | WaitOutcome::Cancelled => Ok(()),
        }
    }
}
