//! 锁定资源处理
//!
//! Frees a destination file held open by running processes, according to the
//! item's locked-file action:
//!
//! - `Skip` leaves the file alone.
//! - `WaitForLockingProcesses` polls until every holder has exited.
//! - `StopLockingProcesses` stops the owning service (dependents first) or
//!   kills a plain process, then waits for the holder to go away.
//!
//! Only cancellation aborts; every other failure becomes an [`ErrorReport`]
//! and resolution carries on.

use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::context::DeployContext;
use crate::domain::{DeploymentPolicy, ErrorReport, LockedFileAction, StopServiceMethod};
use crate::error::{DeployError, DeployResult};
use crate::infra::{ProcessControl, ProcessHandle, ServiceHandle, ServiceStatus};
use crate::services::wait::{wait_until, WaitOutcome};

/// Result of resolving one destination file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockResolution {
    /// Nothing holds the file (any more); go ahead and copy
    Unlocked,
    /// Locked and the policy says skip
    Skipped,
    /// The run was cancelled while waiting
    Cancelled,
}

/// Cancellation marker for the recursive stop
#[derive(Debug)]
struct Cancelled;

/// What was stopped to free one file
#[derive(Clone, Default)]
pub struct LockedResourceChain {
    /// Stop order: dependents before the services they depend on
    pub services: Vec<Arc<dyn ServiceHandle>>,
    pub killed_processes: Vec<PathBuf>,
    pub errors: Vec<ErrorReport>,
}

impl LockedResourceChain {
    fn report(&mut self, ctx: &DeployContext, report: ErrorReport) {
        ctx.error(report.clone());
        self.errors.push(report);
    }

    fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name()).collect()
    }
}

/// Everything stopped during a run, for the restart phase
#[derive(Clone, Default)]
pub struct StoppedResources {
    services: Vec<Arc<dyn ServiceHandle>>,
    killed_processes: Vec<PathBuf>,
}

impl StoppedResources {
    pub fn merge(&mut self, chain: &LockedResourceChain) {
        for service in &chain.services {
            let name = service.name();
            if !self.services.iter().any(|s| s.name().eq_ignore_ascii_case(&name)) {
                self.services.push(service.clone());
            }
        }
        for path in &chain.killed_processes {
            if !self.killed_processes.contains(path) {
                self.killed_processes.push(path.clone());
            }
        }
    }

    /// Names in stop order
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Reverse of the stop order: every service starts before its dependents
    pub fn restart_order(&self) -> impl Iterator<Item = &Arc<dyn ServiceHandle>> {
        self.services.iter().rev()
    }

    pub fn killed_processes(&self) -> &[PathBuf] {
        &self.killed_processes
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.killed_processes.is_empty()
    }
}

/// Services stopped by one recursive call, in stop order. A cancelled tree
/// still lists everything it stopped before the cancel.
#[derive(Default)]
struct StopTree {
    stopped: Vec<Arc<dyn ServiceHandle>>,
    visited: Vec<String>,
    errors: Vec<ErrorReport>,
    cancelled: bool,
}

impl StopTree {
    fn absorb(&mut self, other: StopTree) {
        self.stopped.extend(other.stopped);
        self.visited.extend(other.visited);
        self.errors.extend(other.errors);
        self.cancelled |= other.cancelled;
    }

    fn has_visited(&self, name: &str) -> bool {
        self.visited.iter().any(|v| v.eq_ignore_ascii_case(name))
    }
}

/// 锁定资源解析器
pub struct LockResolver<'a> {
    platform: Arc<dyn ProcessControl>,
    ctx: &'a DeployContext,
    policy: &'a DeploymentPolicy,
    poll_interval: Duration,
    stop_timeout: Duration,
}

impl<'a> LockResolver<'a> {
    pub fn new(
        platform: Arc<dyn ProcessControl>,
        ctx: &'a DeployContext,
        policy: &'a DeploymentPolicy,
        poll_interval: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            ctx,
            policy,
            poll_interval,
            stop_timeout,
        }
    }

    /// Make `destination` writable, or decide to skip it
    pub async fn resolve(&self, destination: &Path) -> (LockResolution, LockedResourceChain) {
        let mut chain = LockedResourceChain::default();

        let lockers = match self.find_lockers(destination).await {
            Ok(lockers) => lockers,
            Err(e) => {
                // The copy itself will surface a real lock
                chain.report(
                    self.ctx,
                    ErrorReport::new(
                        format!("Failed to find processes locking {}", destination.display()),
                        e,
                    ),
                );
                return (LockResolution::Unlocked, chain);
            }
        };
        if lockers.is_empty() {
            return (LockResolution::Unlocked, chain);
        }

        let holders = lockers
            .iter()
            .map(|p| format!("{} ({})", p.name(), p.pid()))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            path = %destination.display(),
            holders = %holders,
            action = ?self.policy.locked_file_action,
            "Destination file is locked"
        );

        let resolution = match self.policy.locked_file_action {
            LockedFileAction::Skip => {
                self.ctx.progress(
                    "Skipping locked file",
                    format!("{} is locked by {}", destination.display(), holders),
                );
                LockResolution::Skipped
            }
            LockedFileAction::WaitForLockingProcesses => {
                let mut resolution = LockResolution::Unlocked;
                for process in &lockers {
                    self.ctx.progress(
                        "Waiting for locking process",
                        format!("Waiting for {} ({}) to exit", process.name(), process.pid()),
                    );
                    if self.wait_for_exit(process.as_ref(), None).await.is_err() {
                        resolution = LockResolution::Cancelled;
                        break;
                    }
                }
                resolution
            }
            LockedFileAction::StopLockingProcesses => {
                let mut resolution = LockResolution::Unlocked;
                for process in &lockers {
                    if self.stop_locker(process.clone(), &mut chain).await.is_err() {
                        resolution = LockResolution::Cancelled;
                        break;
                    }
                }
                resolution
            }
        };

        (resolution, chain)
    }

    /// The process table scan blocks, so it runs off the async workers
    async fn find_lockers(&self, destination: &Path) -> DeployResult<Vec<Arc<dyn ProcessHandle>>> {
        let platform = self.platform.clone();
        let target = destination.to_path_buf();
        tokio::task::spawn_blocking(move || platform.processes_locking_file(&target))
            .await
            .map_err(|e| DeployError::platform(format!("Lock query task failed: {}", e)))?
    }

    async fn stop_locker(
        &self,
        process: Arc<dyn ProcessHandle>,
        chain: &mut LockedResourceChain,
    ) -> Result<(), Cancelled> {
        if process.has_exited() {
            return Ok(());
        }

        match self.platform.service_for_process(process.as_ref()) {
            Some(service) => {
                let tree = self.stop_service_tree(service, chain.service_names()).await;
                let cancelled = tree.cancelled;
                chain.errors.extend(tree.errors);
                chain.services.extend(tree.stopped);
                if cancelled {
                    return Err(Cancelled);
                }
            }
            None => {
                let path = process.main_module_path();
                self.ctx.progress(
                    "Killing process",
                    format!("Killing {} ({})", process.name(), process.pid()),
                );
                if let Err(e) = process.kill() {
                    chain.report(
                        self.ctx,
                        ErrorReport::new(
                            format!("Failed to kill process {} ({})", process.name(), process.pid()),
                            e,
                        ),
                    );
                    return Ok(());
                }
                match path {
                    Some(path) => {
                        if !chain.killed_processes.contains(&path) {
                            chain.killed_processes.push(path);
                        }
                    }
                    None => tracing::warn!(
                        pid = process.pid(),
                        "Killed process has no executable path, it will not be relaunched"
                    ),
                }
            }
        }

        self.wait_for_exit(process.as_ref(), Some(self.stop_timeout)).await
    }

    /// Stop `service` after every service that depends on it.
    ///
    /// Returns the services this call stopped, in stop order. `visited` holds
    /// the names already handled higher up or by earlier siblings. On
    /// cancellation the tree comes back early with `cancelled` set.
    fn stop_service_tree<'s>(
        &'s self,
        service: Arc<dyn ServiceHandle>,
        visited: Vec<String>,
    ) -> BoxFuture<'s, StopTree> {
        async move {
            let name = service.name();
            let mut tree = StopTree {
                visited,
                ..Default::default()
            };
            tree.visited.push(name.clone());

            let dependents = match service.dependents() {
                Ok(dependents) => dependents,
                Err(e) => {
                    let report =
                        ErrorReport::new(format!("Failed to list services depending on {}", name), e);
                    self.ctx.error(report.clone());
                    tree.errors.push(report);
                    Vec::new()
                }
            };

            for dependent in dependents {
                if tree.has_visited(&dependent.name()) {
                    continue;
                }
                let subtree = self
                    .stop_service_tree(dependent, tree.visited.clone())
                    .await;
                // The subtree's visited list already starts with ours
                tree.visited = Vec::new();
                tree.absorb(subtree);
                if tree.cancelled {
                    return tree;
                }
            }

            if self.ctx.is_cancelled() {
                tree.cancelled = true;
                return tree;
            }

            if let Err(e) = service.refresh() {
                tracing::debug!(service = %name, error = %e, "Failed to refresh service status");
            }
            match service.status() {
                ServiceStatus::Stopped => {}
                ServiceStatus::StopPending => {
                    // Someone else is stopping it; not ours to restart
                    if self
                        .wait_for_service_stopped(service.as_ref(), &mut tree)
                        .await
                        .is_err()
                    {
                        tree.cancelled = true;
                    }
                }
                _ => match self.stop_service(service.as_ref(), &mut tree).await {
                    Ok(true) => tree.stopped.push(service),
                    Ok(false) => {}
                    // The stop request went out before the cancel
                    Err(Cancelled) => {
                        tree.stopped.push(service);
                        tree.cancelled = true;
                    }
                },
            }

            tree
        }
        .boxed()
    }

    /// Stop one service with the configured method. Ok(true) once it was
    /// asked to stop successfully; `Cancelled` only comes from the wait that
    /// follows a successful request.
    async fn stop_service(
        &self,
        service: &dyn ServiceHandle,
        tree: &mut StopTree,
    ) -> Result<bool, Cancelled> {
        if self.policy.stop_method == StopServiceMethod::Kill {
            if let Some(process) = self.platform.process_for_service(service) {
                self.ctx.progress(
                    "Killing service",
                    format!("Killing process {} of service {}", process.pid(), service.display_name()),
                );
                if let Err(e) = process.kill() {
                    let report =
                        ErrorReport::new(format!("Failed to kill service {}", service.name()), e);
                    self.ctx.error(report.clone());
                    tree.errors.push(report);
                    return Ok(false);
                }
                self.wait_for_exit(process.as_ref(), Some(self.stop_timeout))
                    .await?;
                return Ok(true);
            }
            tracing::debug!(
                service = %service.name(),
                "No process found for service, stopping it gracefully instead"
            );
        }

        self.ctx.progress(
            "Stopping service",
            format!("Stopping {}", service.display_name()),
        );
        if let Err(e) = service.stop() {
            let report = ErrorReport::new(format!("Failed to stop service {}", service.name()), e);
            self.ctx.error(report.clone());
            tree.errors.push(report);
            return Ok(false);
        }
        self.wait_for_service_stopped(service, tree).await?;
        Ok(true)
    }

    async fn wait_for_service_stopped(
        &self,
        service: &dyn ServiceHandle,
        tree: &mut StopTree,
    ) -> Result<(), Cancelled> {
        let outcome = wait_until(
            || {
                let _ = service.refresh();
                service.status() == ServiceStatus::Stopped
            },
            self.poll_interval,
            Some(self.stop_timeout),
            &self.ctx.cancel_token,
        )
        .await;

        match outcome {
            WaitOutcome::Satisfied => Ok(()),
            WaitOutcome::Cancelled => Err(Cancelled),
            WaitOutcome::TimedOut => {
                let report = ErrorReport::new(
                    format!("Service {} did not stop", service.name()),
                    format!("still {} after {:?}", service.status().as_str(), self.stop_timeout),
                );
                self.ctx.error(report.clone());
                tree.errors.push(report);
                Ok(())
            }
        }
    }

    /// Wait for a process to exit. A timeout is only logged: the copy that
    /// follows reports the real failure if the file is still held.
    async fn wait_for_exit(
        &self,
        process: &dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<(), Cancelled> {
        match wait_until(
            || process.has_exited(),
            self.poll_interval,
            timeout,
            &self.ctx.cancel_token,
        )
        .await
        {
            WaitOutcome::Satisfied => Ok(()),
            WaitOutcome::Cancelled => Err(Cancelled),
            WaitOutcome::TimedOut => {
                tracing::warn!(pid = process.pid(), name = %process.name(), "Process did not exit in time");
                Ok(())
            }
        }
    }
}
