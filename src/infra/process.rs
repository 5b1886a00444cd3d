//! 进程与服务控制能力
//!
//! Traits for the process/service operations the lock resolver needs, plus a
//! `sysinfo` backed implementation. Windows service control lives in
//! [`super::scm`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{DeployError, DeployResult};

/// Service state as reported by the service manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::StartPending => "start_pending",
            ServiceStatus::StopPending => "stop_pending",
            ServiceStatus::Running => "running",
            ServiceStatus::ContinuePending => "continue_pending",
            ServiceStatus::PausePending => "pause_pending",
            ServiceStatus::Paused => "paused",
        }
    }
}

/// A running (or recently running) OS process
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;

    fn name(&self) -> String;

    fn has_exited(&self) -> bool;

    fn kill(&self) -> DeployResult<()>;

    /// Executable image path, when it can be read
    fn main_module_path(&self) -> Option<PathBuf>;
}

/// A service registered with the OS service manager
pub trait ServiceHandle: Send + Sync {
    fn name(&self) -> String;

    fn display_name(&self) -> String;

    /// Status as of the last [`refresh`](Self::refresh)
    fn status(&self) -> ServiceStatus;

    fn refresh(&self) -> DeployResult<()>;

    /// Services that depend on this one
    fn dependents(&self) -> DeployResult<Vec<Arc<dyn ServiceHandle>>>;

    fn stop(&self) -> DeployResult<()>;

    fn start(&self) -> DeployResult<()>;
}

/// Platform process/service capabilities
pub trait ProcessControl: Send + Sync {
    /// Processes holding `path` open
    fn processes_locking_file(&self, path: &Path) -> DeployResult<Vec<Arc<dyn ProcessHandle>>>;

    /// The service hosted by `process`; None when it is a plain process or the
    /// lookup fails
    fn service_for_process(&self, process: &dyn ProcessHandle) -> Option<Arc<dyn ServiceHandle>>;

    fn process_for_service(&self, service: &dyn ServiceHandle) -> Option<Arc<dyn ProcessHandle>>;

    /// Start `executable` detached, with its own directory as working directory
    fn launch(&self, executable: &Path) -> DeployResult<()>;
}

/// `sysinfo` backed process handle
pub struct SystemProcess {
    pid: Pid,
    name: String,
    exe: Option<PathBuf>,
    system: Arc<Mutex<System>>,
}

impl SystemProcess {
    fn with_system<T>(&self, f: impl FnOnce(&mut System) -> T) -> DeployResult<T> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| DeployError::platform("process table lock poisoned"))?;
        Ok(f(&mut system))
    }
}

impl ProcessHandle for SystemProcess {
    fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_exited(&self) -> bool {
        self.with_system(|system| {
            system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
            system.process(self.pid).is_none()
        })
        .unwrap_or(true)
    }

    fn kill(&self) -> DeployResult<()> {
        let killed = self.with_system(|system| {
            system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
            // Already gone counts as killed
            system.process(self.pid).map(|p| p.kill()).unwrap_or(true)
        })?;

        if killed {
            Ok(())
        } else {
            Err(DeployError::platform(format!(
                "Failed to kill process {} ({})",
                self.name, self.pid
            )))
        }
    }

    fn main_module_path(&self) -> Option<PathBuf> {
        self.exe.clone()
    }
}

/// Default platform implementation
pub struct SystemProcessControl {
    system: Arc<Mutex<System>>,
}

impl Default for SystemProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcessControl {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    fn handle(&self, system: &System, pid: Pid) -> Option<Arc<dyn ProcessHandle>> {
        let process = system.process(pid)?;
        Some(Arc::new(SystemProcess {
            pid,
            name: process.name().to_string_lossy().to_string(),
            exe: process.exe().map(Path::to_path_buf),
            system: self.system.clone(),
        }))
    }
}

impl ProcessControl for SystemProcessControl {
    fn processes_locking_file(&self, path: &Path) -> DeployResult<Vec<Arc<dyn ProcessHandle>>> {
        let target = std::fs::canonicalize(path).map_err(|e| DeployError::io(path, e))?;

        let mut system = self
            .system
            .lock()
            .map_err(|_| DeployError::platform("process table lock poisoned"))?;
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut pids: Vec<Pid> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.exe().map(|exe| exe == target).unwrap_or(false))
            .map(|(pid, _)| *pid)
            .collect();

        for pid in open_handle_pids(&target) {
            let pid = Pid::from_u32(pid);
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }

        let own = std::process::id();
        Ok(pids
            .into_iter()
            .filter(|pid| pid.as_u32() != own)
            .filter_map(|pid| self.handle(&system, pid))
            .collect())
    }

    #[cfg(windows)]
    fn service_for_process(&self, process: &dyn ProcessHandle) -> Option<Arc<dyn ServiceHandle>> {
        super::scm::service_for_pid(process.pid())
    }

    #[cfg(not(windows))]
    fn service_for_process(&self, _process: &dyn ProcessHandle) -> Option<Arc<dyn ServiceHandle>> {
        None
    }

    #[cfg(windows)]
    fn process_for_service(&self, service: &dyn ServiceHandle) -> Option<Arc<dyn ProcessHandle>> {
        let pid = Pid::from_u32(super::scm::pid_for_service(&service.name())?);
        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.handle(&system, pid)
    }

    #[cfg(not(windows))]
    fn process_for_service(&self, _service: &dyn ServiceHandle) -> Option<Arc<dyn ProcessHandle>> {
        None
    }

    fn launch(&self, executable: &Path) -> DeployResult<()> {
        let mut command = std::process::Command::new(executable);
        if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        command
            .spawn()
            .map(|child| {
                tracing::info!(path = %executable.display(), pid = child.id(), "Relaunched process");
            })
            .map_err(|e| DeployError::io(executable, e))
    }
}

/// PIDs with an open descriptor on `target`, found through `/proc/<pid>/fd`.
/// Processes we may not inspect are skipped.
#[cfg(target_os = "linux")]
fn open_handle_pids(target: &Path) -> Vec<u32> {
    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut pids = Vec::new();
    for entry in proc_dir.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds = fds
            .flatten()
            .filter_map(|fd| std::fs::read_link(fd.path()).ok())
            .any(|link| link == target);
        if holds {
            pids.push(pid);
        }
    }
    pids
}

// Without an open-handle table only processes running the file itself are found
#[cfg(not(target_os = "linux"))]
fn open_handle_pids(_target: &Path) -> Vec<u32> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unlocked_file_has_no_lockers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("free.txt");
        std::fs::write(&path, "x").unwrap();

        let lockers = SystemProcessControl::new()
            .processes_locking_file(&path)
            .unwrap();
        assert!(lockers.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = SystemProcessControl::new().processes_locking_file(&dir.path().join("none"));
        assert!(matches!(result, Err(DeployError::Io { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_handle_scan_sees_child_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("held.log");
        std::fs::write(&path, "x").unwrap();

        // `tail -f` keeps the file open until killed
        let mut child = std::process::Command::new("tail")
            .arg("-f")
            .arg(&path)
            .spawn()
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));

        let control = SystemProcessControl::new();
        let lockers = control.processes_locking_file(&path).unwrap();
        let locker = lockers.iter().find(|p| p.pid() == child.id());
        assert!(locker.is_some());

        let locker = locker.unwrap();
        locker.kill().unwrap();
        let _ = child.wait();
        assert!(locker.has_exited());
    }
}
