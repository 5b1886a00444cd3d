//! In-memory process/service table for tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::process::{ProcessControl, ProcessHandle, ServiceHandle, ServiceStatus};
use crate::error::{DeployError, DeployResult};

#[derive(Default)]
struct FakeProcess {
    name: String,
    exe: Option<PathBuf>,
    exited: bool,
    fail_kill: bool,
}

struct FakeService {
    display_name: String,
    status: ServiceStatus,
    pid: Option<u32>,
    dependents: Vec<String>,
    fail_stop: bool,
    fail_start: bool,
}

#[derive(Default)]
struct FakeState {
    processes: HashMap<u32, FakeProcess>,
    services: HashMap<String, FakeService>,
    locks: HashMap<PathBuf, Vec<u32>>,
    fail_lock_query: bool,
    fail_launch: Vec<PathBuf>,
    /// "stop:NAME", "start:NAME", "kill:PID", "launch:PATH" in call order
    calls: Vec<String>,
}

impl FakeState {
    fn exit(&mut self, pid: u32) {
        if let Some(p) = self.processes.get_mut(&pid) {
            p.exited = true;
        }
        for holders in self.locks.values_mut() {
            holders.retain(|h| *h != pid);
        }
    }
}

/// Shared fake platform; clones see the same table
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_process(&self, pid: u32, name: &str, exe: Option<&str>) {
        self.state.lock().unwrap().processes.insert(
            pid,
            FakeProcess {
                name: name.to_string(),
                exe: exe.map(PathBuf::from),
                ..Default::default()
            },
        );
    }

    pub fn add_service(&self, name: &str, pid: Option<u32>, dependents: &[&str]) {
        self.state.lock().unwrap().services.insert(
            name.to_string(),
            FakeService {
                display_name: format!("{name} service"),
                status: ServiceStatus::Running,
                pid,
                dependents: dependents.iter().map(|d| d.to_string()).collect(),
                fail_stop: false,
                fail_start: false,
            },
        );
    }

    pub fn lock_file(&self, path: &Path, pid: u32) {
        self.state
            .lock()
            .unwrap()
            .locks
            .entry(path.to_path_buf())
            .or_default()
            .push(pid);
    }

    pub fn exit_process(&self, pid: u32) {
        self.state.lock().unwrap().exit(pid);
    }

    pub fn set_service_status(&self, name: &str, status: ServiceStatus) {
        if let Some(s) = self.state.lock().unwrap().services.get_mut(name) {
            s.status = status;
        }
    }

    pub fn fail_stop(&self, name: &str) {
        if let Some(s) = self.state.lock().unwrap().services.get_mut(name) {
            s.fail_stop = true;
        }
    }

    pub fn fail_start(&self, name: &str) {
        if let Some(s) = self.state.lock().unwrap().services.get_mut(name) {
            s.fail_start = true;
        }
    }

    pub fn fail_launch(&self, executable: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_launch
            .push(PathBuf::from(executable));
    }

    pub fn fail_kill(&self, pid: u32) {
        if let Some(p) = self.state.lock().unwrap().processes.get_mut(&pid) {
            p.fail_kill = true;
        }
    }

    pub fn fail_lock_query(&self) {
        self.state.lock().unwrap().fail_lock_query = true;
    }

    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.state.lock().unwrap().services.get(name).map(|s| s.status)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn process_handle(&self, pid: u32) -> Arc<dyn ProcessHandle> {
        Arc::new(FakeProcessHandle {
            pid,
            platform: self.clone(),
        })
    }

    pub fn service(&self, name: &str) -> Arc<dyn ServiceHandle> {
        self.service_handle(name)
    }

    fn service_handle(&self, name: &str) -> Arc<dyn ServiceHandle> {
        Arc::new(FakeServiceHandle {
            name: name.to_string(),
            platform: self.clone(),
        })
    }
}

struct FakeProcessHandle {
    pid: u32,
    platform: FakePlatform,
}

impl ProcessHandle for FakeProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn name(&self) -> String {
        let state = self.platform.state.lock().unwrap();
        state
            .processes
            .get(&self.pid)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    fn has_exited(&self) -> bool {
        let state = self.platform.state.lock().unwrap();
        state.processes.get(&self.pid).map(|p| p.exited).unwrap_or(true)
    }

    fn kill(&self) -> DeployResult<()> {
        let mut state = self.platform.state.lock().unwrap();
        state.calls.push(format!("kill:{}", self.pid));
        if state.processes.get(&self.pid).map(|p| p.fail_kill).unwrap_or(false) {
            return Err(DeployError::platform("access denied"));
        }
        state.exit(self.pid);
        // A killed service host leaves its services stopped
        for service in state.services.values_mut() {
            if service.pid == Some(self.pid) {
                service.status = ServiceStatus::Stopped;
            }
        }
        Ok(())
    }

    fn main_module_path(&self) -> Option<PathBuf> {
        let state = self.platform.state.lock().unwrap();
        state.processes.get(&self.pid).and_then(|p| p.exe.clone())
    }
}

struct FakeServiceHandle {
    name: String,
    platform: FakePlatform,
}

impl ServiceHandle for FakeServiceHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn display_name(&self) -> String {
        let state = self.platform.state.lock().unwrap();
        state
            .services
            .get(&self.name)
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    fn status(&self) -> ServiceStatus {
        self.platform
            .service_status(&self.name)
            .unwrap_or(ServiceStatus::Stopped)
    }

    fn refresh(&self) -> DeployResult<()> {
        Ok(())
    }

    fn dependents(&self) -> DeployResult<Vec<Arc<dyn ServiceHandle>>> {
        let names = {
            let state = self.platform.state.lock().unwrap();
            state
                .services
                .get(&self.name)
                .map(|s| s.dependents.clone())
                .unwrap_or_default()
        };
        Ok(names.iter().map(|n| self.platform.service_handle(n)).collect())
    }

    fn stop(&self) -> DeployResult<()> {
        let mut state = self.platform.state.lock().unwrap();
        state.calls.push(format!("stop:{}", self.name));
        let pid = match state.services.get_mut(&self.name) {
            Some(s) if s.fail_stop => return Err(DeployError::platform("service did not accept stop")),
            Some(s) => {
                s.status = ServiceStatus::Stopped;
                s.pid.take()
            }
            None => None,
        };
        if let Some(pid) = pid {
            state.exit(pid);
        }
        Ok(())
    }

    fn start(&self) -> DeployResult<()> {
        let mut state = self.platform.state.lock().unwrap();
        state.calls.push(format!("start:{}", self.name));
        match state.services.get_mut(&self.name) {
            Some(s) if s.fail_start => Err(DeployError::platform("service failed to start")),
            Some(s) => {
                s.status = ServiceStatus::Running;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl ProcessControl for FakePlatform {
    fn processes_locking_file(&self, path: &Path) -> DeployResult<Vec<Arc<dyn ProcessHandle>>> {
        let pids = {
            let state = self.state.lock().unwrap();
            if state.fail_lock_query {
                return Err(DeployError::platform("lock query failed"));
            }
            state.locks.get(path).cloned().unwrap_or_default()
        };
        Ok(pids.into_iter().map(|pid| self.process_handle(pid)).collect())
    }

    fn service_for_process(&self, process: &dyn ProcessHandle) -> Option<Arc<dyn ServiceHandle>> {
        let name = {
            let state = self.state.lock().unwrap();
            let mut names: Vec<&String> = state
                .services
                .iter()
                .filter(|(_, s)| s.pid == Some(process.pid()))
                .map(|(n, _)| n)
                .collect();
            names.sort();
            names.first().map(|n| n.to_string())
        }?;
        Some(self.service_handle(&name))
    }

    fn process_for_service(&self, service: &dyn ServiceHandle) -> Option<Arc<dyn ProcessHandle>> {
        let pid = {
            let state = self.state.lock().unwrap();
            state.services.get(&service.name()).and_then(|s| s.pid)
        }?;
        Some(self.process_handle(pid))
    }

    fn launch(&self, executable: &Path) -> DeployResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("launch:{}", executable.display()));
        if state.fail_launch.iter().any(|p| p == executable) {
            return Err(DeployError::platform("executable not found"));
        }
        Ok(())
    }
}
