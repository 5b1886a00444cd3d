//! Windows Service Control
//!
//! Service handles backed by the `windows-service` crate. The service manager
//! API has no call for dependents or for PID → service lookup, so those go
//! through `sc` and its text output is parsed here.

#![cfg_attr(not(windows), allow(dead_code))]

/// One `SERVICE_NAME` block of `sc` output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub pid: Option<u32>,
}

/// Parse `sc queryex` / `sc enumdepend` output into service blocks
pub fn parse_sc_output(output: &str) -> Vec<ScEntry> {
    let mut entries: Vec<ScEntry> = Vec::new();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "SERVICE_NAME" => entries.push(ScEntry {
                name: value.to_string(),
                display_name: None,
                pid: None,
            }),
            "DISPLAY_NAME" => {
                if let Some(last) = entries.last_mut() {
                    last.display_name = Some(value.to_string());
                }
            }
            "PID" => {
                if let Some(last) = entries.last_mut() {
                    // PID 0 means not running
                    last.pid = value.parse::<u32>().ok().filter(|pid| *pid != 0);
                }
            }
            _ => {}
        }
    }

    entries
}

/// Enumeration buffer for `sc queryex`; sc's own default holds only a few
/// dozen services
const QUERYEX_BUFSIZE: &str = "65536";

/// Arguments listing every service, continuing at `resume` when given
pub fn queryex_args(resume: Option<&str>) -> Vec<&str> {
    let mut args = vec![
        "queryex",
        "type=",
        "service",
        "state=",
        "all",
        "bufsize=",
        QUERYEX_BUFSIZE,
    ];
    if let Some(index) = resume {
        args.extend(["ri=", index]);
    }
    args
}

/// Index to resume at when `sc` ran out of buffer
/// ("... more data, need N bytes start resume at index 79")
pub fn parse_resume_index(output: &str) -> Option<u32> {
    const MARKER: &str = "resume at index";
    let lower = output.to_lowercase();
    let start = lower.find(MARKER)? + MARKER.len();
    lower[start..]
        .trim_start()
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

#[cfg(windows)]
pub use self::windows::{pid_for_service, service_for_pid, WindowsService};

#[cfg(windows)]
mod windows {
    use std::ffi::OsString;
    use std::sync::{Arc, Mutex};
    use windows_service::service::{ServiceAccess, ServiceState};
    use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

    use super::{parse_resume_index, parse_sc_output, queryex_args, ScEntry};
    use crate::error::{DeployError, DeployResult};
    use crate::infra::process::{ServiceHandle, ServiceStatus};

    fn manager() -> DeployResult<ServiceManager> {
        ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
            .map_err(|e| DeployError::platform(format!("Cannot connect to service manager: {}", e)))
    }

    fn map_state(state: ServiceState) -> ServiceStatus {
        match state {
            ServiceState::Stopped => ServiceStatus::Stopped,
            ServiceState::StartPending => ServiceStatus::StartPending,
            ServiceState::StopPending => ServiceStatus::StopPending,
            ServiceState::Running => ServiceStatus::Running,
            ServiceState::ContinuePending => ServiceStatus::ContinuePending,
            ServiceState::PausePending => ServiceStatus::PausePending,
            ServiceState::Paused => ServiceStatus::Paused,
        }
    }

    fn sc(args: &[&str]) -> DeployResult<String> {
        let output = std::process::Command::new("sc")
            .args(args)
            .output()
            .map_err(|e| DeployError::platform(format!("Failed to run sc: {}", e)))?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Service handle with a cached status
    pub struct WindowsService {
        name: String,
        display_name: String,
        status: Mutex<ServiceStatus>,
    }

    impl WindowsService {
        pub fn open(name: &str) -> DeployResult<Self> {
            let service = manager()?
                .open_service(name, ServiceAccess::QUERY_STATUS | ServiceAccess::QUERY_CONFIG)
                .map_err(|e| DeployError::platform(format!("Cannot open service {}: {}", name, e)))?;
            let status = service
                .query_status()
                .map_err(|e| DeployError::platform(format!("Cannot query service {}: {}", name, e)))?;
            let display_name = service
                .query_config()
                .map(|c| c.display_name.to_string_lossy().to_string())
                .unwrap_or_else(|_| name.to_string());

            Ok(Self {
                name: name.to_string(),
                display_name,
                status: Mutex::new(map_state(status.current_state)),
            })
        }
    }

    impl ServiceHandle for WindowsService {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn display_name(&self) -> String {
            self.display_name.clone()
        }

        fn status(&self) -> ServiceStatus {
            self.status
                .lock()
                .map(|s| *s)
                .unwrap_or(ServiceStatus::Stopped)
        }

        fn refresh(&self) -> DeployResult<()> {
            let service = manager()?
                .open_service(&self.name, ServiceAccess::QUERY_STATUS)
                .map_err(|e| DeployError::platform(format!("Cannot open service {}: {}", self.name, e)))?;
            let status = service
                .query_status()
                .map_err(|e| DeployError::platform(format!("Cannot query service {}: {}", self.name, e)))?;
            if let Ok(mut cached) = self.status.lock() {
                *cached = map_state(status.current_state);
            }
            Ok(())
        }

        fn dependents(&self) -> DeployResult<Vec<Arc<dyn ServiceHandle>>> {
            let output = sc(&["enumdepend", &self.name, "65536"])?;
            let mut dependents: Vec<Arc<dyn ServiceHandle>> = Vec::new();
            for entry in parse_sc_output(&output) {
                match WindowsService::open(&entry.name) {
                    Ok(service) => dependents.push(Arc::new(service)),
                    Err(e) => tracing::warn!(service = %entry.name, error = %e, "Skipping dependent service"),
                }
            }
            Ok(dependents)
        }

        fn stop(&self) -> DeployResult<()> {
            let service = manager()?
                .open_service(&self.name, ServiceAccess::STOP)
                .map_err(|e| DeployError::platform(format!("Cannot open service {}: {}", self.name, e)))?;
            service
                .stop()
                .map(|_| ())
                .map_err(|e| DeployError::platform(format!("Cannot stop service {}: {}", self.name, e)))
        }

        fn start(&self) -> DeployResult<()> {
            let service = manager()?
                .open_service(&self.name, ServiceAccess::START)
                .map_err(|e| DeployError::platform(format!("Cannot open service {}: {}", self.name, e)))?;
            service
                .start::<OsString>(&[])
                .map_err(|e| DeployError::platform(format!("Cannot start service {}: {}", self.name, e)))
        }
    }

    /// Upper bound on `sc queryex` pages
    const MAX_QUERYEX_PAGES: usize = 32;

    /// Every service with its PID, following sc's resume index across pages
    fn all_services() -> DeployResult<Vec<ScEntry>> {
        let mut entries = Vec::new();
        let mut resume: Option<u32> = None;
        for _ in 0..MAX_QUERYEX_PAGES {
            let resume_arg = resume.map(|r| r.to_string());
            let output = sc(&queryex_args(resume_arg.as_deref()))?;
            entries.extend(parse_sc_output(&output));
            match parse_resume_index(&output) {
                Some(next) if Some(next) != resume => resume = Some(next),
                _ => break,
            }
        }
        Ok(entries)
    }

    /// The service hosted by `pid`; lookup failures count as "none"
    pub fn service_for_pid(pid: u32) -> Option<Arc<dyn ServiceHandle>> {
        let entry = all_services()
            .ok()?
            .into_iter()
            .find(|e| e.pid == Some(pid))?;
        let service = WindowsService::open(&entry.name).ok()?;
        Some(Arc::new(service))
    }

    pub fn pid_for_service(name: &str) -> Option<u32> {
        let service = manager()
            .ok()?
            .open_service(name, ServiceAccess::QUERY_STATUS)
            .ok()?;
        service
            .query_status()
            .ok()?
            .process_id
            .filter(|pid| *pid != 0)
    }
}
