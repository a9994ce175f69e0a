//! Lifecycle of the analyzer process.

use crate::config::Config;
use crate::desktop::Desktop;
use crate::element::UIElement;
use crate::errors::ExtractError;
use crate::locale::LocaleDictionary;
use crate::retry::CancellationFlag;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tracing::{debug, error, info, instrument, warn};

/// Time a freshly spawned analyzer must survive to count as started.
const LAUNCH_GRACE: Duration = Duration::from_secs(1);
const TERMINATION_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// OS process operations the supervisor needs.
pub trait ProcessHost: Send + Sync {
    /// Start `exe` with `arg`, returning the new pid.
    fn spawn(&self, exe: &Path, arg: &Path) -> std::io::Result<u32>;
    fn is_alive(&self, pid: u32) -> bool;
    /// Processes whose image name contains `fragment`, case-insensitively.
    fn find_by_image(&self, fragment: &str) -> Vec<ProcessInfo>;
    /// Ask the process to exit, or kill it outright when `force` is set.
    /// Returns whether the request was delivered.
    fn terminate(&self, pid: u32, force: bool) -> bool;
}

/// [`ProcessHost`] backed by `std::process` and `sysinfo`.
#[derive(Default)]
pub struct SystemProcessHost {
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

impl ProcessHost for SystemProcessHost {
    fn spawn(&self, exe: &Path, arg: &Path) -> std::io::Result<u32> {
        let child = Command::new(exe).arg(arg).spawn()?;
        let pid = child.id();
        if let Ok(mut children) = self.children.lock() {
            children.insert(pid, child);
        }
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        if let Ok(mut children) = self.children.lock() {
            if let Some(child) = children.get_mut(&pid) {
                return match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("process {pid} exited with {status}");
                        children.remove(&pid);
                        false
                    }
                    Ok(None) => true,
                    Err(_) => false,
                };
            }
        }
        Self::snapshot().process(Pid::from_u32(pid)).is_some()
    }

    fn find_by_image(&self, fragment: &str) -> Vec<ProcessInfo> {
        let fragment = fragment.to_lowercase();
        let system = Self::snapshot();
        let mut found: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().to_string();
                name.to_lowercase().contains(&fragment).then(|| ProcessInfo {
                    pid: pid.as_u32(),
                    name,
                })
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    fn terminate(&self, pid: u32, force: bool) -> bool {
        let system = Self::snapshot();
        let Some(process) = system.process(Pid::from_u32(pid)) else {
            return false;
        };
        if force {
            if process.kill() {
                return true;
            }
            return taskkill(pid, true);
        }
        match process.kill_with(Signal::Term) {
            Some(sent) => sent,
            // Windows has no SIGTERM; taskkill without /F posts WM_CLOSE.
            None => taskkill(pid, false),
        }
    }
}

fn taskkill(pid: u32, force: bool) -> bool {
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    match Command::new("taskkill").args(&args).status() {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("taskkill unavailable: {e}");
            false
        }
    }
}

/// An analyzer instance the pipeline is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppHandle {
    pub pid: u32,
    pub started_by_us: bool,
}

pub struct ProcessSupervisor {
    host: Arc<dyn ProcessHost>,
    cancel: CancellationFlag,
    analyzer_exe: PathBuf,
    image_name: String,
    startup_wait: Duration,
    force_kill_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(host: Arc<dyn ProcessHost>, config: &Config, cancel: CancellationFlag) -> Self {
        Self {
            host,
            cancel,
            analyzer_exe: config.analyzer_exe.clone(),
            image_name: config.process_image_name.clone(),
            startup_wait: config.delays.startup_wait(),
            force_kill_timeout: config.delays.force_kill_timeout(),
        }
    }

    /// Start the analyzer on `capture`. A process that dies right away is
    /// started a second time before giving up.
    #[instrument(skip(self), fields(capture = %capture.display()))]
    pub fn launch(&self, capture: &Path) -> Result<AppHandle, ExtractError> {
        let grace = LAUNCH_GRACE.min(self.startup_wait);
        let mut last_reason = String::new();
        for attempt in 1..=2 {
            let pid = self.host.spawn(&self.analyzer_exe, capture).map_err(|source| {
                ExtractError::Io {
                    path: self.analyzer_exe.clone(),
                    source,
                }
            })?;
            if !self.cancel.sleep(grace) {
                return Err(ExtractError::Interrupted);
            }
            if self.host.is_alive(pid) {
                info!("analyzer started (pid {pid}, attempt {attempt})");
                if !self.cancel.sleep(self.startup_wait.saturating_sub(grace)) {
                    return Err(ExtractError::Interrupted);
                }
                return Ok(AppHandle {
                    pid,
                    started_by_us: true,
                });
            }
            last_reason = format!("analyzer process {pid} exited immediately");
            warn!("{last_reason} (attempt {attempt})");
        }
        Err(ExtractError::phase("launch", last_reason))
    }

    /// Bind to an analyzer that is already showing an analysis window.
    pub fn attach_existing(&self, desktop: &Desktop, locale: &LocaleDictionary) -> Option<AppHandle> {
        let candidates = self.host.find_by_image(&self.image_name);
        if candidates.is_empty() {
            return None;
        }
        let windows = match desktop.top_level_windows() {
            Ok(windows) => windows,
            Err(e) => {
                debug!("cannot list windows for attach: {e}");
                return None;
            }
        };
        for process in candidates {
            let has_analysis_window = windows.iter().any(|w| {
                w.process_id().ok() == Some(process.pid)
                    && locale.title_has_analysis_keyword(&w.name_or_empty())
            });
            if has_analysis_window {
                info!("attached to running analyzer {} (pid {})", process.name, process.pid);
                return Some(AppHandle {
                    pid: process.pid,
                    started_by_us: false,
                });
            }
        }
        None
    }

    pub fn enumerate_windows(&self, desktop: &Desktop, app: &AppHandle) -> Vec<UIElement> {
        match desktop.windows_for_pid(app.pid) {
            Ok(windows) => windows,
            Err(e) => {
                warn!("cannot enumerate windows of pid {}: {e}", app.pid);
                Vec::new()
            }
        }
    }

    /// Ask every analyzer process to exit, then kill the ones still alive
    /// after the grace period. Returns the pids that survived both.
    #[instrument(skip(self))]
    pub fn force_terminate_all(&self) -> Vec<u32> {
        let survivors = self.terminate_matching();
        if !survivors.is_empty() {
            error!("analyzer processes survived termination: {survivors:?}");
        }
        survivors
    }

    /// Same as [`force_terminate_all`](Self::force_terminate_all) but only
    /// warns about survivors.
    pub fn soft_cleanup(&self) {
        let survivors = self.terminate_matching();
        if !survivors.is_empty() {
            warn!("analyzer processes still running after cleanup: {survivors:?}");
        }
    }

    /// Pids of running analyzer processes.
    pub fn running(&self) -> Vec<u32> {
        self.host
            .find_by_image(&self.image_name)
            .into_iter()
            .map(|p| p.pid)
            .collect()
    }

    fn terminate_matching(&self) -> Vec<u32> {
        let targets = self.running();
        if targets.is_empty() {
            return targets;
        }
        info!("terminating analyzer processes {targets:?}");
        for pid in &targets {
            if !self.host.terminate(*pid, false) {
                debug!("graceful termination of {pid} not delivered");
            }
        }

        let deadline = Instant::now() + self.force_kill_timeout;
        let mut alive: Vec<u32> = targets;
        loop {
            alive.retain(|pid| self.host.is_alive(*pid));
            if alive.is_empty() || Instant::now() >= deadline {
                break;
            }
            // Termination must finish even when the run is being interrupted.
            std::thread::sleep(TERMINATION_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }

        for pid in &alive {
            warn!("process {pid} ignored termination request, killing");
            self.host.terminate(*pid, true);
        }
        alive.retain(|pid| self.host.is_alive(*pid));
        alive
    }
}
