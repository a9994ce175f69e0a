//! Top-level batch loop.

use crate::config::Config;
use crate::desktop::Desktop;
use crate::detector::{DetectionKind, FileDetector};
use crate::drivers::{AnalysisWindowDriver, ConfigurationWindowDriver, DriverContext};
use crate::errors::ExtractError;
use crate::locale::LocaleDictionary;
use crate::platforms::AccessibilityEngine;
use crate::registry::{Registry, RegistryEntry};
use crate::retry::CancellationFlag;
use crate::supervisor::{AppHandle, ProcessHost, ProcessSupervisor};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Process captures even when the registry marks them succeeded.
    pub force_reprocess: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub capture: String,
    pub status: CaptureStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl CaptureOutcome {
    fn new(capture: &str, status: CaptureStatus) -> Self {
        Self {
            capture: capture.to_string(),
            status,
            csv: None,
            csv_size: None,
            detection: None,
            warnings: Vec::new(),
            failure: None,
        }
    }

    fn failed(capture: &str, reason: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            warnings,
            ..Self::new(capture, CaptureStatus::Failed)
        }
    }
}

/// Counters and per-capture detail of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub csvs_verified: usize,
    pub interrupted: bool,
    pub captures: Vec<CaptureOutcome>,
}

impl RunResult {
    fn push(&mut self, outcome: CaptureOutcome) {
        match outcome.status {
            CaptureStatus::Succeeded => {
                self.succeeded += 1;
                if outcome.csv.is_some() {
                    self.csvs_verified += 1;
                }
            }
            CaptureStatus::Failed => self.failed += 1,
            CaptureStatus::Skipped => self.skipped += 1,
        }
        self.captures.push(outcome);
    }
}

pub struct BatchOrchestrator {
    config: Config,
    desktop: Desktop,
    locale: LocaleDictionary,
    supervisor: ProcessSupervisor,
    detector: FileDetector,
    registry: Registry,
    cancel: CancellationFlag,
}

impl BatchOrchestrator {
    pub fn new(
        config: Config,
        engine: Arc<dyn AccessibilityEngine>,
        host: Arc<dyn ProcessHost>,
        cancel: CancellationFlag,
    ) -> Result<Self, ExtractError> {
        config.validate()?;
        fs::create_dir_all(&config.export_dir).map_err(|source| ExtractError::Io {
            path: config.export_dir.clone(),
            source,
        })?;
        let registry = Registry::load(config.registry_path(), config.min_csv_size);
        Ok(Self {
            desktop: Desktop::new(engine, &config, cancel.clone()),
            locale: LocaleDictionary::new(config.language, config.title_extension_marker.clone()),
            supervisor: ProcessSupervisor::new(host, &config, cancel.clone()),
            detector: FileDetector::new(&config, cancel.clone()),
            registry,
            cancel,
            config,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Capture files in the input directory, sorted by file name.
    pub fn list_captures(&self) -> Result<Vec<PathBuf>, ExtractError> {
        list_captures(&self.config)
    }

    /// Captures the next run would process.
    pub fn pending(&mut self) -> Result<Vec<PathBuf>, ExtractError> {
        pending_captures(&self.config, &mut self.registry)
    }

    pub fn run(&mut self, options: RunOptions) -> Result<RunResult, ExtractError> {
        let captures = self.list_captures()?;
        let stats = self.registry.stats();
        info!(
            "{} captures in {}; registry holds {} entries ({} succeeded)",
            captures.len(),
            self.config.input_dir.display(),
            stats.total,
            stats.succeeded
        );

        let mut result = RunResult::default();
        let mut interacted = false;
        for capture in &captures {
            if self.cancel.is_cancelled() {
                result.interrupted = true;
                break;
            }
            let name = file_name(capture);
            if !options.force_reprocess && self.registry.is_processed(&name) {
                info!("{name} already processed, skipping");
                result.push(CaptureOutcome::new(&name, CaptureStatus::Skipped));
                continue;
            }

            if interacted && !self.cancel.sleep(self.config.delays.between_files()) {
                result.interrupted = true;
                break;
            }
            interacted = true;

            let span = info_span!("capture", capture = %name);
            let _enter = span.enter();
            let outcome = self.process_capture(capture, &name)?;
            let interrupted = self.cancel.is_cancelled();
            result.push(outcome);
            if interrupted {
                result.interrupted = true;
                break;
            }
        }

        info!(
            "run finished: {} succeeded, {} failed, {} skipped, {} CSVs verified{}",
            result.succeeded,
            result.failed,
            result.skipped,
            result.csvs_verified,
            if result.interrupted { " (interrupted)" } else { "" }
        );
        Ok(result)
    }

    /// Drive one capture end to end and record its outcome. Only a registry
    /// write failure is returned as an error.
    fn process_capture(&mut self, capture: &Path, name: &str) -> Result<CaptureOutcome, ExtractError> {
        let stem = capture
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());

        // At most one analyzer at a time.
        let leftovers = self.supervisor.running();
        if !leftovers.is_empty() {
            warn!("analyzer already running ({leftovers:?}), terminating before launch");
            self.supervisor.force_terminate_all();
        }

        let exported = self.drive_analyzer(capture, &stem);
        let (outcome, succeeded) = match exported {
            Err(e) => {
                let reason = e.to_string();
                error!("{name}: {reason}");
                self.record(name, false, None)?;
                (CaptureOutcome::failed(name, reason, Vec::new()), false)
            }
            Ok((warnings, not_before)) => match self.detector.verify(&stem, not_before) {
                Some(found) => {
                    let entry = self.record(name, true, Some(&found.path))?;
                    if entry.succeeded {
                        let outcome = CaptureOutcome {
                            csv: entry.exported_csv_filename,
                            csv_size: entry.exported_csv_size,
                            detection: Some(found.kind),
                            warnings,
                            ..CaptureOutcome::new(name, CaptureStatus::Succeeded)
                        };
                        (outcome, true)
                    } else {
                        let reason = format!("{} failed verification", found.path.display());
                        (CaptureOutcome::failed(name, reason, warnings), false)
                    }
                }
                None => {
                    self.record(name, false, None)?;
                    let reason = if self.cancel.is_cancelled() {
                        ExtractError::Interrupted.to_string()
                    } else {
                        ExtractError::Verification(name.to_string()).to_string()
                    };
                    (CaptureOutcome::failed(name, reason, warnings), false)
                }
            },
        };

        if succeeded {
            info!("{name} exported to {}", outcome.csv.as_deref().unwrap_or("?"));
            if self.config.auto_close {
                self.supervisor.soft_cleanup();
            }
        } else {
            self.supervisor.force_terminate_all();
        }
        Ok(outcome)
    }

    /// Launch the analyzer and run both phases. Returns the sub-phase warnings
    /// and the instant the export was requested.
    fn drive_analyzer(&self, capture: &Path, stem: &str) -> Result<(Vec<String>, SystemTime), ExtractError> {
        let app = self.start_analyzer(capture)?;
        let ctx = DriverContext::new(&self.desktop, &self.locale, &self.config);

        let handoff = AnalysisWindowDriver::new(ctx).run(&app, &self.supervisor)?;
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Interrupted);
        }
        let not_before = SystemTime::now();
        let report = ConfigurationWindowDriver::new(ctx).run(&app, &handoff, stem)?;
        info!(
            "export requested as {} ({} rows selected, {} warnings)",
            report.requested_path.display(),
            report.selected.len(),
            report.warnings.len()
        );
        Ok((report.warnings, not_before))
    }

    fn start_analyzer(&self, capture: &Path) -> Result<AppHandle, ExtractError> {
        match self.supervisor.launch(capture) {
            Ok(app) => Ok(app),
            Err(ExtractError::Interrupted) => Err(ExtractError::Interrupted),
            Err(e) => {
                warn!("launch failed ({e}), looking for a running analyzer");
                self.supervisor
                    .attach_existing(&self.desktop, &self.locale)
                    .ok_or(e)
            }
        }
    }

    fn record(
        &mut self,
        name: &str,
        succeeded: bool,
        csv: Option<&Path>,
    ) -> Result<RegistryEntry, ExtractError> {
        self.registry.record(name, succeeded, csv).map_err(|e| {
            error!("registry write failed, aborting run: {e}");
            self.supervisor.force_terminate_all();
            e
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Captures of `config.input_dir` without a succeeded entry in `registry`.
pub fn pending_captures(
    config: &Config,
    registry: &mut Registry,
) -> Result<Vec<PathBuf>, ExtractError> {
    let captures = list_captures(config)?;
    Ok(captures
        .into_iter()
        .filter(|path| !registry.is_processed(&file_name(path)))
        .collect())
}

/// Capture files of `config.input_dir`, sorted by file name.
pub fn list_captures(config: &Config) -> Result<Vec<PathBuf>, ExtractError> {
    let entries = fs::read_dir(&config.input_dir).map_err(|source| ExtractError::Io {
        path: config.input_dir.clone(),
        source,
    })?;
    let mut captures: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && config.is_capture(path))
        .collect();
    captures.sort_by_key(|path| file_name(path));
    Ok(captures)
}
