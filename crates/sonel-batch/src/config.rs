//! Run configuration.
//!
//! Loaded from an optional YAML (or JSON) file; every field has a default so a
//! partial file is fine. The CLI layers its flags on top.

use crate::errors::ExtractError;
use crate::locale::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// A delay must be a finite, non-negative number of seconds that fits a `Duration`.
fn check_secs(name: &str, value: f64) -> Result<(), ExtractError> {
    if value.is_finite() && value >= 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        return Ok(());
    }
    Err(ExtractError::Config(format!(
        "{name} must be a finite, non-negative number of seconds (got {value})"
    )))
}

/// Delays in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Delays {
    pub startup_wait: f64,
    pub window_activation: f64,
    pub between_files: f64,
    pub file_verification: f64,
    pub force_kill_timeout: f64,
    pub between_clicks: f64,
    /// Base step of the configuration-window connect backoff (2, 4, 6 ... s).
    pub connect_backoff: f64,
    /// Settle time after a tree scroll; grows with consecutive empty passes.
    pub scroll_settle: f64,
    /// Pause between focus attempts on the save dialog edit.
    pub focus_retry: f64,
    /// Pause between retries of a transiently failing UI operation.
    pub transient_retry: f64,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            startup_wait: 10.0,
            window_activation: 30.0,
            between_files: 4.0,
            file_verification: 2.0,
            force_kill_timeout: 10.0,
            between_clicks: 0.5,
            connect_backoff: 2.0,
            scroll_settle: 0.5,
            focus_retry: 0.3,
            transient_retry: 0.3,
        }
    }
}

impl Delays {
    /// All delays zero; polling still uses the configured interval.
    pub fn none() -> Self {
        Self {
            startup_wait: 0.0,
            window_activation: 0.0,
            between_files: 0.0,
            file_verification: 0.0,
            force_kill_timeout: 0.0,
            between_clicks: 0.0,
            connect_backoff: 0.0,
            scroll_settle: 0.0,
            focus_retry: 0.0,
            transient_retry: 0.0,
        }
    }

    fn named(&self) -> [(&'static str, f64); 10] {
        [
            ("delays.startup_wait", self.startup_wait),
            ("delays.window_activation", self.window_activation),
            ("delays.between_files", self.between_files),
            ("delays.file_verification", self.file_verification),
            ("delays.force_kill_timeout", self.force_kill_timeout),
            ("delays.between_clicks", self.between_clicks),
            ("delays.connect_backoff", self.connect_backoff),
            ("delays.scroll_settle", self.scroll_settle),
            ("delays.focus_retry", self.focus_retry),
            ("delays.transient_retry", self.transient_retry),
        ]
    }

    pub fn startup_wait(&self) -> Duration {
        secs(self.startup_wait)
    }
    pub fn window_activation(&self) -> Duration {
        secs(self.window_activation)
    }
    pub fn between_files(&self) -> Duration {
        secs(self.between_files)
    }
    pub fn file_verification(&self) -> Duration {
        secs(self.file_verification)
    }
    pub fn force_kill_timeout(&self) -> Duration {
        secs(self.force_kill_timeout)
    }
    pub fn between_clicks(&self) -> Duration {
        secs(self.between_clicks)
    }
    pub fn connect_backoff(&self) -> Duration {
        secs(self.connect_backoff)
    }
    pub fn scroll_settle(&self) -> Duration {
        secs(self.scroll_settle)
    }
    pub fn focus_retry(&self) -> Duration {
        secs(self.focus_retry)
    }
    pub fn transient_retry(&self) -> Duration {
        secs(self.transient_retry)
    }
}

/// Desired state of the four aggregation checkboxes of the filter panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationFilters {
    pub average: bool,
    pub minimum: bool,
    pub instantaneous: bool,
    pub maximum: bool,
}

impl Default for AggregationFilters {
    fn default() -> Self {
        Self {
            average: true,
            minimum: false,
            instantaneous: false,
            maximum: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_dir: PathBuf,
    pub export_dir: PathBuf,
    pub analyzer_exe: PathBuf,
    /// Terminate the analyzer after each successful capture.
    pub auto_close: bool,
    pub delays: Delays,
    pub filters: AggregationFilters,
    /// Language tried first when matching UI text.
    pub language: Option<Language>,
    /// Case-insensitive fragment of the analyzer's process image name.
    pub process_image_name: String,
    pub capture_extensions: Vec<String>,
    /// Substring every capture window title carries.
    pub title_extension_marker: String,
    pub registry_file_name: String,
    pub min_csv_size: u64,
    pub recent_csv_window_s: f64,
    pub verification_attempts: u32,
    pub wait_poll_interval_ms: u64,
    /// Vertical distance from the report button to the CSV popup entry.
    pub report_menu_offset_px: f64,
    /// Scroll anchor used when the tree shows no items at all.
    pub scroll_anchor_fallback: (f64, f64),
    /// Verbose logging plus accessibility tree dumps at failure points.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("capturas"),
            export_dir: PathBuf::from("csv"),
            analyzer_exe: PathBuf::from(
                r"C:\Program Files (x86)\Sonel\Sonel Analysis 4\SonelAnalysis.exe",
            ),
            auto_close: true,
            delays: Delays::default(),
            filters: AggregationFilters::default(),
            language: None,
            process_image_name: "sonelanalysis".to_string(),
            capture_extensions: ["pqm702", "pqm703", "pqm707", "pqm710", "pqm711"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            title_extension_marker: ".pqm".to_string(),
            registry_file_name: "procesados.json".to_string(),
            min_csv_size: 100,
            recent_csv_window_s: 300.0,
            verification_attempts: 5,
            wait_poll_interval_ms: 500,
            report_menu_offset_px: 52.0,
            scroll_anchor_fallback: (250.0, 560.0),
            debug: false,
        }
    }
}

impl Config {
    /// Read a YAML or JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| ExtractError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if !self.input_dir.is_dir() {
            return Err(ExtractError::Config(format!(
                "input directory {} does not exist",
                self.input_dir.display()
            )));
        }
        if self.capture_extensions.is_empty() {
            return Err(ExtractError::Config(
                "capture_extensions must not be empty".to_string(),
            ));
        }
        if self.wait_poll_interval_ms == 0 {
            return Err(ExtractError::Config(
                "wait_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.registry_file_name.trim().is_empty() {
            return Err(ExtractError::Config(
                "registry_file_name must not be empty".to_string(),
            ));
        }
        for (name, value) in self.delays.named() {
            check_secs(name, value)?;
        }
        check_secs("recent_csv_window_s", self.recent_csv_window_s)?;
        if !self.report_menu_offset_px.is_finite() {
            return Err(ExtractError::Config(
                "report_menu_offset_px must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.input_dir.join(&self.registry_file_name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn recent_csv_window(&self) -> Duration {
        secs(self.recent_csv_window_s)
    }

    /// Whether `path` carries one of the capture extensions.
    pub fn is_capture(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.capture_extensions
                    .iter()
                    .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "input_dir: C:/data/in\nauto_close: false\ndelays:\n  startup_wait: 3\nlanguage: pl\n",
        )
        .unwrap();
        assert_eq!(cfg.input_dir, PathBuf::from("C:/data/in"));
        assert!(!cfg.auto_close);
        assert_eq!(cfg.delays.startup_wait(), Duration::from_secs(3));
        assert_eq!(cfg.delays.between_files(), Duration::from_secs(4));
        assert_eq!(cfg.language, Some(Language::Polish));
        assert_eq!(cfg.min_csv_size, 100);
    }

    #[test]
    fn json_is_accepted() {
        let cfg: Config =
            serde_yaml::from_str(r#"{"export_dir": "out", "filters": {"maximum": true}}"#).unwrap();
        assert_eq!(cfg.export_dir, PathBuf::from("out"));
        assert!(cfg.filters.maximum);
        assert!(cfg.filters.average);
    }

    #[test]
    fn capture_extension_check_ignores_case() {
        let cfg = Config::default();
        assert!(cfg.is_capture(Path::new("case-001.pqm702")));
        assert!(cfg.is_capture(Path::new("CASE.PQM710")));
        assert!(!cfg.is_capture(Path::new("procesados.json")));
        assert!(!cfg.is_capture(Path::new("noext")));
    }

    #[test]
    fn validate_rejects_missing_input_dir() {
        let cfg = Config {
            input_dir: PathBuf::from("/definitely/not/here"),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ExtractError::Config(_))));
    }

    #[test]
    fn validate_rejects_unusable_delays() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg: Config = serde_yaml::from_str("delays:\n  startup_wait: .inf\n").unwrap();
        let cfg = Config {
            input_dir: dir.path().to_path_buf(),
            ..cfg
        };
        match cfg.validate() {
            Err(ExtractError::Config(msg)) => assert!(msg.contains("delays.startup_wait"), "{msg}"),
            other => panic!("expected a config error, got {other:?}"),
        }
        // Reading the value back never panics.
        assert_eq!(cfg.delays.startup_wait(), Duration::MAX);

        for (field, value) in [("between_files", -1.0), ("scroll_settle", f64::NAN), ("focus_retry", 1e300)] {
            let mut delays = Delays::default();
            match field {
                "between_files" => delays.between_files = value,
                "scroll_settle" => delays.scroll_settle = value,
                _ => delays.focus_retry = value,
            }
            let cfg = Config {
                input_dir: dir.path().to_path_buf(),
                delays,
                ..Config::default()
            };
            assert!(matches!(cfg.validate(), Err(ExtractError::Config(_))), "{field}");
        }

        let cfg = Config {
            input_dir: dir.path().to_path_buf(),
            recent_csv_window_s: f64::INFINITY,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ExtractError::Config(_))));
        let cfg = Config {
            input_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
