//! Decides whether an export produced a CSV, and which file it is.

use crate::config::Config;
use crate::retry::CancellationFlag;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, instrument, warn};

static DOT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());
static LEADING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+").unwrap());

/// Clock skew tolerated between our timestamp and the file system's.
const MTIME_SLACK: Duration = Duration::from_secs(2);
const PROCESSED_SUFFIX: &str = "_procesado";

/// File name typed into the save dialog for a capture stem: runs of dots
/// collapse into one and the stem never ends with a dot, so exactly one dot
/// precedes the extension.
pub fn csv_file_name(stem: &str) -> String {
    let collapsed = DOT_RUNS.replace_all(stem.trim(), ".");
    format!("{}.csv", collapsed.trim_end_matches('.'))
}

/// Stem reduced to alphanumerics, underscores and spaces.
fn cleaned_stem(stem: &str) -> String {
    stem.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Other names the analyzer has been seen to write for `stem`, most likely
/// first.
pub fn alternative_names(stem: &str) -> Vec<String> {
    let cleaned = cleaned_stem(stem);
    let mut stems = vec![
        cleaned.clone(),
        format!("{cleaned}{PROCESSED_SUFFIX}"),
        format!("{stem}{PROCESSED_SUFFIX}"),
    ];
    if let Some(digits) = LEADING_DIGITS.find(stem) {
        stems.push(digits.as_str().to_string());
    }

    let expected = csv_file_name(stem);
    let mut names: Vec<String> = Vec::new();
    for candidate in stems.iter().filter(|s| !s.is_empty()) {
        let name = csv_file_name(candidate);
        if name != expected && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Expected,
    Alternative,
    Recent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Where the CSV lives now, after any rename.
    pub path: PathBuf,
    pub size: u64,
    pub kind: DetectionKind,
    pub renamed: bool,
}

pub struct FileDetector {
    export_dir: PathBuf,
    min_size: u64,
    attempts: u32,
    interval: Duration,
    recent_window: Duration,
    cancel: CancellationFlag,
}

impl FileDetector {
    pub fn new(config: &Config, cancel: CancellationFlag) -> Self {
        Self {
            export_dir: config.export_dir.clone(),
            min_size: config.min_csv_size,
            attempts: config.verification_attempts,
            interval: config.delays.file_verification(),
            recent_window: config.recent_csv_window(),
            cancel,
        }
    }

    pub fn expected_path(&self, stem: &str) -> PathBuf {
        self.export_dir.join(csv_file_name(stem))
    }

    fn accepted_size(&self, path: &Path) -> Option<u64> {
        let meta = fs::metadata(path).ok()?;
        (meta.is_file() && meta.len() >= self.min_size).then_some(meta.len())
    }

    /// Look for the CSV exported for `stem`. Files older than `not_before`
    /// are not considered by the recency fallback.
    #[instrument(skip(self, not_before), fields(export_dir = %self.export_dir.display()))]
    pub fn verify(&self, stem: &str, not_before: SystemTime) -> Option<Detection> {
        let expected = self.expected_path(stem);

        for attempt in 0..=self.attempts {
            if let Some(size) = self.accepted_size(&expected) {
                info!("export verified: {} ({size} bytes)", expected.display());
                return Some(Detection {
                    path: expected,
                    size,
                    kind: DetectionKind::Expected,
                    renamed: false,
                });
            }
            if attempt == self.attempts || !self.cancel.sleep(self.interval) {
                break;
            }
            debug!("{} not there yet (check {})", expected.display(), attempt + 1);
        }
        if self.cancel.is_cancelled() {
            return None;
        }

        let found = alternative_names(stem)
            .into_iter()
            .map(|name| self.export_dir.join(name))
            .find_map(|path| self.accepted_size(&path).map(|size| (path, size, DetectionKind::Alternative)))
            .or_else(|| {
                self.most_recent_csv(not_before)
                    .map(|(path, size)| (path, size, DetectionKind::Recent))
            });

        let Some((path, size, kind)) = found else {
            warn!("no CSV found for {stem} in {}", self.export_dir.display());
            return None;
        };
        info!("accepted {:?} candidate {}", kind, path.display());
        Some(self.adopt(path, size, kind, &expected))
    }

    /// Move an accepted alternative to the expected name unless that name is
    /// taken.
    fn adopt(&self, path: PathBuf, size: u64, kind: DetectionKind, expected: &Path) -> Detection {
        if path == expected {
            return Detection {
                path,
                size,
                kind,
                renamed: false,
            };
        }
        match move_no_clobber(&path, expected) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "{} already exists, keeping {}",
                    expected.display(),
                    path.display()
                );
                Detection {
                    path,
                    size,
                    kind,
                    renamed: false,
                }
            }
            Ok(()) => {
                info!("renamed {} to {}", path.display(), expected.display());
                Detection {
                    path: expected.to_path_buf(),
                    size,
                    kind,
                    renamed: true,
                }
            }
            Err(e) => {
                warn!("cannot rename {} to {}: {e}", path.display(), expected.display());
                Detection {
                    path,
                    size,
                    kind,
                    renamed: false,
                }
            }
        }
    }

    fn most_recent_csv(&self, not_before: SystemTime) -> Option<(PathBuf, u64)> {
        let now = SystemTime::now();
        let window_start = now.checked_sub(self.recent_window).unwrap_or(SystemTime::UNIX_EPOCH);
        let floor = not_before
            .checked_sub(MTIME_SLACK)
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .max(window_start);

        let entries = match fs::read_dir(&self.export_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot list {}: {e}", self.export_dir.display());
                return None;
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
            })
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok()?;
                let modified = meta.modified().ok()?;
                (meta.len() >= self.min_size && modified >= floor).then_some((path, meta.len(), modified))
            })
            .max_by_key(|(_, _, modified)| *modified)
            .map(|(path, size, _)| (path, size))
    }
}

/// Move `from` to `to`, failing with `AlreadyExists` instead of replacing
/// an existing `to`.
fn move_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(from) {
                warn!("{} linked to {} but not removed: {e}", from.display(), to.display());
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            // File systems without hard links.
            debug!("cannot link {} ({e}), renaming", from.display());
            if to.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists", to.display()),
                ));
            }
            fs::rename(from, to)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Delays;
    use tempfile::TempDir;

    fn detector(dir: &TempDir) -> FileDetector {
        let config = Config {
            export_dir: dir.path().to_path_buf(),
            delays: Delays::none(),
            ..Config::default()
        };
        FileDetector::new(&config, CancellationFlag::new())
    }

    fn write(dir: &TempDir, name: &str, bytes: usize) {
        fs::write(dir.path().join(name), "1".repeat(bytes)).unwrap();
    }

    #[test]
    fn file_names_have_a_single_dot_before_the_extension() {
        assert_eq!(csv_file_name("case-001"), "case-001.csv");
        assert_eq!(csv_file_name("site..A...v2"), "site.A.v2.csv");
        assert_eq!(csv_file_name("trailing."), "trailing.csv");
    }

    #[test]
    fn alternatives_cover_cleanup_suffix_and_digit_prefix() {
        assert_eq!(
            alternative_names("case-001"),
            vec![
                "case001.csv".to_string(),
                "case001_procesado.csv".to_string(),
                "case-001_procesado.csv".to_string(),
            ]
        );
        assert!(alternative_names("0042 site-b").contains(&"0042.csv".to_string()));
    }

    #[test]
    fn expected_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        write(&dir, "case-001.csv", 120);
        let found = detector(&dir).verify("case-001", SystemTime::now()).unwrap();
        assert_eq!(found.kind, DetectionKind::Expected);
        assert_eq!(found.size, 120);
        assert!(!found.renamed);
    }

    #[test]
    fn small_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        write(&dir, "case-001.csv", 99);
        assert!(detector(&dir).verify("case-001", SystemTime::now()).is_none());
    }

    #[test]
    fn alternative_is_renamed_to_expected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "case001_procesado.csv", 300);
        let found = detector(&dir).verify("case-001", SystemTime::now()).unwrap();
        assert_eq!(found.kind, DetectionKind::Alternative);
        assert!(found.renamed);
        assert_eq!(found.path, dir.path().join("case-001.csv"));
        assert!(!dir.path().join("case001_procesado.csv").exists());
    }

    #[test]
    fn rename_conflict_keeps_alternative_name() {
        let dir = TempDir::new().unwrap();
        // Expected name exists but is too small to accept.
        write(&dir, "case-001.csv", 5);
        write(&dir, "case001.csv", 300);
        let found = detector(&dir).verify("case-001", SystemTime::now()).unwrap();
        assert!(!found.renamed);
        assert_eq!(found.path, dir.path().join("case001.csv"));
    }

    #[test]
    fn move_never_replaces_an_existing_target() {
        let dir = TempDir::new().unwrap();
        write(&dir, "case001.csv", 300);
        write(&dir, "case-001.csv", 150);
        let from = dir.path().join("case001.csv");
        let to = dir.path().join("case-001.csv");

        let err = move_no_clobber(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::metadata(&from).unwrap().len(), 300);
        assert_eq!(fs::metadata(&to).unwrap().len(), 150);

        fs::remove_file(&to).unwrap();
        move_no_clobber(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::metadata(&to).unwrap().len(), 300);
    }

    #[test]
    fn recent_csv_is_last_resort() {
        let dir = TempDir::new().unwrap();
        let started = SystemTime::now();
        write(&dir, "whatever.csv", 500);
        let found = detector(&dir).verify("case-001", started).unwrap();
        assert_eq!(found.kind, DetectionKind::Recent);
        assert_eq!(found.path, dir.path().join("case-001.csv"));
    }

    #[test]
    fn csvs_older_than_the_export_are_ignored() {
        let dir = TempDir::new().unwrap();
        write(&dir, "old.csv", 500);
        let later = SystemTime::now() + Duration::from_secs(60);
        assert!(detector(&dir).verify("case-001", later).is_none());
    }
}
