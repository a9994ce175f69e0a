//! Durable record of per-capture outcomes.
//!
//! The registry is a single JSON object keyed by capture file name, stored
//! next to the captures. Entries are kept as raw JSON objects so that fields
//! written by other tools, and the order of keys, survive a rewrite.

use crate::errors::ExtractError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const KEY_BASENAME: &str = "nombre";
const KEY_EXTENSION: &str = "extension";
const KEY_TIMESTAMP: &str = "fecha";
const KEY_SUCCEEDED: &str = "exitoso";
const KEY_CSV_NAME: &str = "csv_generado";
const KEY_CSV_SIZE: &str = "csv_size";
const KEY_CSV_VERIFIED: &str = "csv_verificado";

/// Typed view of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(rename = "nombre")]
    pub basename: String,
    pub extension: String,
    #[serde(rename = "fecha")]
    pub timestamp: String,
    #[serde(rename = "exitoso")]
    pub succeeded: bool,
    #[serde(rename = "csv_generado", default, skip_serializing_if = "Option::is_none")]
    pub exported_csv_filename: Option<String>,
    #[serde(rename = "csv_size", default, skip_serializing_if = "Option::is_none")]
    pub exported_csv_size: Option<u64>,
    #[serde(rename = "csv_verificado", default, skip_serializing_if = "Option::is_none")]
    pub csv_verified: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegistryEntry {
    pub fn is_verified(&self) -> bool {
        self.csv_verified.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub latest_timestamp: Option<String>,
}

enum Snapshot {
    Missing,
    Parsed(Map<String, Value>),
    Corrupt(String),
}

fn read_snapshot(path: &Path) -> io::Result<Snapshot> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::Missing),
        Err(e) => return Err(e),
    };
    if raw.trim().is_empty() {
        return Ok(Snapshot::Missing);
    }
    Ok(match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Snapshot::Parsed(map),
        Ok(other) => Snapshot::Corrupt(format!("top-level value is not an object: {other}")),
        Err(e) => Snapshot::Corrupt(e.to_string()),
    })
}

pub struct Registry {
    path: PathBuf,
    entries: Map<String, Value>,
    min_csv_size: u64,
}

impl Registry {
    /// Read the registry at `path`. A missing, unreadable or corrupt file
    /// yields an empty registry; nothing is written until the first record.
    pub fn load(path: impl Into<PathBuf>, min_csv_size: u64) -> Self {
        let path = path.into();
        let entries = match read_snapshot(&path) {
            Ok(Snapshot::Missing) => Map::new(),
            Ok(Snapshot::Parsed(map)) => map,
            Ok(Snapshot::Corrupt(reason)) => {
                warn!("registry {} is corrupt ({reason}); starting empty", path.display());
                Map::new()
            }
            Err(e) => {
                warn!("cannot read registry {}: {e}; starting empty", path.display());
                Map::new()
            }
        };
        debug!("registry {} loaded with {} entries", path.display(), entries.len());
        Self {
            path,
            entries,
            min_csv_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-read the file. On an IO error the in-memory view is kept and
    /// `false` is returned.
    fn refresh(&mut self) -> bool {
        match read_snapshot(&self.path) {
            Ok(Snapshot::Missing) => {
                self.entries = Map::new();
                true
            }
            Ok(Snapshot::Parsed(map)) => {
                self.entries = map;
                true
            }
            Ok(Snapshot::Corrupt(reason)) => {
                warn!("registry {} is corrupt ({reason}); treating as empty", self.path.display());
                self.entries = Map::new();
                true
            }
            Err(e) => {
                warn!("cannot re-read registry {}: {e}", self.path.display());
                false
            }
        }
    }

    /// True iff the capture has an entry that succeeded. Reads the file
    /// afresh; a read failure answers `false` for this check only.
    pub fn is_processed(&mut self, capture_filename: &str) -> bool {
        if !self.refresh() {
            return false;
        }
        self.get(capture_filename).map(|e| e.succeeded).unwrap_or(false)
    }

    pub fn get(&self, capture_filename: &str) -> Option<RegistryEntry> {
        let value = self.entries.get(capture_filename)?;
        match serde_json::from_value(value.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("registry entry {capture_filename} is malformed: {e}");
                None
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, RegistryEntry)> + '_ {
        self.entries.iter().filter_map(|(name, value)| {
            serde_json::from_value::<RegistryEntry>(value.clone())
                .ok()
                .map(|entry| (name, entry))
        })
    }

    /// Upsert the entry for `capture_filename` and persist the registry.
    ///
    /// A success without a CSV of at least the minimum size on disk is
    /// recorded as a failure. Failed entries carry no CSV fields.
    pub fn record(
        &mut self,
        capture_filename: &str,
        succeeded: bool,
        csv_path: Option<&Path>,
    ) -> Result<RegistryEntry, ExtractError> {
        let csv = csv_path.and_then(|path| {
            let size = fs::metadata(path).ok()?.len();
            let name = path.file_name()?.to_string_lossy().to_string();
            (size >= self.min_csv_size).then_some((name, size))
        });
        let succeeded = match (succeeded, &csv) {
            (true, None) => {
                warn!("{capture_filename}: success reported without a valid CSV, recording failure");
                false
            }
            (ok, _) => ok,
        };

        let capture = Path::new(capture_filename);
        let basename = capture
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| capture_filename.to_string());
        let extension = capture
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut object = match self.entries.get(capture_filename) {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        object.insert(KEY_BASENAME.into(), Value::from(basename));
        object.insert(KEY_EXTENSION.into(), Value::from(extension));
        object.insert(
            KEY_TIMESTAMP.into(),
            Value::from(chrono::Local::now().to_rfc3339()),
        );
        object.insert(KEY_SUCCEEDED.into(), Value::from(succeeded));
        match csv.filter(|_| succeeded) {
            Some((name, size)) => {
                object.insert(KEY_CSV_NAME.into(), Value::from(name));
                object.insert(KEY_CSV_SIZE.into(), Value::from(size));
                object.insert(KEY_CSV_VERIFIED.into(), Value::from(true));
            }
            None => {
                object.shift_remove(KEY_CSV_NAME);
                object.shift_remove(KEY_CSV_SIZE);
                object.shift_remove(KEY_CSV_VERIFIED);
            }
        }

        let entry: RegistryEntry = serde_json::from_value(Value::Object(object.clone()))
            .map_err(|e| ExtractError::Registry {
                path: self.path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?;
        self.entries.insert(capture_filename.to_string(), Value::Object(object));
        self.persist()?;
        info!(
            "registry: {capture_filename} recorded as {}",
            if succeeded { "succeeded" } else { "failed" }
        );
        Ok(entry)
    }

    /// Rewrite the whole file through a temporary sibling and a rename,
    /// retrying once.
    pub fn persist(&self) -> Result<(), ExtractError> {
        let body = serde_json::to_string_pretty(&self.entries).map_err(|e| ExtractError::Registry {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        match self.write_atomically(&body) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("registry write failed ({first}), retrying once");
                self.write_atomically(&body).map_err(|source| ExtractError::Registry {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    fn write_atomically(&self, body: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Directories cannot be opened for sync on every platform.
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        let mut latest: Option<(chrono::DateTime<chrono::FixedOffset>, String)> = None;
        for (_, entry) in self.entries() {
            stats.total += 1;
            if entry.succeeded {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            if let Ok(at) = chrono::DateTime::parse_from_rfc3339(&entry.timestamp) {
                if latest.as_ref().map(|(best, _)| at > *best).unwrap_or(true) {
                    latest = Some((at, entry.timestamp.clone()));
                }
            }
        }
        stats.latest_timestamp = latest.map(|(_, raw)| raw);
        stats
    }
}
