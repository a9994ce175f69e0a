//! End-to-end batch runs against the mock analyzer.

use super::init_tracing;
use super::mock_desktop::{labels, MockAnalyzer, SELECTION_WORTHY_ROWS, TREE_ROWS};
use crate::config::{Config, Delays};
use crate::detector::DetectionKind;
use crate::errors::ExtractError;
use crate::locale::Language;
use crate::orchestrator::{BatchOrchestrator, CaptureStatus, RunOptions, RunResult};
use crate::retry::CancellationFlag;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Batch {
    analyzer: MockAnalyzer,
    input: TempDir,
    export: TempDir,
    config: Config,
    cancel: CancellationFlag,
}

impl Batch {
    fn new(language: Language) -> Self {
        init_tracing();
        let input = TempDir::new().unwrap();
        let export = TempDir::new().unwrap();
        let config = Config {
            input_dir: input.path().to_path_buf(),
            export_dir: export.path().to_path_buf(),
            analyzer_exe: PathBuf::from("SonelAnalysis.exe"),
            delays: Delays::none(),
            wait_poll_interval_ms: 1,
            ..Config::default()
        };
        Self {
            analyzer: MockAnalyzer::new(language),
            input,
            export,
            config,
            cancel: CancellationFlag::new(),
        }
    }

    fn add_capture(&self, name: &str) {
        fs::write(self.input.path().join(name), b"PQM702 capture").unwrap();
    }

    fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(
            self.config.clone(),
            self.analyzer.engine(),
            self.analyzer.host(),
            self.cancel.clone(),
        )
        .unwrap()
    }

    fn run(&self) -> RunResult {
        self.orchestrator().run(RunOptions::default()).unwrap()
    }

    fn csv(&self, name: &str) -> PathBuf {
        self.export.path().join(name)
    }

    fn registry(&self) -> Map<String, Value> {
        let raw = fs::read_to_string(self.config.registry_path()).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn entry(&self, capture: &str) -> Map<String, Value> {
        match self.registry().remove(capture) {
            Some(Value::Object(entry)) => entry,
            other => panic!("no registry entry for {capture}: {other:?}"),
        }
    }
}

#[test]
fn test_empty_input_directory() {
    let batch = Batch::new(Language::Spanish);
    let result = batch.run();

    assert_eq!(
        (result.succeeded, result.failed, result.skipped, result.csvs_verified),
        (0, 0, 0, 0)
    );
    assert!(!result.interrupted);
    assert!(!batch.config.registry_path().exists());
    assert_eq!(batch.analyzer.world().launches, 0);
}

#[test]
fn test_single_capture_is_exported_and_recorded() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("case-001.pqm702");

    let result = batch.run();
    assert_eq!((result.succeeded, result.failed, result.csvs_verified), (1, 0, 1));
    let outcome = &result.captures[0];
    assert_eq!(outcome.status, CaptureStatus::Succeeded);
    assert_eq!(outcome.detection, Some(DetectionKind::Expected));
    assert_eq!(outcome.csv.as_deref(), Some("case-001.csv"));

    let csv = batch.csv("case-001.csv");
    let size = fs::metadata(&csv).unwrap().len();
    assert!(size >= 100, "csv only {size} bytes");
    let header = fs::read_to_string(&csv).unwrap();
    for index in SELECTION_WORTHY_ROWS {
        assert!(header.contains(TREE_ROWS[*index]), "{} missing", TREE_ROWS[*index]);
    }

    let entry = batch.entry("case-001.pqm702");
    assert_eq!(entry["nombre"], "case-001");
    assert_eq!(entry["extension"], ".pqm702");
    assert_eq!(entry["exitoso"], true);
    assert_eq!(entry["csv_generado"], "case-001.csv");
    assert_eq!(entry["csv_size"], size);
    assert_eq!(entry["csv_verificado"], true);
    assert!(chrono::DateTime::parse_from_rfc3339(entry["fecha"].as_str().unwrap()).is_ok());

    let world = batch.analyzer.world();
    assert_eq!(world.launches, 1);
    assert_eq!(world.max_concurrent, 1);
    assert_eq!(world.running(), 0, "analyzer left running with auto_close");
    assert_eq!(world.checked_rows(), SELECTION_WORTHY_ROWS);

    let l = labels(Language::Spanish);
    assert_eq!(world.toggle_named(l.user), Some(true));
    assert_eq!(world.toggle_named(l.average), Some(true));
    assert_eq!(world.toggle_named(l.minimum), Some(false));
    assert_eq!(world.toggle_named(l.maximum), Some(false));
    assert_eq!(world.toggle_named(l.select_all), Some(false));
}

#[test]
fn test_rerun_skips_processed_captures_without_touching_the_analyzer() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("case-001.pqm702");
    assert_eq!(batch.run().succeeded, 1);

    let registry_before = fs::read(batch.config.registry_path()).unwrap();
    let (launches, calls) = {
        let world = batch.analyzer.world();
        (world.launches, world.calls)
    };

    let result = batch.run();
    assert_eq!((result.succeeded, result.failed, result.skipped), (0, 0, 1));
    assert_eq!(result.captures[0].status, CaptureStatus::Skipped);

    let world = batch.analyzer.world();
    assert_eq!(world.launches, launches);
    assert_eq!(world.calls, calls);
    assert_eq!(fs::read(batch.config.registry_path()).unwrap(), registry_before);
}

#[test]
fn test_failed_entry_is_retried() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("case-001.pqm702");
    fs::write(
        batch.config.registry_path(),
        r#"{
  "case-001.pqm702": {
    "nombre": "case-001",
    "extension": ".pqm702",
    "fecha": "2024-01-01T08:00:00+01:00",
    "exitoso": false,
    "operador": "lab-2"
  }
}"#,
    )
    .unwrap();

    let result = batch.run();
    assert_eq!((result.succeeded, result.skipped), (1, 0));
    let entry = batch.entry("case-001.pqm702");
    assert_eq!(entry["exitoso"], true);
    assert_eq!(entry["csv_generado"], "case-001.csv");
    assert_eq!(entry["operador"], "lab-2");
    assert_ne!(entry["fecha"], "2024-01-01T08:00:00+01:00");
}

#[test]
fn test_alternative_csv_name_is_renamed() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("case-001.pqm702");
    batch.analyzer.world().alternative_csv_name = Some("case001_procesado.csv".to_string());

    let result = batch.run();
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.captures[0].detection, Some(DetectionKind::Alternative));
    assert!(batch.csv("case-001.csv").exists());
    assert!(!batch.csv("case001_procesado.csv").exists());
    assert_eq!(batch.entry("case-001.pqm702")["csv_generado"], "case-001.csv");
}

#[test]
fn test_every_language_produces_the_same_export() {
    let mut exports = Vec::new();
    for language in Language::ALL {
        let batch = Batch::new(language);
        batch.add_capture("case-001.pqm702");
        let result = batch.run();
        assert_eq!(result.succeeded, 1, "{language:?}: {:?}", result.captures);

        let mut entry = batch.entry("case-001.pqm702");
        entry.remove("fecha");
        let csv = fs::read(batch.csv("case-001.csv")).unwrap();
        exports.push((language, csv, entry));
    }

    let (_, first_csv, first_entry) = &exports[0];
    for (language, csv, entry) in &exports[1..] {
        assert_eq!(csv, first_csv, "{language:?} csv differs");
        assert_eq!(entry, first_entry, "{language:?} registry entry differs");
    }
}

#[test]
fn test_tree_selection_does_not_depend_on_scroll_position() {
    for offset in [0, 3, 5, 8] {
        let batch = Batch::new(Language::English);
        batch.add_capture("case-001.pqm702");
        batch.analyzer.world().initial_offset = offset;

        assert_eq!(batch.run().succeeded, 1, "offset {offset}");
        assert_eq!(
            batch.analyzer.world().checked_rows(),
            SELECTION_WORTHY_ROWS,
            "offset {offset}"
        );
    }
}

#[test]
fn test_phase_failure_is_recorded_and_batch_continues() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("b-good.pqm702");
    batch.add_capture("a-broken.pqm702");
    batch
        .analyzer
        .world()
        .captures_without_configuration_node
        .push("a-broken.pqm702".to_string());

    let result = batch.run();
    assert_eq!((result.succeeded, result.failed), (1, 1));
    let names: Vec<&str> = result.captures.iter().map(|c| c.capture.as_str()).collect();
    assert_eq!(names, ["a-broken.pqm702", "b-good.pqm702"]);
    assert!(result.captures[0]
        .failure
        .as_deref()
        .unwrap()
        .contains("configuration node"));

    let broken = batch.entry("a-broken.pqm702");
    assert_eq!(broken["exitoso"], false);
    assert!(!broken.contains_key("csv_generado"));
    assert!(!broken.contains_key("csv_verificado"));
    assert_eq!(batch.entry("b-good.pqm702")["exitoso"], true);
    assert!(!batch.csv("a-broken.csv").exists());

    let world = batch.analyzer.world();
    assert_eq!(world.running(), 0);
    assert_eq!(world.max_concurrent, 1);
    drop(world);

    let pending = batch.orchestrator().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].ends_with("a-broken.pqm702"));
}

#[test]
fn test_only_one_analyzer_runs_at_a_time() {
    let mut batch = Batch::new(Language::Spanish);
    batch.config.auto_close = false;
    batch.add_capture("case-001.pqm702");
    batch.add_capture("case-002.pqm702");
    batch.analyzer.launch("leftover.pqm702");

    let result = batch.run();
    assert_eq!(result.succeeded, 2);

    let world = batch.analyzer.world();
    assert_eq!(world.launches, 3);
    assert_eq!(world.max_concurrent, 1);
    // auto_close off keeps the last analyzer open.
    assert_eq!(world.running(), 1);
}

#[test]
fn test_force_reprocess_runs_succeeded_captures_again() {
    let batch = Batch::new(Language::Polish);
    batch.add_capture("case-001.pqm702");
    assert_eq!(batch.run().succeeded, 1);

    let result = batch
        .orchestrator()
        .run(RunOptions {
            force_reprocess: true,
        })
        .unwrap();
    assert_eq!((result.succeeded, result.skipped), (1, 0));
    assert_eq!(batch.analyzer.world().launches, 2);
}

#[test]
fn test_interrupt_during_launch_stops_the_batch() {
    let batch = Batch::new(Language::German);
    batch.add_capture("case-001.pqm702");
    batch.add_capture("case-002.pqm702");
    batch.analyzer.world().cancel_on_launch = Some(batch.cancel.clone());

    let result = batch.run();
    assert!(result.interrupted);
    assert_eq!(result.captures.len(), 1);
    assert_eq!(result.failed, 1);

    let registry = batch.registry();
    assert_eq!(registry.len(), 1);
    assert_eq!(batch.entry("case-001.pqm702")["exitoso"], false);
    assert_eq!(batch.analyzer.world().running(), 0);
}

#[test]
fn test_parent_and_child_rows_sharing_a_label_are_both_selected() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("case-001.pqm702");
    batch.analyzer.world().tree_layout = vec![
        ("Frecuencia f", 0),
        ("Tensión U", 0),
        ("Tensión U", 1),
        ("Corriente I", 1),
        ("Potencia P", 0),
        ("Potencia P", 1),
        ("Energía E", 0),
    ];

    let result = batch.run();
    assert_eq!(result.succeeded, 1, "{:?}", result.captures);
    // Scrolling re-renders every row under a new key; none is toggled back off.
    assert_eq!(batch.analyzer.world().checked_rows(), [1, 2, 4, 5]);
}

#[test]
fn test_registry_write_failure_aborts_the_run() {
    let batch = Batch::new(Language::Spanish);
    batch.add_capture("case-001.pqm702");
    batch.add_capture("case-002.pqm702");
    // The temporary sibling cannot be created while a directory holds its name.
    let mut tmp = batch.config.registry_path().into_os_string();
    tmp.push(".tmp");
    fs::create_dir(PathBuf::from(tmp)).unwrap();

    let err = batch.orchestrator().run(RunOptions::default()).unwrap_err();
    assert!(matches!(err, ExtractError::Registry { .. }), "{err}");
    assert!(!batch.config.registry_path().exists());

    let world = batch.analyzer.world();
    assert_eq!(world.launches, 1, "a later capture was started");
    assert_eq!(world.running(), 0);
}

#[test]
fn test_launch_falls_back_to_the_running_analyzer() {
    let batch = Batch::new(Language::English);
    batch.add_capture("case-001.pqm702");
    batch.analyzer.world().single_instance = true;

    let result = batch.run();
    assert_eq!(result.succeeded, 1, "{:?}", result.captures);
    assert_eq!(batch.entry("case-001.pqm702")["exitoso"], true);
    assert!(batch.csv("case-001.csv").exists());

    let world = batch.analyzer.world();
    assert_eq!(world.launches, 2);
    assert_eq!(world.max_concurrent, 1);
    assert_eq!(world.running(), 0);
}
