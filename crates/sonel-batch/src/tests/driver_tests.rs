use super::init_tracing;
use super::mock_desktop::{labels, MockAnalyzer};
use crate::config::{Config, Delays};
use crate::desktop::Desktop;
use crate::drivers::{AnalysisState, AnalysisWindowDriver, ConfigurationWindowDriver, DriverContext};
use crate::element::ControlRole;
use crate::errors::ExtractError;
use crate::locale::{Language, LocaleDictionary};
use crate::retry::CancellationFlag;
use crate::supervisor::{AppHandle, ProcessSupervisor};
use crate::wait::Waiter;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

struct Rig {
    analyzer: MockAnalyzer,
    config: Config,
    desktop: Desktop,
    locale: LocaleDictionary,
    supervisor: ProcessSupervisor,
    _export: TempDir,
}

fn rig(language: Language) -> Rig {
    init_tracing();
    let analyzer = MockAnalyzer::new(language);
    let export = TempDir::new().unwrap();
    let config = Config {
        export_dir: export.path().to_path_buf(),
        delays: Delays::none(),
        wait_poll_interval_ms: 1,
        ..Config::default()
    };
    let cancel = CancellationFlag::new();
    Rig {
        desktop: Desktop::new(analyzer.engine(), &config, cancel.clone()),
        locale: LocaleDictionary::new(None, ".pqm"),
        supervisor: ProcessSupervisor::new(analyzer.host(), &config, cancel),
        analyzer,
        config,
        _export: export,
    }
}

fn app(pid: u32) -> AppHandle {
    AppHandle {
        pid,
        started_by_us: true,
    }
}

#[test]
fn test_analysis_driver_hands_off_configuration_window() {
    let rig = rig(Language::Polish);
    let pid = rig.analyzer.launch("case-001.pqm702");
    let ctx = DriverContext::new(&rig.desktop, &rig.locale, &rig.config);

    let mut driver = AnalysisWindowDriver::new(ctx);
    assert_eq!(driver.state(), AnalysisState::Disconnected);
    let handoff = driver.run(&app(pid), &rig.supervisor).unwrap();

    assert_eq!(driver.state(), AnalysisState::HandedOff);
    assert_eq!(handoff.top_window.name().unwrap(), "Sonel Analysis 4");
    assert_eq!(
        handoff.analysis_window.name().unwrap(),
        "Analiza - case-001.pqm702"
    );
    assert_eq!(
        handoff.configuration_window.unwrap().name().unwrap(),
        "Analiza - case-001.pqm702 - Konfiguracja 1"
    );
}

#[test]
fn test_analysis_driver_fails_without_configuration_node() {
    let rig = rig(Language::Spanish);
    rig.analyzer
        .world()
        .captures_without_configuration_node
        .push("case-001.pqm702".to_string());
    let pid = rig.analyzer.launch("case-001.pqm702");
    let ctx = DriverContext::new(&rig.desktop, &rig.locale, &rig.config);

    let mut driver = AnalysisWindowDriver::new(ctx);
    let err = driver.run(&app(pid), &rig.supervisor).unwrap_err();
    assert!(matches!(err, ExtractError::Phase { phase: "analysis window", .. }));
    assert_eq!(driver.state(), AnalysisState::Failed);
}

#[test]
fn test_analysis_driver_fails_when_no_window_appears() {
    let rig = rig(Language::Spanish);
    let ctx = DriverContext::new(&rig.desktop, &rig.locale, &rig.config);

    let mut driver = AnalysisWindowDriver::new(ctx);
    let err = driver.run(&app(999), &rig.supervisor).unwrap_err();
    assert!(err.to_string().contains("no analysis window"));
    assert_eq!(driver.state(), AnalysisState::Failed);
}

#[test]
fn test_configuration_driver_types_the_export_path() {
    let rig = rig(Language::German);
    let pid = rig.analyzer.launch("case-002.pqm702");
    let ctx = DriverContext::new(&rig.desktop, &rig.locale, &rig.config);
    let handoff = AnalysisWindowDriver::new(ctx)
        .run(&app(pid), &rig.supervisor)
        .unwrap();

    let report = ConfigurationWindowDriver::new(ctx)
        .run(&app(pid), &handoff, "case-002")
        .unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.selected.len(), 7);
    assert!(report.requested_path.is_absolute());
    assert!(report.requested_path.ends_with("case-002.csv"));
    assert_eq!(
        rig.analyzer.world().saved_paths,
        vec![report.requested_path.clone()]
    );
}

#[test]
fn test_element_reads_through_the_facade() {
    let rig = rig(Language::English);
    rig.analyzer.launch("case-001.pqm702");
    let l = labels(Language::English);
    let button = rig.analyzer.find(l.analysis_data);

    assert_eq!(rig.desktop.text(&button).unwrap(), l.analysis_data);
    assert!(rig.desktop.automation_id(&button).unwrap().starts_with("node-"));
    let rect = rig.desktop.rectangle(&button).unwrap();
    assert!(!rect.is_empty());

    let window = rig.analyzer.find("Analysis - case-001.pqm702");
    let waiter = Waiter::new(&rig.desktop, Duration::from_millis(1));
    assert!(waiter.wait_controls_available(
        &window,
        &[ControlRole::Tree, ControlRole::Button],
        Duration::ZERO
    ));
    assert!(!waiter.wait_controls_available(&window, &[ControlRole::DataGrid], Duration::ZERO));
    assert!(waiter.wait_window_ready(&window, Duration::ZERO));
}

#[test]
fn test_launch_respawns_once_after_an_immediate_exit() {
    let rig = rig(Language::English);
    rig.analyzer.world().exit_on_launch = 1;

    let app = rig.supervisor.launch(Path::new("case-001.pqm702")).unwrap();
    assert!(app.started_by_us);
    let world = rig.analyzer.world();
    assert_eq!(world.launches, 2);
    assert_eq!(world.running(), 1);
}

#[test]
fn test_launch_gives_up_after_a_second_immediate_exit() {
    let rig = rig(Language::English);
    rig.analyzer.world().exit_on_launch = 2;

    let err = rig.supervisor.launch(Path::new("case-001.pqm702")).unwrap_err();
    assert!(matches!(err, ExtractError::Phase { phase: "launch", .. }), "{err}");
    let world = rig.analyzer.world();
    assert_eq!(world.launches, 2);
    assert_eq!(world.running(), 0);
}

#[test]
fn test_filters_continue_past_a_checkbox_that_cannot_be_set() {
    let rig = rig(Language::English);
    let l = labels(Language::English);
    rig.analyzer.world().locked_toggles.push(l.average.to_string());
    let pid = rig.analyzer.launch("case-003.pqm702");
    let ctx = DriverContext::new(&rig.desktop, &rig.locale, &rig.config);
    let handoff = AnalysisWindowDriver::new(ctx)
        .run(&app(pid), &rig.supervisor)
        .unwrap();

    let report = ConfigurationWindowDriver::new(ctx)
        .run(&app(pid), &handoff, "case-003")
        .unwrap();
    assert_eq!(report.warnings.len(), 1, "{:?}", report.warnings);
    assert!(report.warnings[0].starts_with("filters:"), "{:?}", report.warnings);
    assert!(report.warnings[0].contains("average"), "{:?}", report.warnings);

    let world = rig.analyzer.world();
    assert_eq!(world.toggle_named(l.average), Some(false));
    // Checkboxes after the locked one are still brought to the wanted state.
    assert_eq!(world.toggle_named(l.maximum), Some(false));
}
