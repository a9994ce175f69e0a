//! Sonel Batch CLI
//!
//! Exports every capture of an input directory to CSV by driving the Sonel
//! Analysis GUI, and keeps a registry of what was exported.
//!
//! Usage:
//!   sonel-batch --input-dir capturas --export-dir csv     # process pending captures
//!   sonel-batch run --force-reprocess                     # redo everything
//!   sonel-batch pending                                   # what the next run would do
//!   sonel-batch stats                                     # registry summary

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sonel_batch::{
    create_engine, pending_captures, BatchOrchestrator, CancellationFlag, Config, ExtractError,
    Language, Registry, RunOptions, RunResult, SystemProcessHost,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;

const EXIT_PARTIAL: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "sonel-batch")]
#[command(about = "Batch CSV export of Sonel Analysis captures")]
#[command(
    long_about = "Opens each capture in Sonel Analysis, exports the selected measurements to CSV and records the outcome in a JSON registry so later runs skip finished captures."
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// YAML or JSON configuration file
    #[arg(long, short = 'c', global = true, env = "SONEL_BATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the capture files and the registry
    #[arg(long, global = true, env = "SONEL_BATCH_INPUT_DIR")]
    input_dir: Option<PathBuf>,

    /// Directory the CSV files are exported to
    #[arg(long, global = true, env = "SONEL_BATCH_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// Path to SonelAnalysis.exe
    #[arg(long, global = true, env = "SONEL_BATCH_ANALYZER_EXE")]
    analyzer_exe: Option<PathBuf>,

    /// UI language tried first when matching control texts
    #[arg(long, value_enum, global = true, env = "SONEL_BATCH_LANGUAGE")]
    language: Option<LanguageArg>,

    /// Debug logging and accessibility tree dumps on failures
    #[arg(
        long,
        global = true,
        env = "SONEL_BATCH_DEBUG",
        value_parser = BoolishValueParser::new()
    )]
    debug: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Do not touch the analyzer, only report the registry
    #[arg(long)]
    skip_extraction: bool,

    /// Accepted for compatibility; loading happens outside this tool
    #[arg(long)]
    skip_load: bool,

    /// Process captures the registry already marks as succeeded
    #[arg(long)]
    force_reprocess: bool,

    /// Leave the analyzer open after a successful export
    #[arg(long)]
    no_auto_close: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export every unprocessed capture (default)
    Run(RunArgs),
    /// List the captures the next run would process
    Pending,
    /// Print registry statistics as JSON
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lower")]
enum LanguageArg {
    Es,
    En,
    Pl,
    De,
}

impl From<LanguageArg> for Language {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Es => Language::Spanish,
            LanguageArg::En => Language::English,
            LanguageArg::Pl => Language::Polish,
            LanguageArg::De => Language::German,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(cli.common.debug) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("logging disabled: {e:#}");
            None
        }
    };

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(debug: bool) -> Result<WorkerGuard> {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = if debug {
        Level::DEBUG
    } else {
        env::var("LOG_LEVEL")
            .map(|level| match level.to_lowercase().as_str() {
                "error" => Level::ERROR,
                "warn" => Level::WARN,
                "debug" => Level::DEBUG,
                "trace" => Level::TRACE,
                _ => Level::INFO,
            })
            .unwrap_or(Level::INFO)
    };

    let log_dir = match env::var("SONEL_BATCH_LOG_DIR") {
        Ok(custom_dir) => PathBuf::from(custom_dir),
        Err(_) => dirs::data_local_dir()
            .unwrap_or_else(env::temp_dir)
            .join("sonel-batch")
            .join("logs"),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(rolling::daily(&log_dir, "sonel-batch.log"));

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("tracing subscriber already installed")?;

    info!("logging to {}", log_dir.display());
    Ok(guard)
}

/// Configuration file (if any) with the command line layered on top.
fn load_config(args: &CommonArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &args.input_dir {
        config.input_dir = dir.clone();
    }
    if let Some(dir) = &args.export_dir {
        config.export_dir = dir.clone();
    }
    if let Some(exe) = &args.analyzer_exe {
        config.analyzer_exe = exe.clone();
    }
    if let Some(language) = args.language {
        config.language = Some(language.into());
    }
    config.debug |= args.debug;
    Ok(config)
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let config = load_config(&cli.common)?;
    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(config, args).await,
        Commands::Pending => pending(&config),
        Commands::Stats => stats(&config),
    }
}

async fn run(mut config: Config, args: RunArgs) -> Result<u8> {
    if args.no_auto_close {
        config.auto_close = false;
    }
    if args.skip_load {
        info!("--skip-load given; the load stage is not run by this tool");
    }
    if args.skip_extraction {
        let stats = Registry::load(config.registry_path(), config.min_csv_size).stats();
        info!(
            "extraction skipped; registry holds {} entries ({} succeeded, {} failed)",
            stats.total, stats.succeeded, stats.failed
        );
        return Ok(0);
    }

    let cancel = CancellationFlag::new();
    let listener = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current step");
                cancel.cancel();
            }
        })
    };

    let options = RunOptions {
        force_reprocess: args.force_reprocess,
    };
    let outcome = tokio::task::spawn_blocking(move || -> Result<RunResult, ExtractError> {
        let engine = create_engine()?;
        let host = Arc::new(SystemProcessHost::new());
        let mut orchestrator = BatchOrchestrator::new(config, engine, host, cancel)?;
        orchestrator.run(options)
    })
    .await
    .context("extraction task panicked")?;
    listener.abort();

    let result = outcome.context("extraction aborted")?;
    if let Some(path) = &args.summary_json {
        write_summary(path, &result)?;
    }
    println!(
        "{} succeeded, {} failed, {} skipped, {} CSVs verified{}",
        result.succeeded,
        result.failed,
        result.skipped,
        result.csvs_verified,
        if result.interrupted { " (interrupted)" } else { "" }
    );
    Ok(exit_code(&result))
}

fn pending(config: &Config) -> Result<u8> {
    config.validate()?;
    let mut registry = Registry::load(config.registry_path(), config.min_csv_size);
    let captures = pending_captures(config, &mut registry)?;
    for capture in &captures {
        println!("{}", capture.display());
    }
    info!("{} captures pending", captures.len());
    Ok(0)
}

fn stats(config: &Config) -> Result<u8> {
    let registry = Registry::load(config.registry_path(), config.min_csv_size);
    println!("{}", serde_json::to_string_pretty(&registry.stats())?);
    Ok(0)
}

fn write_summary(path: &Path, result: &RunResult) -> Result<()> {
    let body = serde_json::to_string_pretty(result)?;
    fs::write(path, body).with_context(|| format!("failed to write summary {}", path.display()))?;
    info!("summary written to {}", path.display());
    Ok(())
}

fn exit_code(result: &RunResult) -> u8 {
    if result.interrupted {
        EXIT_INTERRUPTED
    } else if result.failed > 0 {
        EXIT_PARTIAL
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_is_the_default_command() {
        let cli = Cli::try_parse_from(["sonel-batch", "--input-dir", "capturas"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.common.input_dir, Some(PathBuf::from("capturas")));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "sonel-batch",
            "run",
            "--force-reprocess",
            "--no-auto-close",
            "--language",
            "pl",
            "--summary-json",
            "out.json",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert!(args.force_reprocess && args.no_auto_close);
        assert!(!args.skip_extraction);
        assert_eq!(args.summary_json, Some(PathBuf::from("out.json")));
        assert_eq!(cli.common.language, Some(LanguageArg::Pl));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sonel.yaml");
        fs::write(
            &file,
            "input_dir: from-file\nexport_dir: csv-file\nauto_close: false\ndelays:\n  between_files: 1.5\n",
        )
        .unwrap();
        let cli = Cli::try_parse_from([
            "sonel-batch",
            "--config",
            file.to_str().unwrap(),
            "--input-dir",
            "from-flag",
            "--language",
            "de",
        ])
        .unwrap();

        let config = load_config(&cli.common).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("from-flag"));
        assert_eq!(config.export_dir, PathBuf::from("csv-file"));
        assert!(!config.auto_close);
        assert_eq!(config.delays.between_files, 1.5);
        assert_eq!(config.delays.startup_wait, 10.0);
        assert_eq!(config.language, Some(Language::German));
    }

    #[test]
    fn test_exit_codes() {
        let mut result = RunResult::default();
        assert_eq!(exit_code(&result), 0);
        result.skipped = 3;
        assert_eq!(exit_code(&result), 0);
        result.failed = 1;
        assert_eq!(exit_code(&result), EXIT_PARTIAL);
        result.interrupted = true;
        assert_eq!(exit_code(&result), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_pending_lists_unprocessed_captures() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.pqm702"), b"x").unwrap();
        fs::write(dir.path().join("b.pqm702"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(
            dir.path().join("procesados.json"),
            r#"{"a.pqm702": {"nombre": "a", "extension": ".pqm702", "fecha": "2024-01-01T00:00:00+00:00", "exitoso": true}}"#,
        )
        .unwrap();
        let config = Config {
            input_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let mut registry = Registry::load(config.registry_path(), config.min_csv_size);
        let names: Vec<String> = pending_captures(&config, &mut registry)
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        assert_eq!(names, ["b.pqm702"]);
        assert_eq!(pending(&config).unwrap(), 0);
    }
}
