//! Command-line runner for reconciliation batches
//!
//! Loads desired records and the current store contents from JSON files,
//! runs a batch against an in-memory store and renders the report.

#![warn(unreachable_pub)]

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use recon_core::{
    BatchMode, BatchScheduler, DesiredRecord, FailurePolicy, NewRecord, ReconcileConfig,
    ReconciliationPlanner,
};
use recon_store::InMemoryRecordStore;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What to do with the desired records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run a batch
    Batch(BatchMode),
    /// Report planned actions without writing
    Plan,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Parsed command line
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Selected subcommand
    pub mode: Mode,
    /// Desired records file
    pub desired: PathBuf,
    /// Current store contents file
    pub existing: Option<PathBuf>,
    /// Effective configuration after flag overrides
    pub config: ReconcileConfig,
    /// Render the report as JSON
    pub json: bool,
    /// Where to write the final store contents
    pub output: Option<PathBuf>,
    /// Log output format
    pub log_format: LogFormat,
}

/// Rendered result of an invocation
#[derive(Debug, Clone)]
pub struct Execution {
    /// Report text for stdout
    pub rendered: String,
    /// Whether every record converged
    pub success: bool,
}

fn input_args() -> [Arg; 4] {
    [
        Arg::new("desired")
            .long("desired")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("JSON array of desired records"),
        Arg::new("existing")
            .long("existing")
            .value_parser(value_parser!(PathBuf))
            .help("JSON array of records currently in the store"),
        Arg::new("config")
            .long("config")
            .value_parser(value_parser!(PathBuf))
            .help("TOML configuration file"),
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Output as JSON"),
    ]
}

fn batch_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .args(input_args())
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .value_parser(value_parser!(usize))
                .help("Records reconciled concurrently per chunk"),
        )
        .arg(
            Arg::new("continue-on-error")
                .long("continue-on-error")
                .action(ArgAction::SetTrue)
                .help("Keep scheduling chunks after a failure"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Write the resulting store contents to this file"),
        )
}

/// Build the `recon` command
#[must_use]
pub fn command() -> Command {
    Command::new("recon")
        .version(recon_core::VERSION)
        .about("Reconcile desired records against a record store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .subcommand(batch_command("update", "Converge existing records onto desired state"))
        .subcommand(batch_command("install", "Create records that do not exist yet"))
        .subcommand(
            Command::new("plan")
                .about("Show planned actions without writing")
                .args(input_args()),
        )
}

impl Invocation {
    /// Resolve parsed arguments into an invocation
    ///
    /// # Errors
    /// Returns an error if the config file cannot be loaded or a flag
    /// override is invalid.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let log_format = match matches.get_one::<String>("log-format").map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let (mode, args) = match matches.subcommand() {
            Some(("update", args)) => (Mode::Batch(BatchMode::Update), args),
            Some(("install", args)) => (Mode::Batch(BatchMode::Install), args),
            Some(("plan", args)) => (Mode::Plan, args),
            _ => anyhow::bail!("no subcommand given"),
        };

        let mut config = match args.get_one::<PathBuf>("config") {
            Some(path) => ReconcileConfig::load(path)?,
            None => ReconcileConfig::default(),
        };

        if mode != Mode::Plan {
            if let Some(&size) = args.get_one::<usize>("chunk-size") {
                config = config.with_chunk_size(size)?;
            }
            if args.get_flag("continue-on-error") {
                config = config.with_failure_policy(FailurePolicy::Continue);
            }
        }

        let desired = args
            .get_one::<PathBuf>("desired")
            .cloned()
            .context("--desired is required")?;

        Ok(Self {
            mode,
            desired,
            existing: args.get_one::<PathBuf>("existing").cloned(),
            config,
            json: args.get_flag("json"),
            output: if mode == Mode::Plan {
                None
            } else {
                args.get_one::<PathBuf>("output").cloned()
            },
            log_format,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Run an invocation
///
/// # Errors
/// Returns an error if an input file cannot be read or parsed, the
/// existing records repeat a record id, or the output file cannot be
/// written. Record failures are not errors; they are reported through
/// `Execution::success`.
pub async fn execute(invocation: &Invocation) -> Result<Execution> {
    let desired: Vec<DesiredRecord> = read_json(&invocation.desired)?;
    let store = Arc::new(InMemoryRecordStore::new());
    let seeded = match &invocation.existing {
        Some(path) => {
            let existing: Vec<NewRecord> = read_json(path)?;
            store
                .seed(existing)
                .with_context(|| format!("invalid existing records in {}", path.display()))?
        }
        None => Vec::new(),
    };
    tracing::info!(
        desired = desired.len(),
        seeded = seeded.len(),
        "loaded records"
    );

    let planner = ReconciliationPlanner::from_config(store.clone(), &invocation.config);

    let mode = match invocation.mode {
        Mode::Plan => return Ok(preview(&planner, &desired, invocation.json).await),
        Mode::Batch(mode) => mode,
    };

    let scheduler = BatchScheduler::new(Arc::new(planner), &invocation.config);
    let report = scheduler.run(mode, &desired).await;

    if let Some(path) = &invocation.output {
        let snapshot = serde_json::to_string_pretty(&store.snapshot())?;
        std::fs::write(path, snapshot)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), records = store.len(), "wrote store snapshot");
    }

    let rendered = if invocation.json {
        serde_json::to_string_pretty(&report.to_json())?
    } else {
        report.render_text()
    };

    Ok(Execution {
        rendered,
        success: report.is_success(),
    })
}

async fn preview(
    planner: &ReconciliationPlanner,
    desired: &[DesiredRecord],
    as_json: bool,
) -> Execution {
    let mut entries = Vec::with_capacity(desired.len());
    let mut success = true;
    for record in desired {
        let entry = match planner.preview(record).await {
            Ok(action) => json!({ "record_id": record.record_id, "plan": action }),
            Err(error) => {
                success = false;
                json!({ "record_id": record.record_id, "error": error.to_string() })
            }
        };
        entries.push(entry);
    }

    let rendered = if as_json {
        serde_json::to_string_pretty(&Value::Array(entries)).unwrap_or_default()
    } else {
        render_plan(&entries)
    };
    Execution { rendered, success }
}

fn render_plan(entries: &[Value]) -> String {
    let mut out = String::new();
    for entry in entries {
        let record_id = entry["record_id"].as_str().unwrap_or_default();
        if let Some(error) = entry["error"].as_str() {
            let _ = writeln!(out, "  {record_id}: error: {error}");
            continue;
        }
        let action = entry["plan"]["action"].as_str().unwrap_or("unknown");
        let _ = writeln!(out, "  {record_id}: {action}");
    }
    let _ = write!(out, "{} record(s) planned", entries.len());
    out
}
