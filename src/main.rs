use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bpmflow_engine::{
  ElementGraph, EngineConfig, ProcessHooks, ProcessInstance, ProcessSnapshot, StateLogLevel,
};

mod conditions;

/// bpmflow - runs BPMN-style process definitions
#[derive(Parser)]
#[command(name = "bpmflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.bpmflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine settings file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Threshold of the log kept with the process state (none, error, warn, info, debug)
  #[arg(long, global = true)]
  state_log_level: Option<StateLogLevel>,

  /// How long to wait for the process to complete before suspending it
  #[arg(long, global = true, default_value_t = 30_000)]
  timeout_ms: u64,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a definition and report every structural problem
  Validate {
    /// Path to the definition file (JSON)
    definition_file: PathBuf,
  },

  /// Start a new instance; the start payload is read from stdin
  Run {
    /// Path to the definition file (JSON)
    definition_file: PathBuf,
  },

  /// Load a saved snapshot and continue it
  Resume {
    /// Path to the definition file (JSON)
    definition_file: PathBuf,

    /// Path to the snapshot saved by a timed-out run
    snapshot_file: PathBuf,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir.clone() {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".bpmflow"),
  };

  match &cli.command {
    Commands::Validate { definition_file } => validate(definition_file).await,
    Commands::Run { definition_file } => {
      let payload = read_payload_from_stdin()?;
      let instance = create_instance(&cli, definition_file).await?;
      if !instance
        .begin_process(payload)
        .context("failed to begin process")?
      {
        bail!("no process in the definition accepted the start payload");
      }
      finish(instance, cli.timeout_ms, &data_dir).await
    }
    Commands::Resume {
      definition_file,
      snapshot_file,
    } => {
      let content = tokio::fs::read_to_string(snapshot_file)
        .await
        .with_context(|| format!("failed to read snapshot file: {}", snapshot_file.display()))?;
      let snapshot = ProcessSnapshot::from_json(&content)
        .with_context(|| format!("failed to parse snapshot file: {}", snapshot_file.display()))?;

      let instance = create_instance(&cli, definition_file).await?;
      if !instance
        .load_state(snapshot, true)
        .context("failed to load snapshot")?
      {
        bail!("snapshot does not match this definition");
      }
      finish(instance, cli.timeout_ms, &data_dir).await
    }
  }
}

async fn validate(definition_file: &Path) -> Result<()> {
  let content = read_definition(definition_file).await?;
  match ElementGraph::from_json(&content) {
    Ok(graph) => {
      println!(
        "{}: ok ({} elements, {} processes)",
        graph.definition_id(),
        graph.len(),
        graph.processes().count()
      );
      Ok(())
    }
    Err(errors) => {
      for problem in errors.errors() {
        println!("{}", problem);
      }
      bail!("{} problem(s) found in {}", errors.len(), definition_file.display())
    }
  }
}

async fn create_instance(cli: &Cli, definition_file: &Path) -> Result<ProcessInstance> {
  let content = read_definition(definition_file).await?;
  let graph = ElementGraph::from_json(&content)
    .with_context(|| format!("invalid definition: {}", definition_file.display()))?;
  info!(definition_id = %graph.definition_id(), elements = graph.len(), "definition_loaded");

  let mut config = match &cli.config {
    Some(path) => {
      let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
      EngineConfig::from_json(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?
    }
    None => EngineConfig::default(),
  };
  if let Some(level) = cli.state_log_level {
    config.state_log_level = level;
  }

  let hooks = ProcessHooks::new()
    .flow_valid(conditions::flow_predicate)
    .on_process_error(|event| {
      error!(
        process_id = %event.process.id,
        element_id = %event.element.id,
        fault = %event.fault,
        "unhandled_fault"
      );
    })
    .on_log(|level, message| info!(level = level.as_str(), "{}", message));

  ProcessInstance::new(graph, hooks, config).context("failed to create process instance")
}

/// Wait for completion and print the outcome; on timeout suspend the
/// instance and save its snapshot under `<data_dir>/states`.
async fn finish(instance: ProcessInstance, timeout_ms: u64, data_dir: &Path) -> Result<()> {
  let waiter = instance.clone();
  let completed = tokio::task::spawn_blocking(move || {
    waiter.wait_for_completion(Some(Duration::from_millis(timeout_ms)))
  })
  .await
  .context("completion wait failed")?;

  if !completed {
    let settled = tokio::task::spawn_blocking({
      let instance = instance.clone();
      move || instance.suspend()
    })
    .await
    .context("suspend failed")?
    .context("failed to suspend process")?;
    if !settled {
      warn!("in-flight steps did not settle before the snapshot was taken");
    }

    let states_dir = data_dir.join("states");
    tokio::fs::create_dir_all(&states_dir)
      .await
      .with_context(|| format!("failed to create {}", states_dir.display()))?;
    let path = states_dir.join(format!("{}.json", instance.instance_id()));
    let snapshot = instance.export_state().to_json()?;
    tokio::fs::write(&path, snapshot)
      .await
      .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
    eprintln!("Process suspended, snapshot saved to {}", path.display());
  }

  let state = instance.export_state();
  let variables: serde_json::Map<String, Value> = state
    .variables
    .iter()
    .map(|record| (record.name.clone(), record.value.clone()))
    .collect();
  let output = json!({
    "instance_id": state.instance_id,
    "completed": completed,
    "variables": variables,
    "steps": state.steps,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  instance.dispose();
  Ok(())
}

async fn read_definition(path: &Path) -> Result<String> {
  tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read definition file: {}", path.display()))
}

fn read_payload_from_stdin() -> Result<BTreeMap<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(BTreeMap::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(BTreeMap::new())
  } else {
    serde_json::from_str(&input).context("payload on stdin must be a JSON object")
  }
}
