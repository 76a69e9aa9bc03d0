use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera_config::WorkflowDef;
use tessera_engine::EngineConfig;
use tessera_manager::{RunManager, RunOptions, SessionRegistry};
use tessera_runtime::NodeRegistry;
use tessera_store::{RunState, SqliteKvStore};
use tessera_workflow::RunContext;

/// Tessera - a workflow run engine
#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tessera)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine config file (default: <data-dir>/config.json when present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Bound on session start, in milliseconds
  #[arg(long, global = true)]
  start_timeout_ms: Option<u64>,

  /// Bound on a single run, in milliseconds
  #[arg(long, global = true)]
  execution_timeout_ms: Option<u64>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow or a single node
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },

  /// Print the recorded progress of earlier runs of a workflow
  Detail {
    /// The workflow ID the runs were recorded under; single-node runs share
    /// the records of full runs
    workflow_id: String,

    /// Conversation turn (default: the latest turn, or the single-turn log)
    #[arg(long)]
    turn: Option<u32>,

    /// Skip this many log entries
    #[arg(long, default_value_t = 0)]
    since: usize,

    /// Print the per-turn history instead of the log
    #[arg(long)]
    history: bool,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run an entire workflow
  Workflow {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    #[command(flatten)]
    run: RunArgs,
  },

  /// Run a single node of a workflow
  Node {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// The node ID to execute
    #[arg(long)]
    node: String,

    #[command(flatten)]
    run: RunArgs,
  },
}

#[derive(Args)]
struct RunArgs {
  /// Run input as JSON; repeat for several inputs (default: stdin)
  #[arg(long = "input")]
  inputs: Vec<String>,

  /// Print one JSON event per line as nodes start and complete
  #[arg(long)]
  stream: bool,

  /// Conversation the run belongs to
  #[arg(long)]
  track: Option<String>,

  /// Turn within the conversation, from 1
  #[arg(long)]
  turn: Option<u32>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .try_init()
    .map_err(|e| anyhow::anyhow!(e))?;

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tessera"),
  };

  let mut config = load_config(cli.config.as_deref(), &data_dir)?;
  if let Some(ms) = cli.start_timeout_ms {
    config.start_timeout_ms = ms;
  }
  if let Some(ms) = cli.execution_timeout_ms {
    config.execution_timeout_ms = ms;
  }

  match cli.command {
    Some(Commands::Run { target }) => {
      let rt = tokio::runtime::Runtime::new()?;
      match target {
        RunTarget::Workflow { workflow_file, run } => {
          rt.block_on(run_target(&data_dir, workflow_file, None, run, config))?;
        }
        RunTarget::Node {
          workflow_file,
          node,
          run,
        } => {
          rt.block_on(run_target(&data_dir, workflow_file, Some(node), run, config))?;
        }
      }
    }
    Some(Commands::Detail {
      workflow_id,
      turn,
      since,
      history,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      let ctx = RunContext::draft(workflow_id);
      rt.block_on(print_detail(&data_dir, ctx, turn, since, history))?;
    }
    None => {
      println!("tessera - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<EngineConfig> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => {
      let default = data_dir.join("config.json");
      if !default.exists() {
        return Ok(EngineConfig::default());
      }
      default
    }
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// The durable store under the data directory.
async fn open_state(data_dir: &Path) -> Result<RunState> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = data_dir.join("tessera.db");
  let store = SqliteKvStore::open(&path)
    .await
    .with_context(|| format!("failed to open store: {}", path.display()))?;
  Ok(RunState::new(Arc::new(store)))
}

async fn run_target(
  data_dir: &Path,
  workflow_file: PathBuf,
  node: Option<String>,
  run: RunArgs,
  config: EngineConfig,
) -> Result<()> {
  let workflow_content = tokio::fs::read_to_string(&workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let workflow_def: WorkflowDef = serde_json::from_str(&workflow_content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  if let Some(node_id) = &node {
    workflow_def
      .get_node(node_id)
      .with_context(|| format!("node '{}' not found in workflow", node_id))?;
  }

  info!(workflow = %workflow_def.name, nodes = workflow_def.nodes.len(), "workflow_loaded");

  let inputs = if run.inputs.is_empty() {
    read_inputs_from_stdin()?
  } else {
    run.inputs.iter().map(|raw| parse_input(raw)).collect()
  };

  let mut ctx = RunContext::draft(workflow_def.workflow_id.clone()).with_app_name(&workflow_def.name);
  if let Some(node_id) = node {
    ctx = ctx.with_node(node_id);
  }

  let manager = RunManager::new(
    ctx,
    SessionRegistry::new(),
    open_state(data_dir).await?,
    NodeRegistry::with_builtins(),
    config,
  );

  manager
    .start(&workflow_def, false)
    .await
    .context("failed to start engine")?;

  // records stay in the store for `tessera detail`
  let options = RunOptions {
    track_id: run.track,
    turn: run.turn,
    stop_after: true,
    ..RunOptions::default()
  };

  if run.stream {
    stream_run(&manager, inputs, options).await
  } else {
    sync_run(&manager, inputs, options).await
  }
}

async fn sync_run(manager: &RunManager, inputs: Vec<Value>, options: RunOptions) -> Result<()> {
  let output = manager
    .run_sync(inputs, options)
    .await
    .context("run failed")?;

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn stream_run(manager: &RunManager, inputs: Vec<Value>, options: RunOptions) -> Result<()> {
  let mut events = manager
    .run_stream(inputs, options)
    .await
    .context("run failed")?;

  while let Some(event) = events.next().await {
    println!("{}", serde_json::to_string(&event)?);
  }

  Ok(())
}

async fn print_detail(
  data_dir: &Path,
  ctx: RunContext,
  turn: Option<u32>,
  since: usize,
  history: bool,
) -> Result<()> {
  let state = open_state(data_dir).await?;

  if history {
    let history = state.get_detail_history(&ctx, None).await;
    println!("{}", serde_json::to_string_pretty(&history)?);
    return Ok(());
  }

  let turn = match turn {
    Some(turn) => Some(turn),
    None => state.latest_turn(&ctx).await,
  };
  let entries = state
    .detail_since(&ctx, turn, since)
    .await
    .context("failed to read run detail")?;
  for entry in entries {
    println!("{}", serde_json::to_string(&entry)?);
  }
  Ok(())
}

/// A JSON value, or the raw text when it does not parse.
fn parse_input(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_inputs_from_stdin() -> Result<Vec<Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(Vec::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read inputs from stdin")?;

  if input.trim().is_empty() {
    Ok(Vec::new())
  } else {
    let value = serde_json::from_str(&input).context("failed to parse input JSON from stdin")?;
    Ok(vec![value])
  }
}
