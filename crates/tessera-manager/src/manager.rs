use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tessera_config::{NodeKind, WorkflowDef};
use tessera_engine::{EngineConfig, EngineError, EngineExecutor, TaskOptions};
use tessera_runtime::{NodeRegistry, RunEvent};
use tessera_store::{EngineStatus, EngineStatusRecord, NodeMeta, RunExtras, RunState};
use tessera_workflow::{NodeRunRecord, NodeStatus, RunContext, RunMode, WorkflowGraph};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::backflow::{BackflowRecord, BackflowSink, ModuleType, NoopBackflowSink};
use crate::error::ManagerError;
use crate::registry::SessionRegistry;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Overrides the configured execution timeout.
  pub timeout: Option<Duration>,
  pub user_id: Option<String>,
  /// Conversation the run belongs to.
  pub track_id: Option<String>,
  /// Turn within the conversation, from 1. Records of each turn are kept
  /// apart; `None` is a single-turn run.
  pub turn: Option<u32>,
  /// Stop the session once the run ends. Node records stay readable.
  pub stop_after: bool,
}

impl RunOptions {
  /// `{app_id}:{mode}:{user_id}:{track_id}:{turn}`
  pub fn request_id(&self, ctx: &RunContext) -> String {
    format!(
      "{}:{}:{}:{}:{}",
      ctx.app_id,
      ctx.mode,
      self.user_id.as_deref().unwrap_or_default(),
      self.track_id.as_deref().unwrap_or_default(),
      self.turn()
    )
  }

  fn turn(&self) -> u32 {
    self.turn.unwrap_or(1)
  }
}

/// Binds one run context to at most one live engine session.
pub struct RunManager {
  ctx: RunContext,
  sessions: SessionRegistry,
  state: RunState,
  registry: NodeRegistry,
  config: EngineConfig,
  backflow: Arc<dyn BackflowSink>,
}

impl RunManager {
  pub fn new(
    ctx: RunContext,
    sessions: SessionRegistry,
    state: RunState,
    registry: NodeRegistry,
    config: EngineConfig,
  ) -> Self {
    Self {
      ctx,
      sessions,
      state,
      registry,
      config,
      backflow: Arc::new(NoopBackflowSink),
    }
  }

  pub fn with_backflow(mut self, sink: Arc<dyn BackflowSink>) -> Self {
    self.backflow = sink;
    self
  }

  pub fn run_context(&self) -> &RunContext {
    &self.ctx
  }

  pub fn state(&self) -> &RunState {
    &self.state
  }

  /// Start a session for `def`, or reuse the running one for this key.
  ///
  /// With `auto_server` the compiled graph always carries a server resource.
  /// A failed start leaves the key empty so the next call starts afresh.
  #[instrument(
    name = "manager_start",
    skip(self, def),
    fields(session_key = %self.ctx.session_key(), workflow_id = %def.workflow_id)
  )]
  pub async fn start(&self, def: &WorkflowDef, auto_server: bool) -> Result<String, ManagerError> {
    let slot = self.sessions.slot(&self.ctx.session_key());
    let mut current = slot.lock().await;

    if let Some(executor) = current.as_ref() {
      if executor.is_engine_running() {
        let session_id = executor.session_id();
        info!(session_id = %session_id, "session_reused");
        return Ok(session_id);
      }
    }

    if let Some(stale) = current.take() {
      stale.stop_engine().await;
    }

    let executor = Arc::new(EngineExecutor::new(
      self.registry.clone(),
      self.config.clone(),
    ));

    let mut graph = executor
      .process_workflow(def, &self.ctx)
      .map_err(EngineError::from)?;
    if auto_server {
      let resources = EngineExecutor::add_server_resource_if_needed(&graph.resources);
      graph = graph.with_resources(resources);
    }

    self.state.save_graph(&self.ctx, &graph).await?;
    self
      .state
      .set_extras(&self.ctx, &extras(&graph, &self.ctx))
      .await?;
    self
      .state
      .set_status(&self.ctx, &EngineStatusRecord::starting())
      .await?;

    match executor.start_engine(graph).await {
      Ok(endpoints) => {
        let session_id = executor.session_id();
        let started = EngineStatusRecord::started(endpoints.web_url, endpoints.api_url);
        if let Err(e) = self.state.set_status(&self.ctx, &started).await {
          warn!(error = %e, "engine_status_write_failed");
          executor.stop_engine().await;
          return Err(e.into());
        }
        *current = Some(executor);
        info!(session_id = %session_id, "session_registered");
        Ok(session_id)
      }
      Err(e) => {
        warn!(error = %e, "session_start_failed");
        if let Err(state_err) = self
          .state
          .set_status(&self.ctx, &EngineStatusRecord::error(e.to_string()))
          .await
        {
          warn!(error = %state_err, "engine_status_write_failed");
        }
        Err(EngineError::from(e).into())
      }
    }
  }

  /// Stop the session bound to this key and clean its run state. Idempotent.
  #[instrument(name = "manager_stop", skip(self), fields(session_key = %self.ctx.session_key()))]
  pub async fn stop(&self) -> Result<(), ManagerError> {
    let key = self.ctx.session_key();
    {
      let slot = self.sessions.slot(&key);
      let mut current = slot.lock().await;

      if let Some(executor) = current.take() {
        executor.stop_engine().await;
        info!(session_id = %executor.session_id(), "session_unregistered");
      }

      self.state.cleanup(&self.ctx).await?;
    }
    self.sessions.release(&key);
    Ok(())
  }

  /// [`start`](Self::start), then [`run_stream`](Self::run_stream).
  pub async fn start_with_stream(
    &self,
    def: &WorkflowDef,
    auto_server: bool,
    inputs: Vec<Value>,
    options: RunOptions,
  ) -> Result<BoxStream<'static, RunEvent>, ManagerError> {
    self.start(def, auto_server).await?;
    self.run_stream(inputs, options).await
  }

  pub fn is_running(&self) -> bool {
    self
      .sessions
      .probe(&self.ctx.session_key())
      .unwrap_or(false)
  }

  /// The cached engine status, corrected when it claims a session that is
  /// no longer alive.
  pub async fn engine_status(&self) -> EngineStatusRecord {
    let cached = self.state.get_status(&self.ctx).await;

    if cached.status == EngineStatus::Start
      && self.sessions.probe(&self.ctx.session_key()) == Some(false)
    {
      warn!(session_key = %self.ctx.session_key(), "engine_status_stale");
      let reset = EngineStatusRecord::stop();
      if let Err(e) = self.state.set_status(&self.ctx, &reset).await {
        warn!(error = %e, "engine_status_write_failed");
      }
      return reset;
    }

    cached
  }

  /// Run the live session, recording every node event into run state.
  ///
  /// Full runs clear the previous records of the turn first; single-node
  /// runs overwrite only their own node's record. The terminal event appends
  /// the end marker to the detail log and files the turn into history.
  pub async fn run_stream(
    &self,
    inputs: Vec<Value>,
    options: RunOptions,
  ) -> Result<BoxStream<'static, RunEvent>, ManagerError> {
    let executor = self.live_executor().await?;

    if !self.ctx.is_node_scope() {
      self.state.clear_node_results(&self.ctx, options.turn).await?;
    }

    let request_id = options.request_id(&self.ctx);
    let stream = executor
      .execute_stream_task_with(
        inputs.clone(),
        TaskOptions {
          timeout: options.timeout,
          request_id: Some(request_id),
        },
      )
      .await?;

    let recorder = Arc::new(Recorder {
      ctx: self.ctx.clone(),
      state: self.state.clone(),
      sessions: self.sessions.clone(),
      session_id: executor.session_id(),
      backflow: self.backflow.clone(),
      nodes: OnceCell::new(),
      inputs,
      options,
    });

    Ok(
      stream
        .then(move |event| {
          let recorder = recorder.clone();
          async move {
            recorder.observe(&event).await;
            event
          }
        })
        .boxed(),
    )
  }

  /// Run the live session and wait for its result.
  pub async fn run_sync(
    &self,
    inputs: Vec<Value>,
    options: RunOptions,
  ) -> Result<Value, ManagerError> {
    let mut events = self.run_stream(inputs, options).await?;

    while let Some(event) = events.next().await {
      match event {
        RunEvent::Finished { output } => return Ok(output),
        RunEvent::Failed { node_id, message } => {
          return Err(ManagerError::RunFailed { node_id, message });
        }
        RunEvent::Node(_) | RunEvent::Chunk { .. } => {}
      }
    }

    Err(EngineError::SessionStopped.into())
  }

  async fn live_executor(&self) -> Result<Arc<EngineExecutor>, ManagerError> {
    let slot = self.sessions.slot(&self.ctx.session_key());
    let current = slot.lock().await;
    match current.as_ref() {
      Some(executor) if executor.is_engine_running() => Ok(executor.clone()),
      _ => Err(ManagerError::not_running()),
    }
  }
}

impl std::fmt::Debug for RunManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunManager")
      .field("session_key", &self.ctx.session_key())
      .finish_non_exhaustive()
  }
}

fn extras(graph: &WorkflowGraph, ctx: &RunContext) -> RunExtras {
  let node_title = ctx
    .node_id
    .as_deref()
    .and_then(|id| graph.get_node(id))
    .map(|node| node.title.clone());

  let mut ends = graph.nodes.iter().filter(|n| n.kind == NodeKind::End);
  let end_id = match (ends.next(), ends.next()) {
    (Some(end), None) => Some(end.id.clone()),
    _ => None,
  };

  RunExtras {
    node_title,
    end_id,
    mode: ctx.mode,
  }
}

/// Writes run events into run state as they pass through the stream.
struct Recorder {
  ctx: RunContext,
  state: RunState,
  sessions: SessionRegistry,
  /// Session serving this run.
  session_id: String,
  backflow: Arc<dyn BackflowSink>,
  /// Node metadata of the stored graph, read on first use.
  nodes: OnceCell<HashMap<String, NodeMeta>>,
  inputs: Vec<Value>,
  options: RunOptions,
}

impl Recorder {
  async fn observe(&self, event: &RunEvent) {
    match event {
      RunEvent::Node(record) => {
        if let Err(e) = self
          .state
          .set_node_result(&self.ctx, self.options.turn, record)
          .await
        {
          warn!(node_id = %record.node_id, error = %e, "node_result_write_failed");
        }
        if record.status == NodeStatus::Succeeded && self.backflow_enabled() {
          self.node_backflow(record).await;
        }
      }
      RunEvent::Finished { output } if self.backflow_enabled() => {
        let record = self.run_backflow_record(output).await;
        self.send_backflow(record).await;
      }
      _ => {}
    }

    if event.is_terminal() {
      self.finish().await;
    }
  }

  fn backflow_enabled(&self) -> bool {
    self.ctx.mode == RunMode::Publish && self.ctx.enable_backflow
  }

  async fn finish(&self) {
    let turn = self.options.turn;
    if let Err(e) = self.state.mark_session_end(&self.ctx, turn).await {
      warn!(run_key = %self.ctx.run_key(), error = %e, "session_end_write_failed");
    }
    if let Err(e) = self.state.save_detail_to_history(&self.ctx, turn).await {
      warn!(run_key = %self.ctx.run_key(), error = %e, "detail_history_write_failed");
    }
    if self.options.stop_after {
      self.release_session().await;
    }
  }

  /// Stop the session that served this run, unless it was replaced since.
  async fn release_session(&self) {
    let key = self.ctx.session_key();
    {
      let slot = self.sessions.slot(&key);
      let mut current = slot.lock().await;
      if current
        .as_ref()
        .is_some_and(|executor| executor.session_id() == self.session_id)
      {
        if let Some(executor) = current.take() {
          executor.stop_engine().await;
        }
        if let Err(e) = self
          .state
          .set_status(&self.ctx, &EngineStatusRecord::stop())
          .await
        {
          warn!(error = %e, "engine_status_write_failed");
        }
        info!(session_id = %self.session_id, "session_released");
      }
    }
    self.sessions.release(&key);
  }

  /// Export a finished node whose definition asks for backflow.
  async fn node_backflow(&self, record: &NodeRunRecord) {
    let nodes = self
      .nodes
      .get_or_init(|| self.state.get_graph_nodes_map(&self.ctx))
      .await;
    let Some(meta) = nodes.get(&record.node_id).filter(|meta| meta.backflow) else {
      return;
    };

    let backflow = self.backflow_record(
      ModuleType::Node,
      record.node_id.clone(),
      module_name(&meta.title, &record.node_id),
      display(&record.inputs),
      display(&record.outputs),
    );
    self.send_backflow(backflow).await;
  }

  async fn run_backflow_record(&self, output: &Value) -> BackflowRecord {
    let (module_type, module_id, module_name) = match &self.ctx.node_id {
      Some(node_id) => {
        let title = self
          .state
          .get_extras(&self.ctx)
          .await
          .and_then(|extras| extras.node_title)
          .unwrap_or_default();
        (
          ModuleType::Node,
          node_id.clone(),
          module_name(&title, node_id),
        )
      }
      None => (
        ModuleType::App,
        self.ctx.app_id.clone(),
        self.ctx.app_name.clone(),
      ),
    };

    let module_input = self
      .inputs
      .iter()
      .map(display)
      .collect::<Vec<_>>()
      .join("\n");
    self.backflow_record(
      module_type,
      module_id,
      module_name,
      module_input,
      display(output),
    )
  }

  fn backflow_record(
    &self,
    module_type: ModuleType,
    module_id: String,
    module_name: String,
    module_input: String,
    module_output: String,
  ) -> BackflowRecord {
    BackflowRecord {
      app_id: self.ctx.app_id.clone(),
      app_name: self.ctx.app_name.clone(),
      module_id,
      module_name,
      module_type,
      output_time: Utc::now(),
      module_input,
      module_output,
      conversation_id: self.options.track_id.clone().unwrap_or_default(),
      turn_number: self.options.turn(),
    }
  }

  async fn send_backflow(&self, record: BackflowRecord) {
    if let Err(e) = self.backflow.send(record).await {
      warn!(app_id = %self.ctx.app_id, error = %e, "backflow_failed");
    }
  }
}

/// A node's title, or `Node-{id}` when it has none.
fn module_name(title: &str, node_id: &str) -> String {
  if title.is_empty() {
    format!("Node-{}", node_id)
  } else {
    title.to_string()
  }
}

/// Strings verbatim, everything else as JSON.
fn display(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
