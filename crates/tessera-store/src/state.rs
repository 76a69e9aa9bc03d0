//! Run state in the key-value cache.
//!
//! | key                                   | shape                       |
//! |---------------------------------------|-----------------------------|
//! | `run_detail:{run_key}{turn}`          | hash node_id → record JSON  |
//! | `run_detail_log:{run_key}{turn}`      | list of detail entries      |
//! | `run_total_tokens:{run_key}{turn}`    | integer                     |
//! | `run_detail_history:{run_key}`        | turn → records JSON         |
//! | `run_graph:{session_key}`             | compiled graph JSON         |
//! | `run_status:{session_key}`            | engine status record JSON   |
//! | `run_extras:{session_key}`            | run extras JSON             |
//!
//! `{turn}` is empty for single-turn runs and `:turn_{n}` for turn `n` of a
//! conversation. Records are shared by full and single-node runs of the same
//! app and mode; everything else is per session.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_workflow::{NodeRunRecord, RunContext, RunMode, WorkflowGraph};
use tracing::{debug, warn};

use crate::error::StateError;
use crate::kv::KvStore;

/// Records kept per turn in the history.
const HISTORY_RECORDS_PER_TURN: usize = 100;
/// Turns kept in the history; the oldest go first.
const HISTORY_TURNS: usize = 100;

/// One entry of a run's append-only detail log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetailEntry {
  Node(NodeRunRecord),
  /// The run is over; nothing else is appended for it.
  SessionEnd {
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    turn: Option<u32>,
  },
}

/// Finished node records by conversation turn.
pub type DetailHistory = BTreeMap<u32, Vec<NodeRunRecord>>;

/// Coarse engine status as seen by tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
  Stop,
  Starting,
  Start,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatusRecord {
  pub status: EngineStatus,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub web_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl EngineStatusRecord {
  fn at(status: EngineStatus) -> Self {
    Self {
      status,
      timestamp: Utc::now(),
      web_url: None,
      api_url: None,
      error: None,
    }
  }

  pub fn stop() -> Self {
    Self::at(EngineStatus::Stop)
  }

  pub fn starting() -> Self {
    Self::at(EngineStatus::Starting)
  }

  pub fn started(web_url: impl Into<String>, api_url: impl Into<String>) -> Self {
    Self {
      web_url: Some(web_url.into()),
      api_url: Some(api_url.into()),
      ..Self::at(EngineStatus::Start)
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      error: Some(message.into()),
      ..Self::at(EngineStatus::Error)
    }
  }
}

/// What a run targets, for display and backflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExtras {
  /// Title of the target node in single-node runs.
  pub node_title: Option<String>,
  /// Id of the graph's end node, when it has exactly one.
  pub end_id: Option<String>,
  pub mode: RunMode,
}

/// Node metadata read back from the stored graph.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeMeta {
  pub id: String,
  pub kind: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub backflow: bool,
}

#[derive(Deserialize)]
struct StoredNodes {
  nodes: Vec<NodeMeta>,
}

/// Cache-backed state of runs, keyed by [`RunContext`].
#[derive(Clone)]
pub struct RunState {
  store: Arc<dyn KvStore>,
}

impl RunState {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    Self { store }
  }

  fn detail_key(ctx: &RunContext, turn: Option<u32>) -> String {
    format!("run_detail:{}{}", ctx.run_key(), turn_suffix(turn))
  }

  fn log_key(ctx: &RunContext, turn: Option<u32>) -> String {
    format!("run_detail_log:{}{}", ctx.run_key(), turn_suffix(turn))
  }

  fn tokens_key(ctx: &RunContext, turn: Option<u32>) -> String {
    format!("run_total_tokens:{}{}", ctx.run_key(), turn_suffix(turn))
  }

  fn history_key(ctx: &RunContext) -> String {
    format!("run_detail_history:{}", ctx.run_key())
  }

  fn graph_key(ctx: &RunContext) -> String {
    format!("run_graph:{}", ctx.session_key())
  }

  fn status_key(ctx: &RunContext) -> String {
    format!("run_status:{}", ctx.session_key())
  }

  fn extras_key(ctx: &RunContext) -> String {
    format!("run_extras:{}", ctx.session_key())
  }

  /// Upsert the latest record of one node and append it to the detail log.
  ///
  /// Returns `false` without writing when the record would move a finished
  /// node back to running. Token usage of finished nodes is added to the
  /// run total.
  pub async fn set_node_result(
    &self,
    ctx: &RunContext,
    turn: Option<u32>,
    record: &NodeRunRecord,
  ) -> Result<bool, StateError> {
    let key = Self::detail_key(ctx, turn);

    if let Some(existing) = self.store.hash_get(&key, &record.node_id).await? {
      if let Ok(existing) = serde_json::from_str::<NodeRunRecord>(&existing) {
        if !existing.status.can_transition_to(record.status) {
          warn!(
            run_key = %ctx.run_key(),
            node_id = %record.node_id,
            from = ?existing.status,
            to = ?record.status,
            "node_status_regression_refused"
          );
          return Ok(false);
        }
      }
    }

    let encoded = serde_json::to_string(record)?;
    self.store.hash_set(&key, &record.node_id, encoded).await?;
    self
      .append_entry(ctx, turn, &DetailEntry::Node(record.clone()))
      .await?;

    let tokens = record.total_tokens();
    if record.status.is_terminal() && tokens > 0 {
      self
        .store
        .incr_by(&Self::tokens_key(ctx, turn), tokens as i64)
        .await?;
    }

    debug!(
      run_key = %ctx.run_key(),
      node_id = %record.node_id,
      status = ?record.status,
      ?turn,
      "node_result_saved"
    );
    Ok(true)
  }

  async fn append_entry(
    &self,
    ctx: &RunContext,
    turn: Option<u32>,
    entry: &DetailEntry,
  ) -> Result<(), StateError> {
    let encoded = serde_json::to_string(entry)?;
    self
      .store
      .list_push(&Self::log_key(ctx, turn), encoded)
      .await?;
    Ok(())
  }

  /// Append the end-of-run marker to the detail log.
  pub async fn mark_session_end(&self, ctx: &RunContext, turn: Option<u32>) -> Result<(), StateError> {
    let entry = DetailEntry::SessionEnd {
      timestamp: Utc::now(),
      turn,
    };
    self.append_entry(ctx, turn, &entry).await
  }

  /// Number of entries in the detail log.
  pub async fn detail_length(&self, ctx: &RunContext, turn: Option<u32>) -> Result<usize, StateError> {
    Ok(self.store.list_len(&Self::log_key(ctx, turn)).await?)
  }

  /// Detail log entries from index `seen` on, for callers that already hold
  /// the first `seen` entries.
  pub async fn detail_since(
    &self,
    ctx: &RunContext,
    turn: Option<u32>,
    seen: usize,
  ) -> Result<Vec<DetailEntry>, StateError> {
    self
      .store
      .list_range(&Self::log_key(ctx, turn), seen)
      .await?
      .iter()
      .map(|raw| serde_json::from_str(raw).map_err(StateError::from))
      .collect()
  }

  /// Highest conversation turn with a detail log, if any.
  pub async fn latest_turn(&self, ctx: &RunContext) -> Option<u32> {
    let prefix = format!("{}:turn_", Self::log_key(ctx, None));
    match self.store.keys_with_prefix(&prefix).await {
      Ok(keys) => keys
        .iter()
        .filter_map(|key| key.strip_prefix(&prefix)?.parse::<u32>().ok())
        .max(),
      Err(e) => {
        warn!(run_key = %ctx.run_key(), error = %e, "latest_turn_unavailable");
        None
      }
    }
  }

  /// Snapshot of every node record for the run. Never fails: an unreadable
  /// store or record is logged and skipped.
  pub async fn get_node_result(
    &self,
    ctx: &RunContext,
    turn: Option<u32>,
  ) -> HashMap<String, NodeRunRecord> {
    let raw = match self.store.hash_get_all(&Self::detail_key(ctx, turn)).await {
      Ok(raw) => raw,
      Err(e) => {
        warn!(run_key = %ctx.run_key(), error = %e, "node_results_unavailable");
        return HashMap::new();
      }
    };

    raw
      .into_iter()
      .filter_map(
        |(node_id, encoded)| match serde_json::from_str::<NodeRunRecord>(&encoded) {
          Ok(record) => Some((node_id, record)),
          Err(e) => {
            warn!(run_key = %ctx.run_key(), node_id = %node_id, error = %e, "node_result_malformed");
            None
          }
        },
      )
      .collect()
  }

  /// Node records in the stored graph's topological order; records of nodes
  /// missing from the graph follow, sorted by id.
  pub async fn ordered_node_results(
    &self,
    ctx: &RunContext,
    turn: Option<u32>,
  ) -> Vec<NodeRunRecord> {
    let mut records = self.get_node_result(ctx, turn).await;
    let order = match self.load_graph(ctx).await {
      Some(graph) => graph.graph().topological_order(),
      None => Vec::new(),
    };

    let mut ordered: Vec<NodeRunRecord> = order
      .iter()
      .filter_map(|node_id| records.remove(node_id))
      .collect();

    let mut rest: Vec<NodeRunRecord> = records.into_values().collect();
    rest.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    ordered.extend(rest);
    ordered
  }

  /// Forget every node record, the detail log and the token total of one
  /// turn of the run.
  pub async fn clear_node_results(&self, ctx: &RunContext, turn: Option<u32>) -> Result<(), StateError> {
    self.store.delete(&Self::detail_key(ctx, turn)).await?;
    self.store.delete(&Self::log_key(ctx, turn)).await?;
    self.store.delete(&Self::tokens_key(ctx, turn)).await?;
    Ok(())
  }

  pub async fn total_tokens(&self, ctx: &RunContext, turn: Option<u32>) -> u64 {
    match self.store.get(&Self::tokens_key(ctx, turn)).await {
      Ok(Some(raw)) => raw.parse().unwrap_or(0),
      Ok(None) => 0,
      Err(e) => {
        warn!(run_key = %ctx.run_key(), error = %e, "total_tokens_unavailable");
        0
      }
    }
  }

  /// Copy the finished node records of a conversation turn into the history.
  /// Single-turn runs have no history and are ignored.
  pub async fn save_detail_to_history(
    &self,
    ctx: &RunContext,
    turn: Option<u32>,
  ) -> Result<(), StateError> {
    let Some(turn) = turn else {
      return Ok(());
    };

    let finished: Vec<NodeRunRecord> = self
      .detail_since(ctx, Some(turn), 0)
      .await?
      .into_iter()
      .filter_map(|entry| match entry {
        DetailEntry::Node(record) if record.status.is_terminal() => Some(record),
        _ => None,
      })
      .collect();
    if finished.is_empty() {
      return Ok(());
    }

    let mut history = self.get_detail_history(ctx, None).await;
    let records = history.entry(turn).or_default();
    records.extend(finished);
    if records.len() > HISTORY_RECORDS_PER_TURN {
      let excess = records.len() - HISTORY_RECORDS_PER_TURN;
      records.drain(..excess);
    }
    while history.len() > HISTORY_TURNS {
      history.pop_first();
    }

    self
      .store
      .set(&Self::history_key(ctx), serde_json::to_string(&history)?)
      .await?;
    debug!(run_key = %ctx.run_key(), turn, "detail_history_saved");
    Ok(())
  }

  /// Saved history, limited to the latest `limit` turns when given. Missing
  /// or unreadable history is empty.
  pub async fn get_detail_history(&self, ctx: &RunContext, limit: Option<usize>) -> DetailHistory {
    let raw = match self.store.get(&Self::history_key(ctx)).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return DetailHistory::new(),
      Err(e) => {
        warn!(run_key = %ctx.run_key(), error = %e, "detail_history_unavailable");
        return DetailHistory::new();
      }
    };

    let mut history: DetailHistory = match serde_json::from_str(&raw) {
      Ok(history) => history,
      Err(e) => {
        warn!(run_key = %ctx.run_key(), error = %e, "detail_history_malformed");
        return DetailHistory::new();
      }
    };

    if let Some(limit) = limit {
      while history.len() > limit {
        history.pop_first();
      }
    }
    history
  }

  /// Drop the history together with the records, logs and token totals of
  /// every turn.
  pub async fn delete_detail_history(&self, ctx: &RunContext) -> Result<(), StateError> {
    self.store.delete(&Self::history_key(ctx)).await?;

    for base in [
      Self::detail_key(ctx, None),
      Self::log_key(ctx, None),
      Self::tokens_key(ctx, None),
    ] {
      self.store.delete(&base).await?;
      for key in self.store.keys_with_prefix(&format!("{}:turn_", base)).await? {
        self.store.delete(&key).await?;
      }
    }

    debug!(run_key = %ctx.run_key(), "detail_history_deleted");
    Ok(())
  }

  pub async fn save_graph(&self, ctx: &RunContext, graph: &WorkflowGraph) -> Result<(), StateError> {
    let encoded = serde_json::to_string(graph)?;
    self.store.set(&Self::graph_key(ctx), encoded).await?;
    Ok(())
  }

  pub async fn load_graph(&self, ctx: &RunContext) -> Option<WorkflowGraph> {
    let raw = self.raw_graph(ctx).await?;
    match serde_json::from_str(&raw) {
      Ok(graph) => Some(graph),
      Err(e) => {
        warn!(session_key = %ctx.session_key(), error = %e, "graph_malformed");
        None
      }
    }
  }

  /// Node id → metadata of the stored graph. Missing or malformed data
  /// yields an empty map.
  pub async fn get_graph_nodes_map(&self, ctx: &RunContext) -> HashMap<String, NodeMeta> {
    let Some(raw) = self.raw_graph(ctx).await else {
      warn!(session_key = %ctx.session_key(), "graph_missing");
      return HashMap::new();
    };

    match serde_json::from_str::<StoredNodes>(&raw) {
      Ok(stored) => stored
        .nodes
        .into_iter()
        .map(|node| (node.id.clone(), node))
        .collect(),
      Err(e) => {
        warn!(session_key = %ctx.session_key(), error = %e, "graph_malformed");
        HashMap::new()
      }
    }
  }

  async fn raw_graph(&self, ctx: &RunContext) -> Option<String> {
    match self.store.get(&Self::graph_key(ctx)).await {
      Ok(raw) => raw,
      Err(e) => {
        warn!(session_key = %ctx.session_key(), error = %e, "graph_unavailable");
        None
      }
    }
  }

  /// Record the engine status. `stop` is stored as the absence of a record.
  pub async fn set_status(
    &self,
    ctx: &RunContext,
    record: &EngineStatusRecord,
  ) -> Result<(), StateError> {
    let key = Self::status_key(ctx);
    if record.status == EngineStatus::Stop {
      self.store.delete(&key).await?;
    } else {
      self.store.set(&key, serde_json::to_string(record)?).await?;
    }
    Ok(())
  }

  /// The cached engine status: `stop` when absent, `error` when unreadable.
  pub async fn get_status(&self, ctx: &RunContext) -> EngineStatusRecord {
    match self.store.get(&Self::status_key(ctx)).await {
      Ok(None) => EngineStatusRecord::stop(),
      Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(session_key = %ctx.session_key(), error = %e, "status_malformed");
        EngineStatusRecord::error(format!("unreadable status: {}", e))
      }),
      Err(e) => {
        warn!(session_key = %ctx.session_key(), error = %e, "status_unavailable");
        EngineStatusRecord::error(e.to_string())
      }
    }
  }

  pub async fn set_extras(&self, ctx: &RunContext, extras: &RunExtras) -> Result<(), StateError> {
    let encoded = serde_json::to_string(extras)?;
    self.store.set(&Self::extras_key(ctx), encoded).await?;
    Ok(())
  }

  pub async fn get_extras(&self, ctx: &RunContext) -> Option<RunExtras> {
    let raw = self.store.get(&Self::extras_key(ctx)).await.ok()??;
    serde_json::from_str(&raw).ok()
  }

  /// Delete the session keys of the run. Full runs also drop the node
  /// records and history of every turn; single-node runs leave the shared
  /// records in place.
  pub async fn cleanup(&self, ctx: &RunContext) -> Result<(), StateError> {
    self.store.delete(&Self::graph_key(ctx)).await?;
    self.store.delete(&Self::status_key(ctx)).await?;
    self.store.delete(&Self::extras_key(ctx)).await?;
    if !ctx.is_node_scope() {
      self.delete_detail_history(ctx).await?;
    }
    debug!(session_key = %ctx.session_key(), "run_state_cleaned");
    Ok(())
  }
}

fn turn_suffix(turn: Option<u32>) -> String {
  match turn {
    Some(turn) => format!(":turn_{}", turn),
    None => String::new(),
  }
}

impl std::fmt::Debug for RunState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunState").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::KvError;
  use crate::kv::InMemoryKvStore;
  use serde_json::json;
  use tessera_config::{NodeDef, NodeKind};
  use tessera_workflow::{Edge, NodeSpec, NodeStatus};

  fn state() -> (Arc<InMemoryKvStore>, RunState) {
    let store = Arc::new(InMemoryKvStore::new());
    (store.clone(), RunState::new(store))
  }

  fn record(node_id: &str, status: NodeStatus, tokens: (u64, u64)) -> NodeRunRecord {
    NodeRunRecord {
      node_id: node_id.to_string(),
      node_type: "template".to_string(),
      title: node_id.to_uppercase(),
      inputs: json!(1),
      outputs: json!("out"),
      status,
      elapsed_time: 0.1,
      prompt_tokens: tokens.0,
      completion_tokens: tokens.1,
    }
  }

  fn graph() -> WorkflowGraph {
    let mut b = NodeSpec::from(NodeDef::new("b", NodeKind::Template).with_title("B"));
    b.backflow = true;
    WorkflowGraph {
      graph_id: "wf".to_string(),
      name: "wf".to_string(),
      nodes: vec![NodeSpec::from(NodeDef::new("a", NodeKind::Start)), b],
      edges: vec![Edge {
        from: "a".to_string(),
        to: "b".to_string(),
        condition: None,
      }],
      resources: vec![],
      scope: None,
    }
  }

  #[tokio::test]
  async fn test_node_result_last_write_wins() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    let mut first = record("a", NodeStatus::Succeeded, (0, 0));
    state.set_node_result(&ctx, None, &first).await.unwrap();
    first.outputs = json!("second");
    state.set_node_result(&ctx, None, &first).await.unwrap();

    let results = state.get_node_result(&ctx, None).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results["a"].outputs, json!("second"));
  }

  #[tokio::test]
  async fn test_node_status_never_regresses() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    let done = record("a", NodeStatus::Failed, (0, 0));
    assert!(state.set_node_result(&ctx, None, &done).await.unwrap());

    let running = record("a", NodeStatus::Running, (0, 0));
    assert!(!state.set_node_result(&ctx, None, &running).await.unwrap());
    assert_eq!(
      state.get_node_result(&ctx, None).await["a"].status,
      NodeStatus::Failed
    );
  }

  #[tokio::test]
  async fn test_missing_run_is_empty() {
    let (_, state) = state();
    let ctx = RunContext::publish("nobody");

    assert!(state.get_node_result(&ctx, None).await.is_empty());
    assert!(state.get_graph_nodes_map(&ctx).await.is_empty());
    assert_eq!(state.total_tokens(&ctx, None).await, 0);
    assert_eq!(state.get_status(&ctx).await.status, EngineStatus::Stop);
    assert!(state.get_extras(&ctx).await.is_none());
  }

  #[tokio::test]
  async fn test_records_shared_by_scoped_runs() {
    let (_, state) = state();
    let full = RunContext::draft("app");
    let scoped = RunContext::draft("app").with_node("b");

    state
      .set_node_result(&full, None, &record("a", NodeStatus::Succeeded, (0, 0)))
      .await
      .unwrap();
    state
      .set_node_result(&scoped, None, &record("b", NodeStatus::Succeeded, (0, 0)))
      .await
      .unwrap();

    assert_eq!(state.get_node_result(&full, None).await.len(), 2);
  }

  #[tokio::test]
  async fn test_total_tokens_counts_finished_nodes() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Running, (9, 9)))
      .await
      .unwrap();
    state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Succeeded, (2, 3)))
      .await
      .unwrap();
    state
      .set_node_result(&ctx, None, &record("b", NodeStatus::Succeeded, (1, 0)))
      .await
      .unwrap();
    assert_eq!(state.total_tokens(&ctx, None).await, 6);

    state.clear_node_results(&ctx, None).await.unwrap();
    assert_eq!(state.total_tokens(&ctx, None).await, 0);
    assert!(state.get_node_result(&ctx, None).await.is_empty());
  }

  #[tokio::test]
  async fn test_ordered_node_results_follow_graph() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");
    state.save_graph(&ctx, &graph()).await.unwrap();

    for id in ["z", "b", "a"] {
      state
        .set_node_result(&ctx, None, &record(id, NodeStatus::Succeeded, (0, 0)))
        .await
        .unwrap();
    }

    let order: Vec<String> = state
      .ordered_node_results(&ctx, None)
      .await
      .into_iter()
      .map(|r| r.node_id)
      .collect();
    assert_eq!(order, vec!["a", "b", "z"]);
  }

  #[tokio::test]
  async fn test_graph_nodes_map() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");
    state.save_graph(&ctx, &graph()).await.unwrap();

    let nodes = state.get_graph_nodes_map(&ctx).await;
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes["b"].kind, "template");
    assert_eq!(nodes["b"].title, "B");
    assert!(nodes["b"].backflow);
    assert!(!nodes["a"].backflow);
  }

  #[tokio::test]
  async fn test_malformed_graph_yields_empty_map() {
    let (store, state) = state();
    let ctx = RunContext::draft("app");
    store
      .set("run_graph:app:draft", "{not json".to_string())
      .await
      .unwrap();

    assert!(state.get_graph_nodes_map(&ctx).await.is_empty());
    assert!(state.load_graph(&ctx).await.is_none());
  }

  #[tokio::test]
  async fn test_status_lifecycle() {
    let (store, state) = state();
    let ctx = RunContext::draft("app");

    state
      .set_status(&ctx, &EngineStatusRecord::starting())
      .await
      .unwrap();
    assert_eq!(state.get_status(&ctx).await.status, EngineStatus::Starting);

    state
      .set_status(
        &ctx,
        &EngineStatusRecord::started("http://web", "http://web/api/run"),
      )
      .await
      .unwrap();
    let status = state.get_status(&ctx).await;
    assert_eq!(status.status, EngineStatus::Start);
    assert_eq!(status.api_url.as_deref(), Some("http://web/api/run"));

    state
      .set_status(&ctx, &EngineStatusRecord::stop())
      .await
      .unwrap();
    assert_eq!(store.get("run_status:app:draft").await.unwrap(), None);
    assert_eq!(state.get_status(&ctx).await.status, EngineStatus::Stop);
  }

  #[tokio::test]
  async fn test_unreadable_status_is_error() {
    let (store, state) = state();
    let ctx = RunContext::draft("app");
    store
      .set("run_status:app:draft", "garbage".to_string())
      .await
      .unwrap();

    let status = state.get_status(&ctx).await;
    assert_eq!(status.status, EngineStatus::Error);
    assert!(status.error.is_some());
  }

  #[tokio::test]
  async fn test_cleanup_scoped_keeps_shared_records() {
    let (_, state) = state();
    let ctx = RunContext::draft("app").with_node("b");
    let extras = RunExtras {
      node_title: Some("B".to_string()),
      end_id: None,
      mode: RunMode::Draft,
    };

    state.save_graph(&ctx, &graph()).await.unwrap();
    state.set_extras(&ctx, &extras).await.unwrap();
    state
      .set_node_result(&ctx, None, &record("b", NodeStatus::Succeeded, (0, 0)))
      .await
      .unwrap();
    assert_eq!(state.get_extras(&ctx).await, Some(extras));

    state.cleanup(&ctx).await.unwrap();
    assert!(state.load_graph(&ctx).await.is_none());
    assert!(state.get_extras(&ctx).await.is_none());
    assert_eq!(state.get_node_result(&ctx, None).await.len(), 1);

    let full = RunContext::draft("app");
    state.cleanup(&full).await.unwrap();
    assert!(state.get_node_result(&full, None).await.is_empty());
  }

  #[tokio::test]
  async fn test_wrong_type_surfaces_as_store_error() {
    let (store, state) = state();
    let ctx = RunContext::draft("app");
    store
      .set("run_detail:app:draft", "flat".to_string())
      .await
      .unwrap();

    let err = state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Succeeded, (0, 0)))
      .await
      .unwrap_err();
    assert!(matches!(err, StateError::Store(KvError::WrongType { .. })));
    assert!(state.get_node_result(&ctx, None).await.is_empty());
  }

  #[tokio::test]
  async fn test_turns_keep_separate_records() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Succeeded, (1, 0)))
      .await
      .unwrap();
    state
      .set_node_result(&ctx, Some(1), &record("b", NodeStatus::Succeeded, (2, 0)))
      .await
      .unwrap();
    state
      .set_node_result(&ctx, Some(2), &record("c", NodeStatus::Succeeded, (4, 0)))
      .await
      .unwrap();

    assert!(state.get_node_result(&ctx, None).await.contains_key("a"));
    assert!(state.get_node_result(&ctx, Some(1)).await.contains_key("b"));
    assert_eq!(state.get_node_result(&ctx, Some(2)).await.len(), 1);
    assert_eq!(state.total_tokens(&ctx, Some(2)).await, 4);
    assert_eq!(state.latest_turn(&ctx).await, Some(2));
    assert_eq!(state.latest_turn(&RunContext::draft("other")).await, None);

    state.clear_node_results(&ctx, Some(1)).await.unwrap();
    assert!(state.get_node_result(&ctx, Some(1)).await.is_empty());
    assert_eq!(state.get_node_result(&ctx, None).await.len(), 1);
  }

  #[tokio::test]
  async fn test_detail_log_reads_since_index() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Running, (0, 0)))
      .await
      .unwrap();
    state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Succeeded, (0, 0)))
      .await
      .unwrap();
    // refused writes are not logged
    state
      .set_node_result(&ctx, None, &record("a", NodeStatus::Running, (0, 0)))
      .await
      .unwrap();
    assert_eq!(state.detail_length(&ctx, None).await.unwrap(), 2);

    state.mark_session_end(&ctx, None).await.unwrap();
    assert_eq!(state.detail_length(&ctx, None).await.unwrap(), 3);

    let rest = state.detail_since(&ctx, None, 1).await.unwrap();
    assert_eq!(rest.len(), 2);
    assert!(matches!(&rest[0], DetailEntry::Node(r) if r.status == NodeStatus::Succeeded));
    assert!(matches!(rest[1], DetailEntry::SessionEnd { turn: None, .. }));
    assert!(state.detail_since(&ctx, None, 3).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_detail_entry_shape() {
    let entry = DetailEntry::SessionEnd {
      timestamp: Utc::now(),
      turn: Some(2),
    };
    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["type"], json!("session_end"));
    assert_eq!(value["turn"], json!(2));

    let node = serde_json::to_value(DetailEntry::Node(record("a", NodeStatus::Failed, (0, 0)))).unwrap();
    assert_eq!(node["type"], json!("node"));
    assert_eq!(node["node_id"], json!("a"));
  }

  #[tokio::test]
  async fn test_history_keeps_finished_records_per_turn() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    for turn in [1, 2] {
      state
        .set_node_result(&ctx, Some(turn), &record("a", NodeStatus::Running, (0, 0)))
        .await
        .unwrap();
      state
        .set_node_result(&ctx, Some(turn), &record("a", NodeStatus::Succeeded, (0, 0)))
        .await
        .unwrap();
      state.mark_session_end(&ctx, Some(turn)).await.unwrap();
      state.save_detail_to_history(&ctx, Some(turn)).await.unwrap();
    }

    // single-turn runs have no history
    state
      .set_node_result(&ctx, None, &record("z", NodeStatus::Succeeded, (0, 0)))
      .await
      .unwrap();
    state.save_detail_to_history(&ctx, None).await.unwrap();

    let history = state.get_detail_history(&ctx, None).await;
    assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(history[&1].len(), 1);
    assert_eq!(history[&1][0].status, NodeStatus::Succeeded);

    let latest = state.get_detail_history(&ctx, Some(1)).await;
    assert_eq!(latest.keys().copied().collect::<Vec<_>>(), vec![2]);
  }

  #[tokio::test]
  async fn test_history_is_capped() {
    let (_, state) = state();
    let ctx = RunContext::draft("app");

    for i in 0..(HISTORY_RECORDS_PER_TURN + 5) {
      let id = format!("n{}", i);
      state
        .set_node_result(&ctx, Some(1), &record(&id, NodeStatus::Succeeded, (0, 0)))
        .await
        .unwrap();
    }
    state.save_detail_to_history(&ctx, Some(1)).await.unwrap();

    let history = state.get_detail_history(&ctx, None).await;
    assert_eq!(history[&1].len(), HISTORY_RECORDS_PER_TURN);
    assert_eq!(history[&1][0].node_id, "n5");

    for turn in 2..=(HISTORY_TURNS as u32 + 1) {
      state
        .set_node_result(&ctx, Some(turn), &record("a", NodeStatus::Succeeded, (0, 0)))
        .await
        .unwrap();
      state.save_detail_to_history(&ctx, Some(turn)).await.unwrap();
    }

    let history = state.get_detail_history(&ctx, None).await;
    assert_eq!(history.len(), HISTORY_TURNS);
    assert!(!history.contains_key(&1));
    assert!(history.contains_key(&(HISTORY_TURNS as u32 + 1)));
  }

  #[tokio::test]
  async fn test_delete_detail_history_clears_every_turn() {
    let (store, state) = state();
    let ctx = RunContext::draft("app");

    for turn in [None, Some(1), Some(7)] {
      state
        .set_node_result(&ctx, turn, &record("a", NodeStatus::Succeeded, (1, 1)))
        .await
        .unwrap();
      state.save_detail_to_history(&ctx, turn).await.unwrap();
    }
    state
      .set_node_result(
        &RunContext::publish("app"),
        Some(1),
        &record("a", NodeStatus::Succeeded, (0, 0)),
      )
      .await
      .unwrap();

    state.delete_detail_history(&ctx).await.unwrap();

    assert!(state.get_detail_history(&ctx, None).await.is_empty());
    assert_eq!(state.latest_turn(&ctx).await, None);
    assert!(store.keys_with_prefix("run_detail:app:draft").await.unwrap().is_empty());
    assert!(store.keys_with_prefix("run_total_tokens:app:draft").await.unwrap().is_empty());
    assert_eq!(
      state
        .get_node_result(&RunContext::publish("app"), Some(1))
        .await
        .len(),
      1
    );
  }
}
