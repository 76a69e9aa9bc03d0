//! Graph runtime.
//!
//! The [`Runtime`] struct owns a compiled workflow and the executor instance
//! for each of its nodes, and provides `invoke(run_id, inputs, notifier,
//! cancel)` to execute the full graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Value, json};
use tessera_workflow::{Edge, Graph, NodeRunRecord, NodeSpec, NodeStatus, WorkflowGraph};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::{NodeError, RuntimeError};
use crate::event::{ExecutionNotifier, RunEvent};
use crate::input::resolve_bindings;
use crate::node::{NodeContext, NodeExecutor, NodeOutput};
use crate::registry::NodeRegistry;

/// Outcome of a node whose upstreams have all resolved.
enum NodeState {
  Completed(NodeOutput),
  /// None of the node's incoming edges were taken.
  Skipped,
}

/// What a spawned node task hands back to the scheduler.
struct NodeRun {
  node_id: String,
  input: Value,
  result: Result<NodeOutput, NodeError>,
  elapsed: Duration,
}

/// The graph runtime.
///
/// Handles graph traversal, scheduling, input assembly and branch routing, and
/// delegates the work of each node to its [`NodeExecutor`].
pub struct Runtime {
  workflow: WorkflowGraph,
  graph: Graph,
  executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl Runtime {
  /// Create a runtime for the given workflow, looking up every node's
  /// implementation in `registry`.
  pub fn new(workflow: WorkflowGraph, registry: &NodeRegistry) -> Result<Self, RuntimeError> {
    let mut executors = HashMap::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
      let executor =
        registry
          .get(node.kind.as_str())
          .ok_or_else(|| RuntimeError::UnknownNodeKind {
            node_id: node.id.clone(),
            kind: node.kind.to_string(),
          })?;
      executors.insert(node.id.clone(), executor);
    }

    let graph = workflow.graph();
    Ok(Self {
      workflow,
      graph,
      executors,
    })
  }

  pub fn workflow(&self) -> &WorkflowGraph {
    &self.workflow
  }

  /// Run every node's one-time preparation concurrently.
  #[instrument(
    name = "runtime_prepare",
    skip(self),
    fields(graph_id = %self.workflow.graph_id)
  )]
  pub async fn prepare(&self) -> Result<(), RuntimeError> {
    let preparations = self.workflow.nodes.iter().map(|node| async move {
      let executor = self.executor(&node.id)?;
      executor
        .prepare(node)
        .await
        .map_err(|source| RuntimeError::Prepare {
          node_id: node.id.clone(),
          source,
        })
    });

    futures::future::join_all(preparations)
      .await
      .into_iter()
      .collect::<Result<Vec<_>, _>>()?;
    Ok(())
  }

  /// Execute the graph.
  ///
  /// Entry nodes receive `inputs[0]` when exactly one input is given and the
  /// whole array otherwise. Each node is reported to `notifier` twice as a
  /// [`RunEvent::Node`]: `running` when it is scheduled, then `succeeded` or
  /// `failed`. Nodes on independent branches run concurrently and complete
  /// in any order.
  ///
  /// Returns the output of the completed sink nodes: the single value, an
  /// array in node order when there are several, `null` when none ran.
  #[instrument(
    name = "runtime_invoke",
    skip(self, inputs, notifier, cancel),
    fields(graph_id = %self.workflow.graph_id, run_id = %run_id)
  )]
  pub async fn invoke(
    &self,
    run_id: &str,
    inputs: Vec<Value>,
    notifier: Arc<dyn ExecutionNotifier>,
    cancel: CancellationToken,
  ) -> Result<Value, RuntimeError> {
    info!(run_id = %run_id, graph_id = %self.workflow.graph_id, "workflow_started");

    let entry_input = if inputs.len() == 1 {
      inputs.into_iter().next().unwrap_or_default()
    } else {
      Value::Array(inputs)
    };

    let mut execution = Execution {
      runtime: self,
      run_id: run_id.to_string(),
      entry_input,
      notifier,
      cancel,
      states: HashMap::new(),
      running: HashSet::new(),
      pending: FuturesUnordered::new(),
      aborts: Vec::new(),
    };

    let result = execution.run().await;
    match &result {
      Ok(_) => info!(run_id = %run_id, "workflow_completed"),
      Err(e) => error!(run_id = %run_id, error = %e, "workflow_failed"),
    }
    result
  }

  fn executor(&self, node_id: &str) -> Result<Arc<dyn NodeExecutor>, RuntimeError> {
    self
      .executors
      .get(node_id)
      .cloned()
      .ok_or_else(|| RuntimeError::InvalidGraph {
        message: format!("no executor bound to node '{}'", node_id),
      })
  }

  fn node(&self, node_id: &str) -> Result<&NodeSpec, RuntimeError> {
    self
      .workflow
      .get_node(node_id)
      .ok_or_else(|| RuntimeError::InvalidGraph {
        message: format!("node '{}' not found in workflow", node_id),
      })
  }
}

/// State of one `invoke` call. Dropping it aborts every node still running.
struct Execution<'a> {
  runtime: &'a Runtime,
  run_id: String,
  entry_input: Value,
  notifier: Arc<dyn ExecutionNotifier>,
  cancel: CancellationToken,
  states: HashMap<String, NodeState>,
  running: HashSet<String>,
  pending: FuturesUnordered<JoinHandle<NodeRun>>,
  aborts: Vec<AbortHandle>,
}

impl Execution<'_> {
  async fn run(&mut self) -> Result<Value, RuntimeError> {
    loop {
      if self.cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
      }

      self.schedule_ready()?;
      if self.pending.is_empty() {
        break;
      }

      let joined = tokio::select! {
        joined = self.pending.next() => joined,
        _ = self.cancel.cancelled() => return Err(RuntimeError::Cancelled),
      };
      let Some(joined) = joined else {
        break;
      };

      let run = joined.map_err(|e| RuntimeError::InvalidGraph {
        message: format!("task join error: {}", e),
      })?;
      self.complete(run)?;
    }

    Ok(self.terminal_output())
  }

  /// Spawn every node whose upstreams have all resolved, and skip the ones
  /// none of whose incoming edges were taken. Repeats until nothing changes,
  /// since a skip can resolve further nodes.
  fn schedule_ready(&mut self) -> Result<(), RuntimeError> {
    let runtime = self.runtime;

    loop {
      let mut progressed = false;

      for node in &runtime.workflow.nodes {
        if self.states.contains_key(&node.id) || self.running.contains(&node.id) {
          continue;
        }

        let incoming = runtime.graph.incoming(&node.id);
        if !incoming.iter().all(|e| self.states.contains_key(&e.from)) {
          continue;
        }
        progressed = true;

        if incoming.is_empty() {
          let input = self.entry_input.clone();
          self.spawn(node, input, HashMap::new())?;
          continue;
        }

        let active: Vec<(&str, &Value)> = incoming
          .iter()
          .filter_map(|edge| match self.states.get(&edge.from) {
            Some(NodeState::Completed(output)) if edge_taken(edge, output) => {
              Some((edge.from.as_str(), &output.value))
            }
            _ => None,
          })
          .collect();

        if active.is_empty() {
          debug!(run_id = %self.run_id, node_id = %node.id, "node_skipped");
          self.states.insert(node.id.clone(), NodeState::Skipped);
          continue;
        }

        let input = match active.as_slice() {
          [(_, value)] => (*value).clone(),
          many => Value::Array(many.iter().map(|(_, v)| (*v).clone()).collect()),
        };
        let upstream: HashMap<String, Value> = active
          .iter()
          .map(|(id, value)| (id.to_string(), (*value).clone()))
          .collect();

        self.spawn(node, input, upstream)?;
      }

      if !progressed {
        return Ok(());
      }
    }
  }

  fn spawn(
    &mut self,
    node: &NodeSpec,
    input: Value,
    upstream: HashMap<String, Value>,
  ) -> Result<(), RuntimeError> {
    let executor = self.runtime.executor(&node.id)?;
    let ctx = NodeContext::new(
      self.run_id.clone(),
      node.id.clone(),
      self.cancel.clone(),
      self.notifier.clone(),
    );

    debug!(run_id = %self.run_id, node_id = %node.id, kind = %node.kind, "node_started");
    self.notifier.notify(RunEvent::Node(node_record(
      node,
      input.clone(),
      Value::Null,
      NodeStatus::Running,
      &NodeOutput::default(),
      Duration::ZERO,
    )));

    let handle = tokio::spawn(run_node(executor, node.clone(), input, upstream, ctx));
    self.aborts.push(handle.abort_handle());
    self.running.insert(node.id.clone());
    self.pending.push(handle);
    Ok(())
  }

  fn complete(&mut self, run: NodeRun) -> Result<(), RuntimeError> {
    self.running.remove(&run.node_id);
    let node = self.runtime.node(&run.node_id)?;

    match run.result {
      Ok(output) => {
        info!(
          run_id = %self.run_id,
          node_id = %run.node_id,
          elapsed_ms = run.elapsed.as_millis() as u64,
          "node_completed"
        );
        let record = node_record(
          node,
          run.input,
          output.value.clone(),
          NodeStatus::Succeeded,
          &output,
          run.elapsed,
        );
        self.notifier.notify(RunEvent::Node(record));
        self.states.insert(run.node_id, NodeState::Completed(output));
        Ok(())
      }
      Err(NodeError::Cancelled) if self.cancel.is_cancelled() => Err(RuntimeError::Cancelled),
      Err(source) => {
        error!(
          run_id = %self.run_id,
          node_id = %run.node_id,
          error = %source,
          "node_failed"
        );
        let record = node_record(
          node,
          run.input,
          json!({ "error": source.to_string() }),
          NodeStatus::Failed,
          &NodeOutput::default(),
          run.elapsed,
        );
        self.notifier.notify(RunEvent::Node(record));
        Err(RuntimeError::NodeFailed {
          node_id: run.node_id,
          source,
        })
      }
    }
  }

  fn terminal_output(&self) -> Value {
    let mut outputs: Vec<Value> = self
      .runtime
      .graph
      .sinks()
      .iter()
      .filter_map(|id| match self.states.get(id) {
        Some(NodeState::Completed(output)) => Some(output.value.clone()),
        _ => None,
      })
      .collect();

    match outputs.len() {
      0 => Value::Null,
      1 => outputs.pop().unwrap_or_default(),
      _ => Value::Array(outputs),
    }
  }
}

impl Drop for Execution<'_> {
  fn drop(&mut self) {
    for handle in &self.aborts {
      handle.abort();
    }
  }
}

/// An edge carries data when its upstream completed and either has no
/// condition or the upstream selected the matching branch tag.
fn edge_taken(edge: &Edge, upstream: &NodeOutput) -> bool {
  match &edge.condition {
    None => true,
    Some(tag) => upstream.branch.as_deref() == Some(tag.as_str()),
  }
}

async fn run_node(
  executor: Arc<dyn NodeExecutor>,
  node: NodeSpec,
  input: Value,
  upstream: HashMap<String, Value>,
  ctx: NodeContext,
) -> NodeRun {
  let started = Instant::now();

  let (input, result) = if node.input_bindings.is_empty() {
    let result = execute_node(executor.as_ref(), &node, input.clone(), &ctx).await;
    (input, result)
  } else {
    match resolve_bindings(&node.input_bindings, &input, &upstream) {
      Ok(resolved) => {
        let result = execute_node(executor.as_ref(), &node, resolved.clone(), &ctx).await;
        (resolved, result)
      }
      Err(e) => (input, Err(e)),
    }
  };

  NodeRun {
    node_id: node.id,
    input,
    result,
    elapsed: started.elapsed(),
  }
}

/// Execute one node, bounded by its own timeout when it declares one.
async fn execute_node(
  executor: &dyn NodeExecutor,
  node: &NodeSpec,
  input: Value,
  ctx: &NodeContext,
) -> Result<NodeOutput, NodeError> {
  let execute = executor.execute(node, input, ctx);
  match node.timeout_ms {
    Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), execute)
      .await
      .unwrap_or(Err(NodeError::Timeout { timeout_ms })),
    None => execute.await,
  }
}

fn node_record(
  node: &NodeSpec,
  inputs: Value,
  outputs: Value,
  status: NodeStatus,
  usage: &NodeOutput,
  elapsed: Duration,
) -> NodeRunRecord {
  NodeRunRecord {
    node_id: node.id.clone(),
    node_type: node.kind.to_string(),
    title: node.title.clone(),
    inputs,
    outputs,
    status,
    elapsed_time: elapsed.as_secs_f64(),
    prompt_tokens: usage.prompt_tokens,
    completion_tokens: usage.completion_tokens,
  }
}
