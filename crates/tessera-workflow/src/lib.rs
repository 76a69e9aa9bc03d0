//! Tessera Workflow
//!
//! This crate provides the compiled workflow representation for Tessera.
//! A compiled workflow is a validated, immutable form of a workflow definition
//! that is ready to be instantiated by an engine session.
//!
//! Key differences from `tessera-config`:
//! - Graph structure is validated (unique ids, no dangling edges, no cycles)
//! - The execution-server resource is guaranteed when a node needs one
//! - Entry points, join points and sinks are identified
//!
//! It also holds the small value types shared by the engine and the run-state
//! layer: [`RunContext`] and [`NodeRunRecord`].

mod context;
mod error;
mod graph;
mod node;
mod record;
mod workflow;

pub use context::{RunContext, RunMode};
pub use error::GraphValidationError;
pub use graph::Graph;
pub use node::{Edge, NodeSpec, Resource};
pub use record::{NodeRunRecord, NodeStatus};
pub use workflow::WorkflowGraph;

pub use tessera_config::NodeKind;
