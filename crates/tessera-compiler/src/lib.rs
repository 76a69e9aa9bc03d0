//! Tessera Compiler
//!
//! Turns a [`WorkflowDef`](tessera_config::WorkflowDef) into an immutable
//! [`WorkflowGraph`](tessera_workflow::WorkflowGraph):
//!
//! 1. Validates the graph structure (unique ids, no dangling edges, no cycles)
//! 2. Ensures an execution-server resource exists when a node needs one
//! 3. Optionally trims the graph to a single node for isolated re-runs

mod compiler;
mod resources;
mod scope;

pub use compiler::GraphCompiler;
pub use resources::with_server_resource;
