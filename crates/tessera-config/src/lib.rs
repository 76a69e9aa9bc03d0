//! Tessera Config
//!
//! This crate contains the serializable workflow definition types for Tessera.
//! These types represent workflows exactly as the persistence layer stores them,
//! before they are validated and compiled into an executable graph.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI)
//! - Database storage (as JSON blobs)
//!
//! The compiler takes these types, validates the graph structure and produces
//! the immutable `WorkflowGraph` the engine executes.

mod edge;
mod input;
mod node;
mod resource;
mod workflow;

pub use edge::EdgeDef;
pub use input::InputValue;
pub use node::{NodeDef, NodeKind};
pub use resource::{ResourceDef, SERVER_RESOURCE_KIND};
pub use workflow::WorkflowDef;
