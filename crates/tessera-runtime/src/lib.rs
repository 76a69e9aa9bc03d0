//! Tessera Runtime
//!
//! This crate executes compiled workflow graphs. It provides:
//!
//! - **Node contract**: the [`NodeExecutor`] trait every node type implements
//! - **Registry**: [`NodeRegistry`] maps node type tags to implementations
//! - **Built-in nodes**: start, end, join, branch, template, constant, http
//! - **Scheduling**: [`Runtime`] runs ready nodes concurrently as their
//!   upstreams resolve and reports every completion through an
//!   [`ExecutionNotifier`]
//!
//! # Architecture
//!
//! ```text
//! Runtime::invoke(inputs, notifier, cancel)
//!     │
//!     ├─ entry nodes receive the run inputs
//!     ├─ a node is spawned once all of its upstreams completed or were skipped
//!     ├─ branch tags deactivate edges; nodes with no active input are skipped
//!     └─ result = output of the completed sink nodes
//! ```

mod error;
mod event;
mod input;
mod node;
pub mod nodes;
mod registry;
mod runtime;

pub use error::{NodeError, RuntimeError};
pub use event::{ChannelNotifier, ExecutionNotifier, NoopNotifier, RunEvent};
pub use input::resolve_bindings;
pub use node::{NodeContext, NodeExecutor, NodeOutput};
pub use registry::NodeRegistry;
pub use runtime::Runtime;
