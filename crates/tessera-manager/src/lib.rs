//! Tessera Manager
//!
//! Tenant-facing façade over the engine. A [`RunManager`] binds one
//! [`RunContext`](tessera_workflow::RunContext) (app id, mode, optional node)
//! to at most one live engine session, decides reuse vs. restart under a
//! per-key lock, and records every run into
//! [`RunState`](tessera_store::RunState).
//!
//! ```text
//! RunManager ──► SessionRegistry (one slot per session key)
//!     │                 └─► EngineExecutor ─► EngineSession
//!     ├─► RunState      node records, graph, status, extras
//!     └─► BackflowSink  publish-mode run results
//! ```

mod backflow;
mod error;
mod manager;
mod registry;

pub use backflow::{BackflowRecord, BackflowSink, ModuleType, NoopBackflowSink, QueueBackflowSink};
pub use error::{BackflowError, ManagerError};
pub use manager::{RunManager, RunOptions};
pub use registry::SessionRegistry;
