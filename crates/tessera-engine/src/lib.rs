//! Tessera Engine
//!
//! This crate owns the lifecycle of running workflow graphs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EngineExecutor                         │
//! │  - process_workflow(def, ctx) → WorkflowGraph               │
//! │  - start_engine / stop_engine                               │
//! │  - execute_sync_task(inputs) → output                       │
//! │  - execute_stream_task(inputs) → RunStream                  │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ owns exactly one
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EngineSession                          │
//! │  Created → Starting → Running → Stopping → Stopped          │
//! │  (any step may end in Failed, which is terminal)            │
//! │  - binds the session's web/api endpoints (axum)             │
//! │  - runs requests on its Runtime under child tokens          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   tessera_runtime::Runtime                  │
//! │  - graph scheduling, node execution                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod executor;
mod server;
mod session;
mod stream;

pub use config::EngineConfig;
pub use error::{EngineError, EngineStartError};
pub use executor::{EngineExecutor, TaskOptions, normalize_output};
pub use session::{EngineSession, Endpoints, SessionStatus};
pub use stream::RunStream;
