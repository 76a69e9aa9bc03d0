//! Tessera Store
//!
//! Run state and task queues on top of a key-value cache.
//!
//! The [`KvStore`] trait abstracts the cache (strings, hashes, lists and
//! counters, Redis-style). [`SqliteKvStore`] persists to a SQLite file;
//! [`InMemoryKvStore`] lives and dies with the process.
//!
//! - [`RunState`] keeps the per-run node records and their append log, the
//!   per-turn history, the compiled graph, the engine status and run extras
//! - [`TaskQueue`] is a polling FIFO of JSON items

mod error;
mod kv;
mod queue;
mod sqlite;
mod state;

pub use error::{KvError, QueueError, StateError};
pub use kv::{InMemoryKvStore, KvStore};
pub use queue::{QueueItem, TaskQueue};
pub use sqlite::SqliteKvStore;
pub use state::{
  DetailEntry, DetailHistory, EngineStatus, EngineStatusRecord, NodeMeta, RunExtras, RunState,
};
