//! Input binding types for node configuration.
//!
//! Input bindings are template strings rendered by minijinja at runtime against
//! the node's assembled input and the outputs of its upstream nodes.
//!
//! # Examples
//!
//! ```json
//! {
//!   "question": "{{ input }}",
//!   "context": "{{ upstream.retriever }}",
//!   "limit": "5"
//! }
//! ```
//!
//! A rendered value that parses as JSON is passed on as JSON (`"5"` becomes
//! `5`); anything else stays a string.

/// An input value is a template string that gets resolved at runtime.
pub type InputValue = String;
