//! Built-in node types.

mod branch;
mod constant;
mod http;
mod join;
mod passthrough;
mod template;

pub use branch::BranchNode;
pub use constant::ConstantNode;
pub use http::HttpNode;
pub use join::JoinNode;
pub use passthrough::PassthroughNode;
pub use template::TemplateNode;
