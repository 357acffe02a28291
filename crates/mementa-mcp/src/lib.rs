//! # mementa-mcp
//!
//! The agent-facing runtime of mementa: a name-dispatched tool registry with
//! schema validation and retry/timeout policy, a line-delimited JSON
//! protocol adapter, and the in-memory session/association layer.

pub mod protocol;
pub mod registry;
pub mod session;
pub mod tools;

pub use protocol::ProtocolServer;
pub use registry::{
    parse_input, with_execution_policy, Tool, ToolContext, ToolDescriptor, ToolRegistry,
};
pub use session::{AssociateOptions, AssociatedHit, SessionStore};
pub use tools::register_builtin;
