/// Model Context Protocol (MCP) surface for GovDB.
///
/// The transport is JSON-RPC over stdio: stdout carries protocol traffic
/// only, logs go to stderr. Tool implementations delegate to the shared
/// `ServerContext`.
pub mod server;
pub mod tools;
pub mod types;

pub use server::run_stdio_server;
pub use tools::GovernanceTools;
pub use types::*;
