//! Model Context Protocol (MCP) sessions over process and stream transports.

pub mod pool;
pub mod schema;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use pool::{
    CloseFailure, RegisteredServer, RegistrationFailure, SessionPool, ShutdownReport,
    StartupReport,
};
pub use schema::{InvocationRequest, InvocationResult, Operation};
pub use session::{CloseOutcome, Session, SessionState};
pub use transport::MCPTransport;
