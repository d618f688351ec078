//! Convenience re-exports for common use.

pub use crate::config::{
    load_servers, load_servers_or_empty, CollisionPolicy, RelaySettings, ServerConfig,
    SessionTimeouts,
};
pub use crate::dispatch::{ChatCompletionsDecider, Decider, DecisionRequest, DialogueTurn, Dispatcher};
pub use crate::error::{RelayError, Result};
pub use crate::lifecycle::Lifecycle;
pub use crate::mcp::{InvocationResult, Operation, SessionPool, ShutdownReport, StartupReport};
