//! Error types for toolrelay.

use strum::{Display, EnumString};
use thiserror::Error;

/// Why a transport could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionFailure {
    /// The child process could not be spawned or exited before the handshake.
    SpawnFailed,
    /// DNS, connect, TLS, or a non-2xx response on the stream endpoint.
    NetworkFailed,
}

/// Why the MCP protocol exchange with a server failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ProtocolFailure {
    HandshakeFailed,
    /// The server rejected the offered protocol version.
    UnsupportedVersion,
    CatalogFailed,
}

/// Why a single operation call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum InvocationFailure {
    UnknownOperation,
    RemoteFailure,
    TransportLost,
    Timeout,
}

/// Primary error type for all toolrelay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection to '{server}' failed ({failure}): {message}")]
    Connection {
        server: String,
        failure: ConnectionFailure,
        message: String,
    },

    #[error("Protocol error from '{server}' ({failure}): {message}")]
    Protocol {
        server: String,
        failure: ProtocolFailure,
        message: String,
    },

    #[error("Operation '{operation}' failed ({failure}): {message}")]
    Invocation {
        operation: String,
        failure: InvocationFailure,
        message: String,
    },

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("No tool servers available ({attempted} attempted)")]
    NoServers { attempted: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decision error: {0}")]
    Decision(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Broad classification used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Invocation,
    Routing,
    Configuration,
    Decision,
    Timeout,
    Unknown,
}

impl RelayError {
    pub fn connection(
        server: impl Into<String>,
        failure: ConnectionFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            server: server.into(),
            failure,
            message: message.into(),
        }
    }

    pub fn protocol(
        server: impl Into<String>,
        failure: ProtocolFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            server: server.into(),
            failure,
            message: message.into(),
        }
    }

    pub fn invocation(
        operation: impl Into<String>,
        failure: InvocationFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::Invocation {
            operation: operation.into(),
            failure,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } | Self::Network(_) => ErrorCategory::Connection,
            Self::Protocol { .. } | Self::Serialization(_) => ErrorCategory::Protocol,
            Self::Invocation { .. } | Self::InvalidArgument(_) => ErrorCategory::Invocation,
            Self::OperationNotFound(_) => ErrorCategory::Routing,
            Self::Configuration(_) | Self::NoServers { .. } | Self::Toml(_) => {
                ErrorCategory::Configuration
            }
            Self::Decision(_) => ErrorCategory::Decision,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Io(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Only an empty pool ends the process; everything else is per server or per turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoServers { .. })
    }

    pub fn connection_failure(&self) -> Option<ConnectionFailure> {
        match self {
            Self::Connection { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    pub fn protocol_failure(&self) -> Option<ProtocolFailure> {
        match self {
            Self::Protocol { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    pub fn invocation_failure(&self) -> Option<InvocationFailure> {
        match self {
            Self::Invocation { failure, .. } => Some(*failure),
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;
