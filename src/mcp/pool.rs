//! Multi-server session pool with a flat operation namespace.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schema::{InvocationResult, Operation};
use super::session::{CloseOutcome, Session};
use super::transport::{self, MCPTransport};
use crate::config::{CollisionPolicy, ServerConfig, SessionTimeouts};
use crate::error::{InvocationFailure, RelayError};

/// A server that made it into the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredServer {
    pub server: String,
    pub key: String,
    /// Names as exposed in the flat namespace.
    pub operations: Vec<String>,
}

#[derive(Debug)]
pub struct RegistrationFailure {
    pub server: String,
    pub error: RelayError,
}

/// Outcome of registering a batch of servers. Never partial-aborts.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub registered: Vec<RegisteredServer>,
    pub failures: Vec<RegistrationFailure>,
}

impl StartupReport {
    pub fn attempted(&self) -> usize {
        self.registered.len() + self.failures.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub server: String,
    pub errors: Vec<String>,
}

/// Outcome of [`SessionPool::close_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub failures: Vec<CloseFailure>,
}

impl ShutdownReport {
    pub fn attempted(&self) -> usize {
        self.closed.len() + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct PooledSession {
    server: String,
    key: String,
    /// Discovered operations, renamed per the collision policy.
    exposed: Vec<Operation>,
    session: Mutex<Session>,
}

#[derive(Clone)]
struct Route {
    session: Weak<PooledSession>,
    upstream: String,
}

/// Owns every live session and the name → session lookup.
///
/// The lookup is the only structure written after startup; it sits behind a
/// read-mostly lock. Each session is single-flight behind its own mutex, so
/// calls to different servers run independently.
///
/// [`SessionPool::close_all`] does not queue behind in-flight calls: it
/// trips the shutdown token first, which abandons any call still waiting on
/// a session, then closes every session.
pub struct SessionPool {
    sessions: RwLock<Vec<Arc<PooledSession>>>,
    routes: RwLock<HashMap<String, Route>>,
    policy: CollisionPolicy,
    timeouts: SessionTimeouts,
    shutdown: CancellationToken,
}

impl SessionPool {
    pub fn new(policy: CollisionPolicy, timeouts: SessionTimeouts) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            routes: RwLock::new(HashMap::new()),
            policy,
            timeouts,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Server keys in registration order.
    pub async fn server_keys(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|pooled| pooled.key.clone())
            .collect()
    }

    /// Connect, handshake and list one server, then add it to the pool.
    pub async fn register(&self, config: &ServerConfig) -> Result<RegisteredServer, RelayError> {
        let transport = transport::open(config).await?;
        let (session, operations) = establish(transport, self.timeouts).await?;
        self.admit(config, session, operations).await
    }

    /// Register every config concurrently; merge results in config order.
    pub async fn register_all(&self, configs: &[ServerConfig]) -> StartupReport {
        self.register_all_with(configs, |config| async move {
            transport::open(&config).await
        })
        .await
    }

    pub(crate) async fn register_all_with<F, Fut>(
        &self,
        configs: &[ServerConfig],
        open: F,
    ) -> StartupReport
    where
        F: Fn(ServerConfig) -> Fut,
        Fut: Future<Output = Result<Box<dyn MCPTransport>, RelayError>>,
    {
        let timeouts = self.timeouts;
        let attempts = join_all(configs.iter().map(|config| {
            let opening = open(config.clone());
            async move {
                let transport = opening.await?;
                establish(transport, timeouts).await
            }
        }))
        .await;

        let mut report = StartupReport::default();
        for (config, attempt) in configs.iter().zip(attempts) {
            let outcome = match attempt {
                Ok((session, operations)) => self.admit(config, session, operations).await,
                Err(error) => Err(error),
            };
            match outcome {
                Ok(registered) => report.registered.push(registered),
                Err(error) => {
                    warn!(server = %config.name, error = %error, "failed to register MCP server");
                    report.failures.push(RegistrationFailure {
                        server: config.name.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Single mutation point for sessions and routes.
    async fn admit(
        &self,
        config: &ServerConfig,
        mut session: Session,
        operations: Vec<Operation>,
    ) -> Result<RegisteredServer, RelayError> {
        let key = config.key();
        let mut sessions = self.sessions.write().await;
        if self.shutdown.is_cancelled() {
            drop(sessions);
            session.close().await;
            return Err(RelayError::InvalidState(format!(
                "session pool is closed; '{}' was not registered",
                config.name
            )));
        }
        if sessions.iter().any(|pooled| pooled.key == key) {
            drop(sessions);
            session.close().await;
            return Err(RelayError::Configuration(format!(
                "duplicate server key '{key}' for '{}'",
                config.name
            )));
        }

        let exposed: Vec<Operation> = operations
            .into_iter()
            .map(|operation| Operation {
                name: exposed_name(self.policy, &key, &operation.name),
                ..operation
            })
            .collect();
        let upstream: Vec<String> = session
            .operations()
            .iter()
            .map(|operation| operation.name.clone())
            .collect();

        let pooled = Arc::new(PooledSession {
            server: config.name.clone(),
            key: key.clone(),
            exposed,
            session: Mutex::new(session),
        });

        let mut routes = self.routes.write().await;
        for (operation, upstream) in pooled.exposed.iter().zip(upstream) {
            let route = Route {
                session: Arc::downgrade(&pooled),
                upstream,
            };
            if let Some(previous) = routes.insert(operation.name.clone(), route) {
                if let Some(previous) = previous.session.upgrade() {
                    if previous.key != key {
                        warn!(
                            operation = %operation.name,
                            previous = %previous.key,
                            current = %key,
                            "operation name collision; later registration wins"
                        );
                    }
                }
            }
        }
        drop(routes);

        let registered = RegisteredServer {
            server: pooled.server.clone(),
            key,
            operations: pooled.exposed.iter().map(|op| op.name.clone()).collect(),
        };
        sessions.push(pooled);

        info!(
            server = %registered.server,
            operations = registered.operations.len(),
            "registered MCP server"
        );
        Ok(registered)
    }

    /// Routed operations: registration order, then discovery order.
    pub async fn catalog(&self) -> Vec<Operation> {
        let sessions = self.sessions.read().await;
        let routes = self.routes.read().await;
        let mut catalog = Vec::new();
        for pooled in sessions.iter() {
            for operation in &pooled.exposed {
                let owns_route = routes
                    .get(&operation.name)
                    .and_then(|route| route.session.upgrade())
                    .is_some_and(|owner| Arc::ptr_eq(&owner, pooled));
                if owns_route {
                    catalog.push(operation.clone());
                }
            }
        }
        catalog
    }

    /// Route a call to the session owning `name`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<InvocationResult, RelayError> {
        let route = self.routes.read().await.get(name).cloned();
        let Some((pooled, upstream)) =
            route.and_then(|route| route.session.upgrade().map(|s| (s, route.upstream)))
        else {
            return Err(RelayError::OperationNotFound(name.to_string()));
        };

        debug!(operation = name, server = %pooled.key, upstream = %upstream, "routing invocation");
        let mut session = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(abandoned(name)),
            session = pooled.session.lock() => session,
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(abandoned(name)),
            result = session.invoke(&upstream, arguments) => result,
        }
    }

    /// Close every session, continuing past individual failures.
    ///
    /// In-flight calls are abandoned with `TransportLost` rather than awaited.
    pub async fn close_all(&self) -> ShutdownReport {
        self.shutdown.cancel();
        let drained: Vec<Arc<PooledSession>> = {
            let mut sessions = self.sessions.write().await;
            self.routes.write().await.clear();
            sessions.drain(..).collect()
        };

        let outcomes = join_all(drained.iter().map(|pooled| async move {
            let outcome = pooled.session.lock().await.close().await;
            (pooled.server.clone(), outcome)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (server, outcome) in outcomes {
            match outcome {
                CloseOutcome::Closed | CloseOutcome::AlreadyClosed => report.closed.push(server),
                CloseOutcome::ClosedWithErrors(errors) => {
                    report.failures.push(CloseFailure { server, errors })
                }
            }
        }
        report
    }
}

fn abandoned(operation: &str) -> RelayError {
    RelayError::invocation(
        operation,
        InvocationFailure::TransportLost,
        "session pool closed while the call was in flight",
    )
}

fn exposed_name(policy: CollisionPolicy, key: &str, operation: &str) -> String {
    match policy {
        CollisionPolicy::LastRegistrationWins => operation.to_string(),
        CollisionPolicy::NamespaceServerAndTool => format!("{key}__{operation}"),
    }
}

/// Handshake and list; release the transport if either step fails.
async fn establish(
    transport: Box<dyn MCPTransport>,
    timeouts: SessionTimeouts,
) -> Result<(Session, Vec<Operation>), RelayError> {
    let mut session = Session::initialize(transport, timeouts).await?;
    match session.list_operations().await {
        Ok(operations) => Ok((session, operations)),
        Err(error) => {
            session.close().await;
            Err(error)
        }
    }
}
