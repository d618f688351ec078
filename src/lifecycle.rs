//! Startup, steady state, and teardown of the whole relay.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{enabled_servers, RelaySettings, ServerConfig};
use crate::dispatch::{Decider, Dispatcher};
use crate::error::RelayError;
use crate::mcp::{SessionPool, ShutdownReport, StartupReport};

/// Owns the session pool from startup until shutdown.
pub struct Lifecycle {
    pool: Arc<SessionPool>,
    settings: RelaySettings,
    startup: StartupReport,
}

impl Lifecycle {
    /// Connect every enabled server, continuing past individual failures.
    ///
    /// Fails with [`RelayError::NoServers`] when nothing is configured or
    /// when every registration failed.
    pub async fn start(
        configs: Vec<ServerConfig>,
        settings: RelaySettings,
    ) -> Result<Self, RelayError> {
        let enabled = enabled_servers(configs);
        if enabled.is_empty() {
            warn!("no enabled tool servers configured");
            return Err(RelayError::NoServers { attempted: 0 });
        }

        info!(count = enabled.len(), "connecting to tool servers");
        let pool = SessionPool::new(settings.collision_policy, settings.timeouts);
        let startup = pool.register_all(&enabled).await;

        for registered in &startup.registered {
            info!(
                server = %registered.server,
                operations = registered.operations.len(),
                "tool server ready"
            );
        }

        if startup.registered.is_empty() {
            warn!(
                attempted = startup.attempted(),
                "no tool server could be registered"
            );
            pool.close_all().await;
            return Err(RelayError::NoServers {
                attempted: startup.attempted(),
            });
        }

        Ok(Self {
            pool: Arc::new(pool),
            settings,
            startup,
        })
    }

    pub fn pool(&self) -> Arc<SessionPool> {
        Arc::clone(&self.pool)
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.startup
    }

    pub fn dispatcher(&self, decider: Arc<dyn Decider>) -> Dispatcher {
        Dispatcher::new(self.pool(), decider)
    }

    /// Drive the dialogue loop, then shut down whatever way it ended.
    pub async fn run<R, W>(
        &self,
        decider: Arc<dyn Decider>,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> Result<ShutdownReport, RelayError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let outcome = self.dispatcher(decider).run(input, output, cancel).await;
        let report = self.shutdown().await;
        outcome.map(|()| report)
    }

    /// Close every session. Always attempts all of them; safe to call twice.
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.pool.close_all().await;
        for failure in &report.failures {
            warn!(
                server = %failure.server,
                errors = ?failure.errors,
                "tool server did not close cleanly"
            );
        }
        info!(
            closed = report.closed.len(),
            failed = report.failures.len(),
            "shutdown complete"
        );
        report
    }
}
