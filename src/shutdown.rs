//! Graceful shutdown coordination.
//!
//! The coordinator waits for SIGINT or SIGTERM and moves to draining, which
//! lets the HTTP server finish in-flight report requests. It then runs the registered [`ShutdownHandler`]s under a total timeout.
//!
//! ```rust,no_run
//! use sales_analytics::shutdown::{ShutdownConfig, ShutdownCoordinator};
//!
//! # async fn example() {
//! let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
//! coordinator.wait_for_signal().await;
//! assert_eq!(coordinator.phase().to_string(), "draining");
//! # }
//! ```

use crate::source::RowSource;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound on running every shutdown handler
    pub total_timeout: Duration,
    /// Upper bound on a single handler
    pub handler_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(10),
        }
    }
}

impl ShutdownConfig {
    pub fn with_total_timeout(mut self, timeout_secs: u64) -> Self {
        self.total_timeout = Duration::from_secs(timeout_secs);
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Serving requests
    Running,
    /// Signal received; the server is draining in-flight requests
    Draining,
    /// Handlers are releasing resources
    Closing,
    Complete,
    /// Handlers did not finish within the total timeout
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::Closing => write!(f, "closing"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

/// Coordinates graceful shutdown across server components
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: RwLock<ShutdownPhase>,
    shutdown_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    /// Starts draining without waiting for a signal
    pub fn initiate(&self) {
        if !self.shutdown_token.is_cancelled() {
            *self.phase.write() = ShutdownPhase::Draining;
            self.shutdown_token.cancel();
        }
    }

    /// Waits for SIGINT or SIGTERM, or for [`initiate`](Self::initiate), then
    /// cancels the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    warn!(%error, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            },
            _ = self.shutdown_token.cancelled() => {
                info!("shutdown requested");
            },
        }

        self.initiate();
    }

    /// Runs `handler` under the total timeout. A handler that overruns is
    /// abandoned and the phase is marked forced.
    pub async fn shutdown(&self, handler: &dyn ShutdownHandler) -> Result<()> {
        self.initiate();
        *self.phase.write() = ShutdownPhase::Closing;
        info!("running shutdown handlers");

        match timeout(self.config.total_timeout, handler.shutdown()).await {
            Ok(result) => {
                *self.phase.write() = ShutdownPhase::Complete;
                info!("graceful shutdown completed");
                result
            }
            Err(_) => {
                *self.phase.write() = ShutdownPhase::Forced;
                error!(
                    timeout_secs = self.config.total_timeout.as_secs(),
                    "graceful shutdown exceeded total timeout"
                );
                Ok(())
            }
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        self.config.handler_timeout
    }
}

/// Trait for components that need graceful shutdown
#[async_trait::async_trait]
pub trait ShutdownHandler: Send + Sync {
    async fn shutdown(&self) -> Result<()>;

    /// Name used in shutdown logs
    fn name(&self) -> &str {
        "component"
    }
}

/// Closes the row source's connection pool
pub struct RowSourceShutdownHandler {
    source: Arc<dyn RowSource>,
}

impl RowSourceShutdownHandler {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for RowSourceShutdownHandler {
    async fn shutdown(&self) -> Result<()> {
        info!(backend = self.source.kind(), "closing row source");
        self.source.close().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "row_source"
    }
}

/// Runs handlers in registration order, each under its own timeout. A failing
/// handler is logged and does not stop the ones after it.
pub struct CompositeShutdownHandler {
    handlers: Vec<Box<dyn ShutdownHandler>>,
    handler_timeout: Duration,
}

impl CompositeShutdownHandler {
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: Vec::new(),
            handler_timeout,
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn ShutdownHandler>) {
        self.handlers.push(handler);
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for CompositeShutdownHandler {
    async fn shutdown(&self) -> Result<()> {
        for handler in &self.handlers {
            match timeout(self.handler_timeout, handler.shutdown()).await {
                Ok(Ok(())) => debug!(handler = handler.name(), "shutdown handler finished"),
                Ok(Err(e)) => error!(handler = handler.name(), "shutdown handler error: {:#}", e),
                Err(_) => warn!(handler = handler.name(), "shutdown handler timed out"),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "composite"
    }
}
