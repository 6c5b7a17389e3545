//! Daemon Server Implementation
//!
//! This module provides the server loop for the relay daemon:
//! - Binds the TCP listener
//! - Serves the streaming router until a shutdown signal arrives
//! - Cancels every live session on shutdown and waits out the grace period
//!
//! # Shutdown Sequence
//!
//! ```text
//!   signal ──► stop accepting ──► cancel_all(Shutdown) ──► sessions end
//!                                                            │
//!                 exit ◄── connections closed ◄──────────────┘
//!                   ▲
//!                   └── or the grace period elapses first
//! ```

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use relay_core::{
    router, CancelReason, RelayConfig, RelayState, SessionRegistry, StreamMultiplexer,
};

/// The HTTP streaming server
pub struct RelayServer {
    listener: TcpListener,
    state: RelayState,
    grace: Duration,
}

impl RelayServer {
    /// Bind the listener described by `config`
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.server.bind)
            .await
            .with_context(|| format!("Failed to bind to {}", config.server.bind))?;

        Ok(Self::from_parts(
            listener,
            StreamMultiplexer::new(&config.stream),
            config.server.shutdown_grace,
        ))
    }

    /// Build a server around an already bound listener
    pub fn from_parts(
        listener: TcpListener,
        multiplexer: StreamMultiplexer,
        grace: Duration,
    ) -> Self {
        Self {
            listener,
            state: RelayState::new(multiplexer),
            grace,
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Registry of the sessions this server runs
    pub fn registry(&self) -> SessionRegistry {
        self.state.multiplexer().registry().clone()
    }

    /// Serve until `shutdown` resolves, then drain live sessions
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let registry = self.registry();
        let grace = self.grace;
        let (draining_tx, mut draining_rx) = watch::channel(false);

        info!(%addr, "Listening for connections");

        let signal_registry = registry.clone();
        let signal = async move {
            shutdown.await;
            let active = signal_registry.active_count();
            info!(active, "Shutdown requested, cancelling live sessions");
            signal_registry.cancel_all(CancelReason::Shutdown);
            draining_tx.send_replace(true);
        };

        let serve = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(signal)
            .into_future();

        let grace_period = async move {
            if draining_rx.wait_for(|draining| *draining).await.is_err() {
                std::future::pending::<()>().await;
            }
            let started = Instant::now();
            if registry.wait_idle(grace).await {
                info!("All sessions ended");
            } else {
                warn!(
                    active = registry.active_count(),
                    "Sessions still live after grace period"
                );
            }
            tokio::time::sleep_until(started + grace).await;
        };

        tokio::select! {
            result = serve => {
                result.context("HTTP server failed")?;
                info!("Server stopped cleanly");
            }
            () = grace_period => {
                warn!(
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "Grace period elapsed, closing remaining connections"
                );
            }
        }
        Ok(())
    }
}
