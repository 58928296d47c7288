//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::router;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::SharedRegistry;

/// HTTP server for the greeting service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Client limiter registry shared by all connections
    registry: SharedRegistry,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, registry: SharedRegistry) -> Self {
        Self { addr, registry }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending::<()>()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Failing
    /// to bind the listen address is fatal.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GatekeeperError::Io(e)
        })?;

        Self::serve_listener(listener, self.registry, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_listener<F>(
        listener: TcpListener,
        registry: SharedRegistry,
        signal: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Server started on {}", addr);

        // Connection info carries the peer address the middleware keys on
        let app = router(registry).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatekeeperError::Io(e)
            })
    }
}
