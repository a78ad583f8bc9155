//! Relay server listener
//!
//! Binds the HTTP signaling endpoints and serves them until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::handler::RelayHandler;
use crate::server::routes::router;
use crate::server::service::RelayService;

/// WHIP/WHEP server
pub struct RelayServer<H: RelayHandler> {
    service: Arc<RelayService<H>>,
}

impl<H: RelayHandler> RelayServer<H> {
    /// Create a new server with the given configuration and handler
    pub async fn new(config: ServerConfig, handler: H) -> Result<Self> {
        Ok(Self {
            service: RelayService::new(config, handler).await?,
        })
    }

    /// Wrap an existing service
    pub fn from_service(service: Arc<RelayService<H>>) -> Self {
        Self { service }
    }

    /// Get the relay service
    pub fn service(&self) -> &Arc<RelayService<H>> {
        &self.service
    }

    /// Get the signaling router
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.service))
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// Every broadcaster is disconnected once `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        tracing::info!(addr = %self.bind_addr(), "WHIP/WHEP server listening");

        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
        })
        .await;

        self.service.shutdown().await;

        result.map_err(Into::into)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.service.config().bind_addr
    }
}
