//! HTTP server assembly for switchyard
//!
//! Mounts the gateway routes behind virtual-key authentication, adds the
//! health route and request tracing, and runs until shutdown.

#![allow(clippy::must_use_candidate)]

mod auth;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use switchyard_cache::{ResponseCache, spawn_stats_logger};
use switchyard_config::Config;
use switchyard_llm::Gateway;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use auth::KeyStore;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    gateway: Gateway,
    stats_interval: Duration,
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the health path is not an absolute path
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let gateway = Gateway::from_config(config);
        let keys = KeyStore::from_config(&config.virtual_keys);

        let mut app = switchyard_llm::llm_router(gateway.clone()).layer(axum::middleware::from_fn(move |req, next| {
            let keys = keys.clone();
            async move { auth::virtual_key_middleware(keys, req, next).await }
        }));

        // Added after the auth layer so probes need no key
        let health = &config.server.health;
        if health.enabled {
            if !health.path.starts_with('/') {
                anyhow::bail!("server.health.path must start with '/', got '{}'", health.path);
            }
            app = app.route(
                &health.path,
                axum::routing::get(health::health_handler).with_state(gateway.clone()),
            );
        }

        app = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            listen_address,
            gateway,
            stats_interval: config.cache.stats_interval,
        })
    }

    /// Get the configured listen address
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Shared response cache, for statistics reporting
    pub fn cache(&self) -> Arc<ResponseCache> {
        Arc::clone(self.gateway.cache())
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        let stats = spawn_stats_logger(self.cache(), self.stats_interval, shutdown.child_token());

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        stats.await?;
        Ok(())
    }
}
