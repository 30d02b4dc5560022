//! API Server
//!
//! Binds the listener and serves the REST router until shutdown.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::{CachingHandler, Handler};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// API Server
// =============================================================================

/// HTTP server in front of a caching handler
pub struct ApiServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<CachingHandler<H>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<H: Handler> ApiServer<H> {
    pub fn new(handler: Arc<CachingHandler<H>>) -> Self {
        let config = handler.service().config().server.clone();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.config.listen_addr
    }

    /// Run until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server");
        info!("  Listen: {}", self.config.listen_addr);
        info!("  Management: {}", self.config.management_prefix);

        let handle = self.spawn_server();
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("API server task failed: {:?}", e);
                Err(Error::Internal(format!("API server task failed: {}", e)))
            }
        }
    }

    fn spawn_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.listen_addr;
        let handler = self.handler.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_server(addr, handler, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn run_server<H: Handler>(
    addr: SocketAddr,
    handler: Arc<CachingHandler<H>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = RestRouter::new(handler)
        .build()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind API server on {}: {}", addr, e)))?;

    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("API server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("API server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheLayerConfig;
    use crate::handler::{handler_fn, with_caching};
    use crate::service::CacheService;
    use axum::http::{Request, Response};
    use bytes::Bytes;
    use std::convert::Infallible;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let mut config = CacheLayerConfig::default();
        config.server.listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let service = CacheService::builder().config(config).build().await.unwrap();
        let origin = handler_fn(|_req: Request<Bytes>| async { Ok::<_, Infallible>(Response::new(Bytes::new())) });
        let server = Arc::new(ApiServer::new(Arc::new(with_caching(origin, service))));
        assert_eq!(server.listen_addr().port(), 0);

        let running = server.clone();
        let task = tokio::spawn(async move { running.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
