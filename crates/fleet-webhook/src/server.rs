//! Webhook listener lifecycle.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{WebhookState, build_router};

/// How long `shutdown` waits for in-flight requests.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running webhook listener.
pub struct WebhookServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WebhookServer {
    /// Bind `addr` and start serving in a background task.
    ///
    /// Binding errors are returned to the caller; the controller treats
    /// them as fatal at startup.
    pub async fn start(addr: SocketAddr, state: WebhookState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let router = build_router(state);

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "webhook server error");
            }
        });

        info!(%addr, "webhook listener started");
        Ok(Self {
            addr,
            shutdown_tx,
            handle,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let mut handle = self.handle;
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!(addr = %self.addr, "webhook listener stopped"),
            Ok(Err(e)) => error!(error = %e, "webhook server task failed"),
            Err(_) => {
                warn!("webhook listener did not drain in time, aborting");
                handle.abort();
            }
        }
    }
}
