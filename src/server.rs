//! TCP Listener — accepts connections and spawns per-connection tasks.
//!
//! A Ctrl-C closes the listener and broadcasts shutdown to every connection
//! task over a `watch` channel; each task cooperatively finishes its current
//! command, runs its own registry-cleanup/writer-close path, and exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::connection;
use crate::session::SessionRegistry;
use crate::store::UserStore;

static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Start the chat relay server.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, "vaultwire listening");

    let config = Arc::new(config);
    let registry = Arc::new(SessionRegistry::new());
    let store = Arc::new(UserStore::new(config.store_path.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, _) = accepted?;
                let config = Arc::clone(&config);
                let registry = Arc::clone(&registry);
                let store = Arc::clone(&store);
                let shutdown_rx = shutdown_rx.clone();
                let conn_id = CONN_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;

                tokio::spawn(async move {
                    connection::handle_connection(socket, config, registry, store, conn_id, shutdown_rx).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, closing listener");
                let _ = shutdown_tx.send(true);
                return Ok(());
            }
        }
    }
}
