//! Per-connection supervisor
//!
//! Drives one TCP connection through: Authenticator → session registration →
//! command loop. An idle read timeout is recoverable — it replies `ERROR`
//! and re-arms rather than closing the connection. Every other exit path —
//! EXIT, short read, peer disconnect, duplicate-session rejection, or a
//! server shutdown signal on the `watch` channel — removes the connection's
//! own registry entry and drops the socket; none of them fall through
//! without cleanup.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthOutcome};
use crate::codec::{self, Code};
use crate::config::Config;
use crate::session::{self, RouterOutcome, SessionHandle, SessionRegistry};
use crate::store::UserStore;

/// Handle a single client connection through its full lifecycle.
pub async fn handle_connection(
    mut stream: TcpStream,
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    store: Arc<UserStore>,
    conn_id: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    debug!(conn_id, peer, "new connection");

    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

    let username = match auth::run(
        &mut stream,
        &store,
        config.attempt_limit,
        config.buffer_size,
        idle_timeout,
    )
    .await
    {
        Ok(AuthOutcome::Authenticated { username }) => username,
        Ok(AuthOutcome::Closed) => return,
        Err(e) => {
            debug!(conn_id, error = %e, "connection ended during authentication");
            return;
        }
    };

    let (mut reader, writer) = tokio::io::split(stream);
    let handle = SessionHandle::new(conn_id, Box::new(writer));

    if !registry.try_insert(&username, handle.clone()).await {
        warn!(conn_id, username, "duplicate session rejected");
        let _ = handle
            .send(Code::NO_WRITE_BACK, "already logged in elsewhere")
            .await;
        return;
    }

    info!(conn_id, username, "session established");

    loop {
        tokio::select! {
            result = tokio::time::timeout(
                idle_timeout,
                codec::read_command(&mut reader, config.buffer_size),
            ) => {
                let line = match result {
                    Ok(Ok(line)) => line,
                    Ok(Err(e)) => {
                        debug!(conn_id, username, error = %e, "connection ended");
                        break;
                    }
                    Err(_) => {
                        debug!(conn_id, username, "idle timeout");
                        let _ = handle.send(Code::ERROR, "idle timeout").await;
                        continue;
                    }
                };

                match session::handle_command(&registry, &store, &username, conn_id, &line, &handle).await
                {
                    RouterOutcome::Continue => continue,
                    RouterOutcome::Exit => break,
                }
            }
            _ = shutdown.changed() => {
                debug!(conn_id, username, "server shutting down");
                let _ = handle.send(Code::EXIT, "server shutting down").await;
                break;
            }
        }
    }

    registry.remove_if_mine(&username, conn_id).await;
    debug!(conn_id, username, "session closed");
}
