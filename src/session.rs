//! Session registry & router — the table of live authenticated sessions and
//! the post-auth command dispatcher.
//!
//! The registry is a `username -> session handle` map guarded by a single
//! mutex (no operation holds it across an I/O wait — handles are cloned out
//! and the lock released before any socket write). Single-session-per-user
//! is enforced on insert; cleanup on any exit path removes an entry only if
//! it still points at the caller's own handle, guarding against a reconnect
//! race after a delayed cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::warn;

use crate::codec::{self, Code};
use crate::error::ChatError;
use crate::parser::{self, Verb};
use crate::store::UserStore;

/// A live session's outbound half. Cloneable — the `Arc<Mutex<_>>` guards
/// per-frame atomicity (one `write_all` plus one `flush`) when two senders
/// address the same recipient concurrently.
#[derive(Clone)]
pub struct SessionHandle {
    conn_id: u64,
    writer: Arc<Mutex<Box<dyn AsyncWrite + Unpin + Send>>>,
}

impl SessionHandle {
    pub fn new(conn_id: u64, writer: Box<dyn AsyncWrite + Unpin + Send>) -> Self {
        Self {
            conn_id,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send(&self, code: Code, msg: &str) -> Result<(), ChatError> {
        let mut writer = self.writer.lock().await;
        codec::write_frame(&mut *writer, code, msg).await
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert iff no session is already registered for `username`. Returns
    /// `false` (and leaves the existing entry untouched) on conflict.
    pub async fn try_insert(&self, username: &str, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(username) {
            return false;
        }
        sessions.insert(username.to_string(), handle);
        true
    }

    /// Remove `username`'s entry only if it still points at `conn_id`.
    pub async fn remove_if_mine(&self, username: &str, conn_id: u64) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(username).is_some_and(|h| h.conn_id == conn_id) {
            sessions.remove(username);
        }
    }

    pub async fn get(&self, username: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(username).cloned()
    }

    pub async fn usernames(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

pub const HELP_TEXT: &str =
    "Commands: GETUSERS, HELP, EXIT, PUBKEY <pem>, GETKEY <user>, SEND <payload> TO <user>";

pub enum RouterOutcome {
    Continue,
    Exit,
}

/// Dispatch one post-auth command line for `username`. `reply` is this
/// connection's own handle (for echoes); `registry`/`store` are shared.
pub async fn handle_command(
    registry: &SessionRegistry,
    store: &UserStore,
    username: &str,
    conn_id: u64,
    line: &str,
    reply: &SessionHandle,
) -> RouterOutcome {
    let tokens = match parser::parse(line) {
        Ok(tokens) => tokens,
        Err(e) => {
            let _ = reply.send(Code::ERROR, &e.to_string()).await;
            return RouterOutcome::Continue;
        }
    };

    if tokens.is_empty() {
        let _ = reply.send(Code::ERROR, "empty command").await;
        return RouterOutcome::Continue;
    }

    match parser::recognize_verb(&tokens[0]) {
        Some(Verb::Exit) => {
            registry.remove_if_mine(username, conn_id).await;
            let _ = reply.send(Code::EXIT, "goodbye").await;
            RouterOutcome::Exit
        }
        Some(Verb::GetUsers) => {
            let users = registry.usernames().await.join(", ");
            let _ = reply.send(Code::SUCCESS, &users).await;
            RouterOutcome::Continue
        }
        Some(Verb::Help) => {
            let _ = reply.send(Code::SUCCESS, HELP_TEXT).await;
            RouterOutcome::Continue
        }
        Some(Verb::PubKey) => {
            match tokens.get(1) {
                Some(pem) => match store.store_public_key(username, pem).await {
                    Ok(()) => {
                        let _ = reply.send(Code::SUCCESS, "public key updated").await;
                    }
                    Err(_) => {
                        let _ = reply.send(Code::ERROR, "unknown user").await;
                    }
                },
                None => {
                    let _ = reply
                        .send(Code::ERROR, "PUBKEY requires a PEM argument")
                        .await;
                }
            }
            RouterOutcome::Continue
        }
        Some(Verb::GetKey) => {
            match tokens.get(1) {
                Some(target) => match store.get_public_key(target).await {
                    Some(pem) => {
                        let _ = reply
                            .send(Code::SUCCESS, &format!("KEY {target} {pem}"))
                            .await;
                    }
                    None => {
                        let _ = reply.send(Code::ERROR, "no such user").await;
                    }
                },
                None => {
                    let _ = reply.send(Code::ERROR, "GETKEY requires a username").await;
                }
            }
            RouterOutcome::Continue
        }
        Some(Verb::Send) => {
            let recipient_ok =
                tokens.len() >= 4 && parser::recognize_verb(&tokens[2]) == Some(Verb::To);
            if !recipient_ok {
                let _ = reply
                    .send(Code::ERROR, "usage: SEND <payload> TO <user>")
                    .await;
                return RouterOutcome::Continue;
            }
            let payload = &tokens[1];
            let recipient = &tokens[3];
            match registry.get(recipient).await {
                Some(target) => {
                    let framed = format!("[{}] {username}: {payload}", now_secs());
                    if target.send(Code::SUCCESS, &framed).await.is_err() {
                        warn!(conn_id, recipient, "dead peer, dropping from registry");
                        registry.remove_if_mine(recipient, target.conn_id()).await;
                    }
                    let _ = reply
                        .send(Code::SUCCESS, &format!("Message sent to {recipient}"))
                        .await;
                }
                None => {
                    let _ = reply.send(Code::ERROR, "no such user").await;
                }
            }
            RouterOutcome::Continue
        }
        Some(Verb::To) | None => {
            let _ = reply.send(Code::ERROR, "unrecognized command").await;
            RouterOutcome::Continue
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn handle(conn_id: u64) -> (SessionHandle, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        (SessionHandle::new(conn_id, Box::new(server)), client)
    }

    fn fresh_store() -> UserStore {
        UserStore::new(None)
    }

    #[tokio::test]
    async fn insert_then_conflict_then_cleanup() {
        let registry = SessionRegistry::new();
        let (h1, _r1) = handle(1);
        assert!(registry.try_insert("alice", h1).await);

        let (h2, _r2) = handle(2);
        assert!(!registry.try_insert("alice", h2).await);
        assert_eq!(registry.len().await, 1);

        // cleanup from the wrong connection id is a no-op
        registry.remove_if_mine("alice", 2).await;
        assert_eq!(registry.len().await, 1);

        registry.remove_if_mine("alice", 1).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn getusers_lists_live_sessions() {
        let registry = SessionRegistry::new();
        let (h1, _r1) = handle(1);
        registry.try_insert("alice", h1).await;
        let (reply, mut reply_r) = handle(1);

        handle_command(&registry, &fresh_store(), "alice", 1, "GETUSERS", &reply).await;
        let mut buf = [0u8; 256];
        let n = reply_r.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("alice"));
    }

    #[tokio::test]
    async fn send_routes_to_recipient_and_echoes_sender() {
        let registry = SessionRegistry::new();
        let (bob_handle, mut bob_reader) = handle(2);
        registry.try_insert("bob", bob_handle).await;

        let (alice_handle, mut alice_reader) = handle(1);
        let outcome = handle_command(
            &registry,
            &fresh_store(),
            "alice",
            1,
            r#"SEND {"method":"rsa","data":"abc"} TO bob"#,
            &alice_handle,
        )
        .await;
        assert!(matches!(outcome, RouterOutcome::Continue));

        let mut buf = [0u8; 512];
        let n = bob_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("alice:"));
        assert!(text.contains("\"method\":\"rsa\""));

        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("Message sent to bob"));
    }

    #[tokio::test]
    async fn send_to_unknown_user_is_error() {
        let registry = SessionRegistry::new();
        let (alice_handle, mut alice_reader) = handle(1);
        handle_command(
            &registry,
            &fresh_store(),
            "alice",
            1,
            "SEND {} TO ghost",
            &alice_handle,
        )
        .await;
        let mut buf = [0u8; 256];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"ERROR\""));
    }

    #[tokio::test]
    async fn bare_to_is_rejected() {
        let registry = SessionRegistry::new();
        let (alice_handle, mut alice_reader) = handle(1);
        handle_command(&registry, &fresh_store(), "alice", 1, "TO", &alice_handle).await;
        let mut buf = [0u8; 256];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"ERROR\""));
    }

    #[tokio::test]
    async fn dead_peer_is_removed_from_registry_on_send_failure() {
        let registry = SessionRegistry::new();
        let (bob_handle, bob_reader) = handle(2);
        registry.try_insert("bob", bob_handle).await;
        // Drop the recipient's read half so writes to it fail.
        drop(bob_reader);

        let (alice_handle, mut alice_reader) = handle(1);
        handle_command(
            &registry,
            &fresh_store(),
            "alice",
            1,
            "SEND {} TO bob",
            &alice_handle,
        )
        .await;

        // The sender still gets its echo...
        let mut buf = [0u8; 256];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("Message sent to bob"));

        // ...but bob's stale entry, registered under its own conn_id (2), is
        // actually gone — not left behind because the sender's conn_id (1)
        // was compared against it.
        assert_eq!(registry.len().await, 0);
        assert!(registry.get("bob").await.is_none());
    }

    #[tokio::test]
    async fn pubkey_upserts_store() {
        let registry = SessionRegistry::new();
        let store = fresh_store();
        store
            .create_user("alice", "hash", "salt", "old-key")
            .await
            .unwrap();
        let (alice_handle, mut alice_reader) = handle(1);

        handle_command(
            &registry,
            &store,
            "alice",
            1,
            "PUBKEY new-key",
            &alice_handle,
        )
        .await;

        assert_eq!(store.get_public_key("alice").await.unwrap(), "new-key");
        let mut buf = [0u8; 256];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"SUCCESS\""));
    }

    #[tokio::test]
    async fn pubkey_unknown_user_is_error() {
        let registry = SessionRegistry::new();
        let store = fresh_store();
        let (alice_handle, mut alice_reader) = handle(1);

        handle_command(
            &registry,
            &store,
            "ghost",
            1,
            "PUBKEY new-key",
            &alice_handle,
        )
        .await;

        let mut buf = [0u8; 256];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"ERROR\""));
    }

    #[tokio::test]
    async fn getkey_hit_and_miss() {
        let registry = SessionRegistry::new();
        let store = fresh_store();
        store
            .create_user("bob", "hash", "salt", "bob-pem")
            .await
            .unwrap();
        let (alice_handle, mut alice_reader) = handle(1);

        handle_command(&registry, &store, "alice", 1, "GETKEY bob", &alice_handle).await;
        let mut buf = [0u8; 256];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"SUCCESS\""));
        assert!(text.contains("KEY bob bob-pem"));

        handle_command(
            &registry,
            &store,
            "alice",
            1,
            "GETKEY ghost",
            &alice_handle,
        )
        .await;
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"ERROR\""));
    }

    #[tokio::test]
    async fn exit_removes_session_and_signals_stop() {
        let registry = SessionRegistry::new();
        let (alice_handle, mut alice_reader) = handle(1);
        registry.try_insert("alice", alice_handle.clone()).await;

        let outcome =
            handle_command(&registry, &fresh_store(), "alice", 1, "EXIT", &alice_handle).await;
        assert!(matches!(outcome, RouterOutcome::Exit));
        assert_eq!(registry.len().await, 0);

        let mut buf = [0u8; 128];
        let n = alice_reader.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("\"EXIT\""));
    }
}
