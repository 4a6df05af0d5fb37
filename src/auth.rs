//! Authenticator — registration and login state machines sharing a
//! three-attempt counter.
//!
//! Each prompt is sent as `WRITE_BACK`; each rejection as `NO_WRITE_BACK`;
//! success as `AUTH`; fatal failure closes with `EXIT`. The challenge is
//! encrypted to the user's public key so only the private-key holder can
//! learn it; the response mixes that plaintext with the password hash so
//! the private key alone isn't enough. The salt is disclosed only after the
//! challenge is accepted, binding the salt request to the active attempt.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{self, Code};
use crate::crypto;
use crate::error::ChatError;
use crate::kdf;
use crate::store::UserStore;

pub enum AuthOutcome {
    Authenticated { username: String },
    /// The authenticator already sent its terminal frame(s); the connection
    /// should close without entering the router.
    Closed,
}

/// Drive mode selection, then registration or login, to completion.
pub async fn run<S>(
    stream: &mut S,
    store: &UserStore,
    attempt_limit: u32,
    buffer_size: usize,
    idle_timeout: Duration,
) -> Result<AuthOutcome, ChatError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    codec::write_frame(stream, Code::WRITE_BACK, "Mode? (1=login, 2=register)").await?;
    let mode = read_prompt(stream, buffer_size, idle_timeout).await?;

    if mode == "2" {
        register(stream, store, buffer_size, idle_timeout, attempt_limit).await
    } else {
        login(stream, store, attempt_limit, buffer_size, idle_timeout).await
    }
}

async fn register<S>(
    stream: &mut S,
    store: &UserStore,
    buffer_size: usize,
    idle_timeout: Duration,
    attempt_limit: u32,
) -> Result<AuthOutcome, ChatError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    codec::write_frame(stream, Code::WRITE_BACK, "Username?").await?;
    let username = read_prompt(stream, buffer_size, idle_timeout).await?;

    // Username collision fails the authenticator outright — registration is
    // not retried here, and no attempt is consumed.
    if store.user_exists(&username).await {
        codec::write_frame(stream, Code::NO_WRITE_BACK, "username already exists").await?;
        return Ok(AuthOutcome::Closed);
    }

    codec::write_frame(stream, Code::WRITE_BACK, "Password?").await?;
    let password = read_prompt(stream, buffer_size, idle_timeout).await?;

    let salt = kdf::generate_salt();
    let hash = kdf::hash_password(&password, &salt)?;

    codec::write_frame(stream, Code::WRITE_BACK, "Public key (PEM)?").await?;
    let pem = read_prompt(stream, buffer_size, idle_timeout).await?;
    // Minimal validation: it must parse as an SPKI public key.
    crypto::parse_public_key_pem(&pem)?;

    store
        .create_user(&username, &hex::encode(hash), &hex::encode(salt), &pem)
        .await
        .map_err(|_| ChatError::Duplicate)?;

    codec::write_frame(
        stream,
        Code::NO_WRITE_BACK,
        "registration complete, please log in",
    )
    .await?;

    login(stream, store, attempt_limit, buffer_size, idle_timeout).await
}

async fn login<S>(
    stream: &mut S,
    store: &UserStore,
    attempt_limit: u32,
    buffer_size: usize,
    idle_timeout: Duration,
) -> Result<AuthOutcome, ChatError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut attempts = 0u32;

    loop {
        codec::write_frame(stream, Code::WRITE_BACK, "Username?").await?;
        let username = match read_prompt(stream, buffer_size, idle_timeout).await {
            Ok(u) => u,
            Err(ChatError::Timeout) => {
                if bump(&mut attempts, attempt_limit) {
                    return fail_auth(stream).await;
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        let Some(record) = store.get_user_data(&username).await else {
            codec::write_frame(stream, Code::NO_WRITE_BACK, "no such user").await?;
            if bump(&mut attempts, attempt_limit) {
                return fail_auth(stream).await;
            }
            continue;
        };

        if record.public_key.trim().is_empty() {
            codec::write_frame(stream, Code::NO_WRITE_BACK, "register again").await?;
            if bump(&mut attempts, attempt_limit) {
                return fail_auth(stream).await;
            }
            continue;
        }

        let mut challenge = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut challenge);
        let challenge_b64 = B64.encode(challenge);
        store.store_challenge(&username, &challenge_b64).await;

        let envelope = crypto::encrypt(challenge_b64.as_bytes(), &record.public_key)?;
        codec::write_frame(stream, Code::WRITE_BACK, &format!("CHALLENGE {envelope}")).await?;

        let request = match read_prompt(stream, buffer_size, idle_timeout).await {
            Ok(r) => r,
            Err(ChatError::Timeout) => {
                if bump(&mut attempts, attempt_limit) {
                    return fail_auth(stream).await;
                }
                continue;
            }
            Err(e) => return Err(e),
        };
        if request != "GET_SALT" {
            codec::write_frame(stream, Code::NO_WRITE_BACK, "expected GET_SALT").await?;
            if bump(&mut attempts, attempt_limit) {
                return fail_auth(stream).await;
            }
            continue;
        }

        codec::write_frame(stream, Code::SALT, &record.salt).await?;

        let response = match read_prompt(stream, buffer_size, idle_timeout).await {
            Ok(r) => r,
            Err(ChatError::Timeout) => {
                if bump(&mut attempts, attempt_limit) {
                    return fail_auth(stream).await;
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        store.take_challenge(&username).await;

        let hash_bytes = hex::decode(&record.password_hash)
            .map_err(|e| ChatError::CryptoFailure(format!("corrupt stored hash: {e}")))?;
        let mut preimage = hash_bytes;
        preimage.extend_from_slice(&challenge);
        let expected = hex::encode(Sha256::digest(&preimage));

        let accepted: bool = response.as_bytes().ct_eq(expected.as_bytes()).into();
        if accepted {
            codec::write_frame(
                stream,
                Code::AUTH,
                &format!("Hello {username}, the time is {}", now_rfc3339()),
            )
            .await?;
            return Ok(AuthOutcome::Authenticated { username });
        }

        codec::write_frame(stream, Code::NO_WRITE_BACK, "authentication failed").await?;
        if bump(&mut attempts, attempt_limit) {
            return fail_auth(stream).await;
        }
    }
}

fn bump(attempts: &mut u32, limit: u32) -> bool {
    *attempts += 1;
    *attempts >= limit
}

async fn fail_auth<S>(stream: &mut S) -> Result<AuthOutcome, ChatError>
where
    S: AsyncWrite + Unpin,
{
    codec::write_frame(stream, Code::NO_WRITE_BACK, "3 Failed Attempts").await?;
    codec::write_frame(stream, Code::EXIT, "goodbye").await?;
    Ok(AuthOutcome::Closed)
}

async fn read_prompt<S>(
    stream: &mut S,
    buffer_size: usize,
    idle_timeout: Duration,
) -> Result<String, ChatError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(idle_timeout, codec::read_command(stream, buffer_size))
        .await
        .map_err(|_| ChatError::Timeout)?
}

/// Informational only — not a security token.
fn now_rfc3339() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}s since epoch")
}
