//! Password KDF — memory-hard hashing, salt generation, constant-time verify.
//!
//! Parameters are fixed for the protocol version (`N=16384, r=8, p=1,
//! dkLen=32`) rather than stored per-record; a future version field is a
//! recommended extension (see DESIGN.md).

use rand::RngCore;
use scrypt::Params;
use subtle::ConstantTimeEq;

use crate::error::ChatError;

pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;

const LOG_N: u8 = 14; // N = 2^14 = 16384
const R: u32 = 8;
const P: u32 = 1;

/// 16 bytes of cryptographic randomness.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the 32-byte password hash via scrypt(N=16384, r=8, p=1).
pub fn hash_password(password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN], ChatError> {
    let params = Params::new(LOG_N, R, P, HASH_LEN)
        .map_err(|e| ChatError::CryptoFailure(format!("bad scrypt params: {e}")))?;
    let mut out = [0u8; HASH_LEN];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut out)
        .map_err(|e| ChatError::CryptoFailure(format!("scrypt failed: {e}")))?;
    Ok(out)
}

/// Recompute the candidate's hash and compare to the stored one in constant
/// time.
pub fn verify_password(stored_hash: &[u8], candidate: &str, salt: &[u8]) -> Result<bool, ChatError> {
    let computed = hash_password(candidate, salt)?;
    Ok(computed.ct_eq(stored_hash).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salts_are_distinct() {
        let a = generate_salt();
        let b = generate_salt();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_password_is_deterministic() {
        let salt = generate_salt();
        let h1 = hash_password("hunter2", &salt).unwrap();
        let h2 = hash_password("hunter2", &salt).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn distinct_salts_yield_distinct_hashes() {
        let h1 = hash_password("hunter2", &generate_salt()).unwrap();
        let h2 = hash_password("hunter2", &generate_salt()).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn hash_is_not_the_password() {
        let salt = generate_salt();
        let h = hash_password("hunter2", &salt).unwrap();
        assert_ne!(h.as_slice(), "hunter2".as_bytes());
    }

    #[test]
    fn verify_accepts_correct_password() {
        let salt = generate_salt();
        let h = hash_password("correct horse", &salt).unwrap();
        assert!(verify_password(&h, "correct horse", &salt).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let salt = generate_salt();
        let h = hash_password("correct horse", &salt).unwrap();
        assert!(!verify_password(&h, "battery staple", &salt).unwrap());
    }
}
