//! Crypto envelope — RSA-2048 key pairs, hybrid encrypt/decrypt, PSS signatures.
//!
//! `encrypt` picks direct RSA-OAEP for payloads at or under the OAEP-SHA256
//! ceiling for a 2048-bit modulus (190 bytes) and falls back to AES-256-CFB
//! under an RSA-wrapped session key otherwise. Both paths are opaque JSON
//! envelopes tagged by `method` so `decrypt` can dispatch without extra
//! bookkeeping.

use aes::Aes256;
use aes::cipher::{KeyIvInit, StreamCipher};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use rsa::Oaep;
use rsa::Pss;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ChatError;

pub const RSA_BITS: usize = 2048;
pub const RSA_PUBLIC_EXPONENT: u64 = 65537;
/// OAEP-SHA256 plaintext ceiling for a 2048-bit modulus: k - 2*hLen - 2.
pub const DIRECT_THRESHOLD: usize = 190;
pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;
const SHA256_LEN: usize = 32;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "lowercase")]
enum WireEnvelope {
    Rsa {
        data: String,
    },
    Hybrid {
        encrypted_key: String,
        iv: String,
        data: String,
    },
}

/// Generate a fresh RSA-2048 key pair (e=65537, the `rsa` crate default).
pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey), ChatError> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
        .map_err(|e| ChatError::CryptoFailure(format!("rsa keygen failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<String, ChatError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|doc| doc.to_string())
        .map_err(|e| ChatError::CryptoFailure(format!("pkcs8 encode failed: {e}")))
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, ChatError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| ChatError::CryptoFailure(format!("spki encode failed: {e}")))
}

/// Minimally validate that a PEM blob parses as an SPKI public key.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, ChatError> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| ChatError::CryptoFailure(format!("invalid public key pem: {e}")))
}

pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey, ChatError> {
    RsaPrivateKey::from_pkcs8_pem(pem.trim())
        .map_err(|e| ChatError::CryptoFailure(format!("invalid private key pem: {e}")))
}

/// Encrypt `message` to `recipient_public_pem`, choosing direct OAEP or the
/// hybrid AES envelope by payload length. Returns the JSON envelope text.
pub fn encrypt(message: &[u8], recipient_public_pem: &str) -> Result<String, ChatError> {
    let public_key = parse_public_key_pem(recipient_public_pem)?;
    let mut rng = rand::thread_rng();

    let envelope = if message.len() <= DIRECT_THRESHOLD {
        let ciphertext = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), message)
            .map_err(|e| ChatError::CryptoFailure(format!("oaep encrypt failed: {e}")))?;
        WireEnvelope::Rsa {
            data: B64.encode(ciphertext),
        }
    } else {
        let mut aes_key = [0u8; AES_KEY_LEN];
        let mut iv = [0u8; AES_IV_LEN];
        rng.fill_bytes(&mut aes_key);
        rng.fill_bytes(&mut iv);

        let mut buf = message.to_vec();
        let mut cipher = Aes256CfbEnc::new_from_slices(&aes_key, &iv)
            .map_err(|e| ChatError::CryptoFailure(format!("bad aes key/iv: {e}")))?;
        cipher.apply_keystream(&mut buf);

        let wrapped_key = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &aes_key)
            .map_err(|e| ChatError::CryptoFailure(format!("oaep wrap failed: {e}")))?;

        WireEnvelope::Hybrid {
            encrypted_key: B64.encode(wrapped_key),
            iv: B64.encode(iv),
            data: B64.encode(buf),
        }
    };

    serde_json::to_string(&envelope).map_err(|e| ChatError::CryptoFailure(e.to_string()))
}

/// Decrypt a JSON envelope, dispatching on `method`. Returns the UTF-8
/// plaintext on either path.
pub fn decrypt(envelope_json: &str, private_pem: &str) -> Result<String, ChatError> {
    let private_key = parse_private_key_pem(private_pem)?;
    let envelope: WireEnvelope = serde_json::from_str(envelope_json)
        .map_err(|e| ChatError::DecodeError(format!("bad envelope: {e}")))?;

    let plaintext = match envelope {
        WireEnvelope::Rsa { data } => {
            let ciphertext = B64
                .decode(data)
                .map_err(|e| ChatError::DecodeError(format!("bad base64: {e}")))?;
            private_key
                .decrypt(Oaep::new::<Sha256>(), &ciphertext)
                .map_err(|e| ChatError::CryptoFailure(format!("oaep decrypt failed: {e}")))?
        }
        WireEnvelope::Hybrid {
            encrypted_key,
            iv,
            data,
        } => {
            let wrapped_key = B64
                .decode(encrypted_key)
                .map_err(|e| ChatError::DecodeError(format!("bad base64: {e}")))?;
            let iv = B64
                .decode(iv)
                .map_err(|e| ChatError::DecodeError(format!("bad base64: {e}")))?;
            let mut buf = B64
                .decode(data)
                .map_err(|e| ChatError::DecodeError(format!("bad base64: {e}")))?;

            let aes_key = private_key
                .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
                .map_err(|e| ChatError::CryptoFailure(format!("oaep unwrap failed: {e}")))?;
            let mut cipher = Aes256CfbDec::new_from_slices(&aes_key, &iv)
                .map_err(|e| ChatError::CryptoFailure(format!("bad aes key/iv: {e}")))?;
            cipher.apply_keystream(&mut buf);
            buf
        }
    };

    String::from_utf8(plaintext)
        .map_err(|e| ChatError::CryptoFailure(format!("non-utf8 plaintext: {e}")))
}

/// Maximum PSS salt length for a key of `modulus_bytes` under SHA-256.
fn max_pss_salt_len(modulus_bytes: usize) -> usize {
    modulus_bytes - SHA256_LEN - 2
}

/// RSA-PSS signature over `message` (MGF1-SHA-256, maximum salt length).
pub fn sign(message: &[u8], private_pem: &str) -> Result<Vec<u8>, ChatError> {
    let private_key = parse_private_key_pem(private_pem)?;
    let mut rng = rand::thread_rng();
    let digest = Sha256::digest(message);
    let pss = Pss::new_with_salt::<Sha256>(max_pss_salt_len(private_key.size()));
    private_key
        .sign_with_rng(&mut rng, pss, &digest)
        .map_err(|e| ChatError::CryptoFailure(format!("pss sign failed: {e}")))
}

/// Verify an RSA-PSS signature produced by `sign`.
pub fn verify(message: &[u8], signature: &[u8], public_pem: &str) -> Result<bool, ChatError> {
    let public_key = parse_public_key_pem(public_pem)?;
    let digest = Sha256::digest(message);
    let pss = Pss::new_with_salt::<Sha256>(max_pss_salt_len(public_key.size()));
    Ok(public_key.verify(pss, &digest, signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair_pems() -> (String, String) {
        let (private_key, public_key) = generate_keypair().unwrap();
        (
            private_key_to_pem(&private_key).unwrap(),
            public_key_to_pem(&public_key).unwrap(),
        )
    }

    #[test]
    fn direct_rsa_round_trips_short_payload() {
        let (priv_pem, pub_pem) = keypair_pems();
        let msg = b"hello bob";
        let envelope = encrypt(msg, &pub_pem).unwrap();
        assert!(envelope.contains("\"method\":\"rsa\""));
        let out = decrypt(&envelope, &priv_pem).unwrap();
        assert_eq!(out.as_bytes(), msg);
    }

    #[test]
    fn hybrid_round_trips_long_payload() {
        let (priv_pem, pub_pem) = keypair_pems();
        let msg = vec![b'x'; 500];
        let envelope = encrypt(&msg, &pub_pem).unwrap();
        assert!(envelope.contains("\"method\":\"hybrid\""));

        let parsed: WireEnvelope = serde_json::from_str(&envelope).unwrap();
        match parsed {
            WireEnvelope::Hybrid { encrypted_key, .. } => {
                let key_bytes = B64.decode(encrypted_key).unwrap();
                assert_eq!(key_bytes.len(), 256); // RSA-2048 ciphertext length
            }
            _ => panic!("expected hybrid envelope"),
        }

        let out = decrypt(&envelope, &priv_pem).unwrap();
        assert_eq!(out.as_bytes(), msg.as_slice());
    }

    #[test]
    fn threshold_boundary_picks_rsa_method() {
        let (_priv_pem, pub_pem) = keypair_pems();
        let msg = vec![b'a'; DIRECT_THRESHOLD];
        let envelope = encrypt(&msg, &pub_pem).unwrap();
        assert!(envelope.contains("\"method\":\"rsa\""));
    }

    #[test]
    fn threshold_boundary_plus_one_picks_hybrid() {
        let (_priv_pem, pub_pem) = keypair_pems();
        let msg = vec![b'a'; DIRECT_THRESHOLD + 1];
        let envelope = encrypt(&msg, &pub_pem).unwrap();
        assert!(envelope.contains("\"method\":\"hybrid\""));
    }

    #[test]
    fn decrypt_rejects_unknown_method() {
        let (priv_pem, _pub_pem) = keypair_pems();
        let bad = r#"{"method":"plaintext","data":"aGVsbG8="}"#;
        assert!(decrypt(bad, &priv_pem).is_err());
    }

    #[test]
    fn decrypt_rejects_malformed_base64() {
        let (priv_pem, _pub_pem) = keypair_pems();
        let bad = r#"{"method":"rsa","data":"not-base64!!"}"#;
        assert!(decrypt(bad, &priv_pem).is_err());
    }

    #[test]
    fn signature_round_trips() {
        let (priv_pem, pub_pem) = keypair_pems();
        let msg = b"message integrity extension";
        let sig = sign(msg, &priv_pem).unwrap();
        assert!(verify(msg, &sig, &pub_pem).unwrap());
    }

    #[test]
    fn signature_rejects_tampered_message() {
        let (priv_pem, pub_pem) = keypair_pems();
        let sig = sign(b"original", &priv_pem).unwrap();
        assert!(!verify(b"tampered", &sig, &pub_pem).unwrap());
    }
}
