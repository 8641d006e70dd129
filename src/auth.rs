//! Password hashing and signed bearer tokens.
//!
//! Passwords are stored as `pbkdf2-sha256$<rounds>$<salt hex>$<hash hex>`.
//! Async callers use the `_blocking` variants, which run the key derivation
//! on tokio's blocking pool.
//!
//! Access tokens are `<payload>.<mac>` where `payload` is the base64url
//! (unpadded) JSON `{"sub": <user id>, "exp": <unix seconds>}` and `mac` is
//! the hex HMAC-SHA256 of the payload string under `auth.token_secret`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const PBKDF2_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash = derive(password, &salt, PBKDF2_ROUNDS);
    format!(
        "{}${}${}${}",
        HASH_SCHEME,
        PBKDF2_ROUNDS,
        hex::encode(salt),
        hex::encode(hash)
    )
}

/// Checks `password` against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match parse_hash(stored) {
        Ok((rounds, salt, expected)) => {
            let actual = derive(password, &salt, rounds);
            actual.as_slice().ct_eq(expected.as_slice()).into()
        }
        Err(_) => false,
    }
}

/// [`hash_password`] on tokio's blocking pool.
pub async fn hash_password_blocking(password: &str) -> Result<String, tokio::task::JoinError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password)).await
}

/// [`verify_password`] on tokio's blocking pool.
pub async fn verify_password_blocking(
    password: &str,
    stored: &str,
) -> Result<bool, tokio::task::JoinError> {
    let password = password.to_string();
    let stored = stored.to_string();
    tokio::task::spawn_blocking(move || verify_password(&password, &stored)).await
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

fn parse_hash(stored: &str) -> Result<(u32, Vec<u8>, Vec<u8>), AuthError> {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(rounds), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(AuthError::BadHash);
    };
    if scheme != HASH_SCHEME {
        return Err(AuthError::BadHash);
    }
    let rounds: u32 = rounds.parse().map_err(|_| AuthError::BadHash)?;
    if rounds == 0 {
        return Err(AuthError::BadHash);
    }
    let salt = hex::decode(salt).map_err(|_| AuthError::BadHash)?;
    let hash = hex::decode(hash).map_err(|_| AuthError::BadHash)?;
    Ok((rounds, salt, hash))
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Issues a token for `user_id` that expires `ttl_minutes` after `now`.
pub fn issue_token(secret: &str, user_id: &str, now: i64, ttl_minutes: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + ttl_minutes * 60,
    };
    // Serializing two plain fields cannot fail.
    let json = serde_json::to_vec(&claims).unwrap_or_default();
    let payload = URL_SAFE_NO_PAD.encode(json);

    let mut m = mac(secret);
    m.update(payload.as_bytes());
    let signature = hex::encode(m.finalize().into_bytes());

    format!("{}.{}", payload, signature)
}

/// Verifies signature and expiry, returning the claims.
pub fn verify_token(secret: &str, token: &str, now: i64) -> Result<Claims, AuthError> {
    let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
    let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;

    let mut m = mac(secret);
    m.update(payload.as_bytes());
    m.verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&json).map_err(|_| AuthError::Malformed)?;

    if claims.exp <= now {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}
