//! # Session Cookies
//!
//! The admin session is a small JSON payload sealed with XChaCha20-Poly1305
//! and shipped as one opaque cookie value:
//!
//! ```text
//! base64url( nonce[24] || ciphertext )
//! ```
//!
//! The 32-byte key is `sha256(SESSION_SECRET)`, so the secret file can hold
//! any reasonably long string. A fresh random nonce per cookie means sealing
//! the same payload twice never yields the same value. AEAD authentication
//! makes the cookie tamper-evident; there is nothing to verify server-side
//! beyond decrypting it.
use axum::http::HeaderMap;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SESSION_COOKIE: &str = "lp_session";

const NONCE_LEN: usize = 24;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Session {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed session cookie")]
    Encoding,

    #[error("Session decryption failed")]
    Crypto,

    #[error("Session expired")]
    Expired,
}

pub struct SessionCodec {
    cipher: XChaCha20Poly1305,
    ttl_secs: i64,
}

impl SessionCodec {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        let key = Sha256::digest(secret.as_bytes());

        Self {
            cipher: XChaCha20Poly1305::new_from_slice(&key).unwrap(),
            ttl_secs,
        }
    }

    pub fn seal(&self, sub: &str) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        let session = Session {
            sub: sub.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        let payload = serde_json::to_vec(&session).map_err(|_| SessionError::Encoding)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce_bytes), payload.as_ref())
            .map_err(|_| SessionError::Crypto)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    pub fn open(&self, value: &str) -> Result<Session, SessionError> {
        let blob = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| SessionError::Encoding)?;

        if blob.len() <= NONCE_LEN {
            return Err(SessionError::Encoding);
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let payload = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionError::Crypto)?;

        let session: Session =
            serde_json::from_slice(&payload).map_err(|_| SessionError::Encoding)?;

        if session.exp <= Utc::now().timestamp() {
            return Err(SessionError::Expired);
        }

        Ok(session)
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }
}

pub fn set_cookie_header(value: &str, ttl_secs: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };

    format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={ttl_secs}{secure_attr}")
}

pub fn clear_cookie_header(secure: bool) -> String {
    set_cookie_header("", 0, secure)
}

/// Pull the session cookie value out of the `Cookie` request header.
pub fn cookie_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;

    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}
