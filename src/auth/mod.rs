// ABOUTME: PIN issuance and opaque session tokens guarding every API and WebSocket operation

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::{STANDARD as B64, URL_SAFE_NO_PAD as B64_URL};
use base64::Engine;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::models::AuthSession;
use crate::store::{PinFile, StateStore, StoreError};

const SECRET_HASH_LEN: usize = 32;
const SALT_LEN: usize = 16;
const SESSION_TOKEN_LEN: usize = 32;

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "tmuxdeck_session";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("PIN must be at least 4 digits")]
    PinTooWeak,
    #[error("PIN is already configured")]
    PinAlreadySet,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hash an arbitrary secret (PIN or bridge token) with scrypt and a fresh salt.
/// Encoding: `base64(salt)$base64(hash)`.
pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash = derive(secret.as_bytes(), &salt)?;
    Ok(format!("{}${}", B64.encode(salt), B64.encode(hash)))
}

/// Constant-shape verification of a secret against a stored `salt$hash` string.
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt_b64, hash_b64)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (B64.decode(salt_b64), B64.decode(hash_b64)) else {
        return false;
    };
    match derive(secret.as_bytes(), &salt) {
        Ok(actual) => {
            // Compare without early exit on length match.
            expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(actual.iter())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                    == 0
        }
        Err(_) => false,
    }
}

fn derive(secret: &[u8], salt: &[u8]) -> Result<[u8; SECRET_HASH_LEN], AuthError> {
    let params = ScryptParams::recommended();
    let mut out = [0u8; SECRET_HASH_LEN];
    scrypt(secret, salt, &params, &mut out).map_err(|e| AuthError::Kdf(e.to_string()))?;
    Ok(out)
}

/// Generate an opaque high-entropy token, base64url encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    B64_URL.encode(bytes)
}

fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Gate state: the optional PIN hash plus live session tokens. Sessions are
/// in-memory only; a restart logs everyone out, the PIN survives on disk.
pub struct AuthService {
    store: Arc<StateStore>,
    state: Mutex<AuthState>,
}

struct AuthState {
    pin_hash: Option<String>,
    sessions: HashMap<String, AuthSession>,
}

impl AuthService {
    pub fn new(store: Arc<StateStore>) -> Self {
        let pin_hash = store.load_pin().pin_hash;
        Self {
            store,
            state: Mutex::new(AuthState {
                pin_hash,
                sessions: HashMap::new(),
            }),
        }
    }

    pub fn pin_set(&self) -> bool {
        self.lock().pin_hash.is_some()
    }

    /// First-use setup. Until this succeeds, every request passes the gate.
    pub fn setup_pin(&self, pin: &str) -> Result<(), AuthError> {
        validate_pin(pin)?;
        let mut state = self.lock();
        if state.pin_hash.is_some() {
            return Err(AuthError::PinAlreadySet);
        }
        let hash = hash_secret(pin)?;
        self.store.save_pin(&PinFile {
            pin_hash: Some(hash.clone()),
            ..PinFile::default()
        })?;
        state.pin_hash = Some(hash);
        info!("PIN configured; auth gate is now active");
        Ok(())
    }

    /// Replace the PIN; requires the current one.
    pub fn change_pin(&self, current: &str, new_pin: &str) -> Result<(), AuthError> {
        validate_pin(new_pin)?;
        let mut state = self.lock();
        let Some(existing) = state.pin_hash.as_deref() else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_secret(current, existing) {
            return Err(AuthError::InvalidCredentials);
        }
        let hash = hash_secret(new_pin)?;
        self.store.save_pin(&PinFile {
            pin_hash: Some(hash.clone()),
            ..PinFile::default()
        })?;
        state.pin_hash = Some(hash);
        Ok(())
    }

    /// Verify the PIN and mint a session token. The cleartext token goes into
    /// the cookie; only its digest is retained.
    pub fn login(&self, pin: &str) -> Result<String, AuthError> {
        let mut state = self.lock();
        let Some(hash) = state.pin_hash.as_deref() else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_secret(pin, hash) {
            return Err(AuthError::InvalidCredentials);
        }
        let token = generate_token();
        let digest = token_digest(&token);
        state.sessions.insert(digest.clone(), AuthSession::new(digest));
        Ok(token)
    }

    pub fn logout(&self, token: &str) {
        let digest = token_digest(token);
        self.lock().sessions.remove(&digest);
    }

    /// True when the request may proceed: either no PIN is configured yet, or
    /// the presented token maps to an unexpired session.
    pub fn authorize(&self, token: Option<&str>) -> bool {
        let mut state = self.lock();
        if state.pin_hash.is_none() {
            return true;
        }
        let Some(token) = token else {
            return false;
        };
        let digest = token_digest(token);
        match state.sessions.get(&digest) {
            Some(session) if !session.is_expired() => true,
            Some(_) => {
                state.sessions.remove(&digest);
                false
            }
            None => false,
        }
    }

    /// Whether the presented token is a currently valid session (independent
    /// of the first-use window). Used by `/auth/status`.
    pub fn is_authenticated(&self, token: Option<&str>) -> bool {
        let state = self.lock();
        let Some(token) = token else {
            return false;
        };
        state
            .sessions
            .get(&token_digest(token))
            .is_some_and(|s| !s.is_expired())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn validate_pin(pin: &str) -> Result<(), AuthError> {
    if pin.len() < 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(AuthError::PinTooWeak);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (AuthService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        (AuthService::new(store), dir)
    }

    #[test]
    fn open_gate_before_pin_setup() {
        let (auth, _dir) = service();
        assert!(!auth.pin_set());
        assert!(auth.authorize(None));
        assert!(auth.authorize(Some("anything")));
    }

    #[test]
    fn pin_rules() {
        let (auth, _dir) = service();
        assert!(matches!(auth.setup_pin("123"), Err(AuthError::PinTooWeak)));
        assert!(matches!(auth.setup_pin("12ab"), Err(AuthError::PinTooWeak)));
        auth.setup_pin("1234").unwrap();
        assert!(matches!(
            auth.setup_pin("5678"),
            Err(AuthError::PinAlreadySet)
        ));
    }

    #[test]
    fn login_logout_cycle() {
        let (auth, _dir) = service();
        auth.setup_pin("1234").unwrap();

        assert!(!auth.authorize(None));
        assert!(matches!(
            auth.login("9999"),
            Err(AuthError::InvalidCredentials)
        ));

        let token = auth.login("1234").unwrap();
        assert!(auth.authorize(Some(&token)));
        assert!(auth.is_authenticated(Some(&token)));

        auth.logout(&token);
        assert!(!auth.authorize(Some(&token)));
    }

    #[test]
    fn pin_survives_restart_sessions_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        let auth = AuthService::new(store.clone());
        auth.setup_pin("2468").unwrap();
        let token = auth.login("2468").unwrap();

        let restarted = AuthService::new(Arc::new(StateStore::open(dir.path()).unwrap()));
        assert!(restarted.pin_set());
        assert!(!restarted.authorize(Some(&token)));
        assert!(restarted.login("2468").is_ok());
    }

    #[test]
    fn secret_hash_never_contains_cleartext() {
        let stored = hash_secret("super-secret-bridge-token").unwrap();
        assert!(!stored.contains("super-secret-bridge-token"));
        assert!(verify_secret("super-secret-bridge-token", &stored));
        assert!(!verify_secret("other", &stored));
    }
}
