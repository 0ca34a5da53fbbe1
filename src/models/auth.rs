// ABOUTME: Server-side auth session issued after PIN login

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sessions live at most seven days; there is no per-user identity.
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    /// Sha-256 digest of the opaque token handed to the client.
    pub token_digest: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(token_digest: String) -> Self {
        let now = Utc::now();
        Self {
            token_digest,
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
