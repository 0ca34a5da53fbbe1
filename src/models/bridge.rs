// ABOUTME: Persistent record for a remote bridge agent and its hashed token

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRecord {
    pub id: String,
    pub name: String,
    /// Only the hash is ever persisted; the cleartext token is returned once on creation.
    pub token_hash: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl BridgeRecord {
    pub fn new(name: impl Into<String>, token_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            token_hash,
            enabled: true,
            created_at: Utc::now(),
            last_seen: None,
        }
    }
}
