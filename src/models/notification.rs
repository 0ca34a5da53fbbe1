// ABOUTME: Notification model with dedup key, delivery channels and lifecycle status

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Bell,
    Activity,
    Alert,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Web,
    Os,
    Telegram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Dismissed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub container_id: String,
    pub session_name: String,
    pub window_index: u32,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    /// Orthogonal set, no ordering between channels. Empty is normalized to {web}.
    pub channels: BTreeSet<NotificationChannel>,
    pub created_at: DateTime<Utc>,
    pub status: NotificationStatus,
}

impl Notification {
    pub fn new(
        container_id: impl Into<String>,
        session_name: impl Into<String>,
        window_index: u32,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        channels: BTreeSet<NotificationChannel>,
    ) -> Self {
        let channels = if channels.is_empty() {
            BTreeSet::from([NotificationChannel::Web])
        } else {
            channels
        };
        Self {
            id: Uuid::new_v4(),
            container_id: container_id.into(),
            session_name: session_name.into(),
            window_index,
            title: title.into(),
            message: message.into(),
            kind,
            channels,
            created_at: Utc::now(),
            status: NotificationStatus::Pending,
        }
    }

    /// Dedup key: at most one pending notification may exist per key.
    pub fn dedup_key(&self) -> (String, String, NotificationKind) {
        (
            self.container_id.clone(),
            self.session_name.clone(),
            self.kind,
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, NotificationStatus::Pending)
    }

    pub fn wants(&self, channel: NotificationChannel) -> bool {
        self.channels.contains(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_channels_default_to_web() {
        let n = Notification::new("c1", "s", 0, "t", "m", NotificationKind::Bell, BTreeSet::new());
        assert!(n.wants(NotificationChannel::Web));
        assert_eq!(n.channels.len(), 1);
    }

    #[test]
    fn dedup_key_ignores_window() {
        let a = Notification::new("c1", "s", 0, "t", "m", NotificationKind::Bell, BTreeSet::new());
        let b = Notification::new("c1", "s", 4, "t2", "m2", NotificationKind::Bell, BTreeSet::new());
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn status_serializes_snake_case() {
        let v = serde_json::to_value(NotificationStatus::TimedOut).unwrap();
        assert_eq!(v, "timed_out");
    }
}
