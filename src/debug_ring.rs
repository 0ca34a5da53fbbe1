// ABOUTME: Bounded in-memory log ring merging server, bridge and client events

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RING_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: DebugLevel,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Fixed-capacity ring. Writes are serialized; reads copy a consistent snapshot.
pub struct DebugRing {
    inner: Mutex<RingState>,
}

struct RingState {
    entries: VecDeque<DebugEntry>,
    next_id: u64,
}

impl DebugRing {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RingState {
                entries: VecDeque::with_capacity(RING_CAPACITY),
                next_id: 1,
            }),
        }
    }

    pub fn push(
        &self,
        level: DebugLevel,
        source: impl Into<String>,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) {
        let mut state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        if state.entries.len() == RING_CAPACITY {
            state.entries.pop_front();
        }
        state.entries.push_back(DebugEntry {
            id,
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
            detail,
        });
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.push(DebugLevel::Info, source, message, None);
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.push(DebugLevel::Warn, source, message, None);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.push(DebugLevel::Error, source, message, None);
    }

    /// Entries posted by remote clients carry a `ui:` source prefix.
    pub fn push_client(
        &self,
        level: DebugLevel,
        source: &str,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) {
        self.push(level, format!("ui:{source}"), message, detail);
    }

    pub fn snapshot(&self) -> Vec<DebugEntry> {
        let state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        state.entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        state.entries.clear();
    }
}

impl Default for DebugRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_and_keeps_newest() {
        let ring = DebugRing::new();
        for i in 0..(RING_CAPACITY + 10) {
            ring.info("test", format!("entry {i}"));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), RING_CAPACITY);
        assert_eq!(snapshot.first().unwrap().message, "entry 10");
        assert_eq!(
            snapshot.last().unwrap().message,
            format!("entry {}", RING_CAPACITY + 9)
        );
    }

    #[test]
    fn ids_are_monotonic_across_clear() {
        let ring = DebugRing::new();
        ring.info("a", "one");
        ring.clear();
        ring.info("a", "two");
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, 2);
    }

    #[test]
    fn client_entries_get_ui_prefix() {
        let ring = DebugRing::new();
        ring.push_client(DebugLevel::Warn, "terminal", "slow render", None);
        assert_eq!(ring.snapshot()[0].source, "ui:terminal");
    }
}
