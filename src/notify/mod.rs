// ABOUTME: Notification router: per-key dedup, SSE fan-out, Telegram fallback timers

mod telegram;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::debug_ring::DebugRing;
use crate::models::{Notification, NotificationChannel, NotificationKind, NotificationStatus};
use crate::store::StateStore;

pub use telegram::{ChatInfo, TelegramError, TelegramSender};

/// Retained notifications, pending or settled. Oldest settled entries are
/// dropped past this bound.
const MAX_HISTORY: usize = 500;
const SSE_BROADCAST_CAP: usize = 256;

type DedupKey = (String, String, NotificationKind);

struct RouterState {
    notifications: Vec<Notification>,
    timers: HashMap<DedupKey, JoinHandle<()>>,
}

pub struct NotificationRouter {
    state: Mutex<RouterState>,
    sse_tx: broadcast::Sender<Notification>,
    telegram: Option<Arc<TelegramSender>>,
    store: Arc<StateStore>,
    ring: Arc<DebugRing>,
}

impl NotificationRouter {
    pub fn new(
        store: Arc<StateStore>,
        ring: Arc<DebugRing>,
        telegram: Option<Arc<TelegramSender>>,
    ) -> Self {
        let (sse_tx, _) = broadcast::channel(SSE_BROADCAST_CAP);
        Self {
            state: Mutex::new(RouterState {
                notifications: Vec::new(),
                timers: HashMap::new(),
            }),
            sse_tx,
            telegram,
            store,
            ring,
        }
    }

    /// Live stream of notification events for SSE subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sse_tx.subscribe()
    }

    pub fn pending(&self) -> Vec<Notification> {
        self.lock()
            .notifications
            .iter()
            .filter(|n| n.is_pending())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Route one notification. An existing pending notification with the same
    /// `(container, session, kind)` key is merged, never duplicated.
    pub fn publish(self: &Arc<Self>, incoming: Notification) -> Notification {
        let result = {
            let mut state = self.lock();
            let key = incoming.dedup_key();
            let merged = if let Some(existing) = state
                .notifications
                .iter_mut()
                .find(|n| n.is_pending() && n.dedup_key() == key)
            {
                existing.message = incoming.message;
                existing.title = incoming.title;
                existing.window_index = incoming.window_index;
                existing.created_at = Utc::now();
                existing.channels = existing.channels.union(&incoming.channels).cloned().collect();
                existing.clone()
            } else {
                state.notifications.push(incoming.clone());
                Self::trim_history(&mut state.notifications);
                incoming
            };

            if merged.wants(NotificationChannel::Telegram) {
                if merged.wants(NotificationChannel::Web) {
                    // Web gets first shot; Telegram fires only if nobody dismisses.
                    if !state.timers.contains_key(&key) {
                        let timeout =
                            Duration::from_secs(self.store.load_settings().telegram_timeout_secs);
                        let router = Arc::clone(self);
                        let timer_key = key.clone();
                        let handle = tokio::spawn(async move {
                            tokio::time::sleep(timeout).await;
                            router.fire_fallback(&timer_key).await;
                        });
                        state.timers.insert(key, handle);
                    }
                } else {
                    let router = Arc::clone(self);
                    let send_key = key.clone();
                    tokio::spawn(async move {
                        router.deliver_telegram_now(&send_key).await;
                    });
                }
            }
            merged
        };

        if result.wants(NotificationChannel::Web) || result.wants(NotificationChannel::Os) {
            let _ = self.sse_tx.send(result.clone());
        }
        result
    }

    /// Mark matching pending notifications dismissed and cancel their fallback
    /// timers. The abort happens under the same lock as the status change, so a
    /// dismissed notification can never reach Telegram. Idempotent.
    pub fn dismiss(
        &self,
        container_id: &str,
        session_name: &str,
        window_index: Option<u32>,
    ) -> usize {
        let mut state = self.lock();
        let RouterState {
            notifications,
            timers,
        } = &mut *state;
        let mut count = 0;
        for n in notifications.iter_mut() {
            if !n.is_pending()
                || n.container_id != container_id
                || n.session_name != session_name
            {
                continue;
            }
            if let Some(index) = window_index {
                if n.window_index != index {
                    continue;
                }
            }
            n.status = NotificationStatus::Dismissed;
            count += 1;
            if let Some(handle) = timers.remove(&n.dedup_key()) {
                handle.abort();
            }
        }
        count
    }

    /// Fallback timer expiry: deliver via Telegram if possible, else time out.
    async fn fire_fallback(self: &Arc<Self>, key: &DedupKey) {
        let payload = {
            let mut state = self.lock();
            state.timers.remove(key);
            let Some(n) = state
                .notifications
                .iter_mut()
                .find(|n| n.is_pending() && n.dedup_key() == *key)
            else {
                return;
            };
            match self.telegram_target() {
                Some(target) => {
                    // The pending -> delivered transition is the linearization
                    // point; a send failure reverts it below.
                    n.status = NotificationStatus::Delivered;
                    Some((target, n.clone()))
                }
                None => {
                    n.status = NotificationStatus::TimedOut;
                    None
                }
            }
        };
        let Some(((sender, chat_id), notification)) = payload else {
            return;
        };
        self.send_or_revert(&sender, chat_id, &notification).await;
    }

    /// Immediate delivery for telegram-only notifications.
    async fn deliver_telegram_now(self: &Arc<Self>, key: &DedupKey) {
        let payload = {
            let mut state = self.lock();
            let Some(n) = state
                .notifications
                .iter_mut()
                .find(|n| n.is_pending() && n.dedup_key() == *key)
            else {
                return;
            };
            match self.telegram_target() {
                Some(target) => {
                    n.status = NotificationStatus::Delivered;
                    Some((target, n.clone()))
                }
                None => {
                    self.ring
                        .warn("notify", "telegram channel requested but not configured");
                    None
                }
            }
        };
        let Some(((sender, chat_id), notification)) = payload else {
            return;
        };
        self.send_or_revert(&sender, chat_id, &notification).await;
    }

    async fn send_or_revert(
        self: &Arc<Self>,
        sender: &TelegramSender,
        chat_id: i64,
        notification: &Notification,
    ) {
        let text = format!("{}\n{}", notification.title, notification.message);
        match sender.send_message(chat_id, &text).await {
            Ok(()) => {
                debug!("telegram delivery for {}", notification.id);
                if let Some(current) = self.find(notification.id) {
                    let _ = self.sse_tx.send(current);
                }
            }
            Err(e) => {
                self.ring
                    .error("notify", format!("telegram delivery failed: {e}"));
                warn!("telegram delivery failed: {e}");
                let mut state = self.lock();
                if let Some(n) = state
                    .notifications
                    .iter_mut()
                    .find(|n| n.id == notification.id)
                {
                    // Leave it pending so a later pass can retry.
                    n.status = NotificationStatus::Pending;
                }
            }
        }
    }

    fn find(&self, id: uuid::Uuid) -> Option<Notification> {
        self.lock().notifications.iter().find(|n| n.id == id).cloned()
    }

    fn telegram_target(&self) -> Option<(Arc<TelegramSender>, i64)> {
        let sender = self.telegram.clone()?;
        let chat_id = self.store.load_settings().telegram_chat_id?;
        Some((sender, chat_id))
    }

    fn trim_history(notifications: &mut Vec<Notification>) {
        if notifications.len() <= MAX_HISTORY {
            return;
        }
        let overflow = notifications.len() - MAX_HISTORY;
        let mut removed = 0;
        notifications.retain(|n| {
            if removed < overflow && !n.is_pending() {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;
    use std::collections::BTreeSet;

    fn router() -> (Arc<NotificationRouter>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        let ring = Arc::new(DebugRing::new());
        (Arc::new(NotificationRouter::new(store, ring, None)), dir)
    }

    fn bell(container: &str, session: &str, message: &str) -> Notification {
        Notification::new(
            container,
            session,
            0,
            "Bell",
            message,
            NotificationKind::Bell,
            BTreeSet::from([NotificationChannel::Web]),
        )
    }

    #[tokio::test]
    async fn dedup_merges_same_key() {
        let (router, _dir) = router();
        router.publish(bell("c1", "s", "first"));
        router.publish(bell("c1", "s", "second"));
        router.publish(bell("c1", "s", "third"));

        let pending = router.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message, "third");
    }

    #[tokio::test]
    async fn different_kinds_do_not_merge() {
        let (router, _dir) = router();
        router.publish(bell("c1", "s", "ding"));
        router.publish(Notification::new(
            "c1",
            "s",
            0,
            "Activity",
            "output",
            NotificationKind::Activity,
            BTreeSet::new(),
        ));
        assert_eq!(router.pending().len(), 2);
    }

    #[tokio::test]
    async fn dismiss_is_idempotent() {
        let (router, _dir) = router();
        router.publish(bell("c1", "s", "ding"));
        assert_eq!(router.dismiss("c1", "s", None), 1);
        assert_eq!(router.dismiss("c1", "s", None), 0);
        assert!(router.pending().is_empty());
        let all = router.all();
        assert_eq!(all[0].status, NotificationStatus::Dismissed);
    }

    #[tokio::test]
    async fn dismiss_filters_by_window() {
        let (router, _dir) = router();
        let mut n = bell("c1", "s", "ding");
        n.window_index = 3;
        router.publish(n);
        assert_eq!(router.dismiss("c1", "s", Some(1)), 0);
        assert_eq!(router.dismiss("c1", "s", Some(3)), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let (router, _dir) = router();
        let mut rx = router.subscribe();
        router.publish(bell("c1", "s", "ding"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.message, "ding");
        assert_eq!(event.status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn merge_unions_channels() {
        let (router, _dir) = router();
        router.publish(bell("c1", "s", "ding"));
        let mut n = bell("c1", "s", "ding again");
        n.channels = BTreeSet::from([NotificationChannel::Os]);
        let merged = router.publish(n);
        assert!(merged.wants(NotificationChannel::Web));
        assert!(merged.wants(NotificationChannel::Os));
    }

    #[tokio::test]
    async fn dismissal_never_reaches_telegram_timer() {
        let (router, _dir) = router();
        let mut n = bell("c1", "s", "ding");
        n.channels = BTreeSet::from([NotificationChannel::Web, NotificationChannel::Telegram]);
        router.publish(n);
        // Timer armed; dismissing must abort it before it can fire.
        assert_eq!(router.dismiss("c1", "s", None), 1);
        assert!(router.lock().timers.is_empty());
    }
}
