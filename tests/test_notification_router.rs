// ABOUTME: Router-level tests for dedup, dismissal and the Telegram fallback timer

use std::collections::BTreeSet;
use std::sync::Arc;

use tmuxdeck::debug_ring::DebugRing;
use tmuxdeck::models::{
    Notification, NotificationChannel, NotificationKind, NotificationStatus,
};
use tmuxdeck::notify::NotificationRouter;
use tmuxdeck::store::StateStore;

fn make_router() -> (Arc<NotificationRouter>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let ring = Arc::new(DebugRing::new());
    (Arc::new(NotificationRouter::new(store, ring, None)), dir)
}

fn notification(kind: NotificationKind, channels: &[NotificationChannel]) -> Notification {
    Notification::new(
        "c1",
        "work",
        0,
        "title",
        "message",
        kind,
        channels.iter().copied().collect::<BTreeSet<_>>(),
    )
}

#[tokio::test]
async fn pending_per_key_stays_unique_under_bursts() {
    let (router, _dir) = make_router();
    for i in 0..50 {
        let mut n = notification(NotificationKind::Bell, &[NotificationChannel::Web]);
        n.message = format!("ring {i}");
        router.publish(n);
    }
    let pending = router.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "ring 49");
}

#[tokio::test]
async fn keys_differ_by_container_session_and_kind() {
    let (router, _dir) = make_router();
    router.publish(notification(NotificationKind::Bell, &[]));
    router.publish(notification(NotificationKind::Activity, &[]));
    let mut other_container = notification(NotificationKind::Bell, &[]);
    other_container.container_id = "c2".into();
    router.publish(other_container);
    let mut other_session = notification(NotificationKind::Bell, &[]);
    other_session.session_name = "play".into();
    router.publish(other_session);

    assert_eq!(router.pending().len(), 4);
}

#[tokio::test]
async fn empty_channel_set_is_treated_as_web() {
    let (router, _dir) = make_router();
    let published = router.publish(notification(NotificationKind::Alert, &[]));
    assert!(published.wants(NotificationChannel::Web));
}

#[tokio::test]
async fn dismiss_marks_and_is_idempotent() {
    let (router, _dir) = make_router();
    router.publish(notification(NotificationKind::Prompt, &[NotificationChannel::Web]));
    assert_eq!(router.dismiss("c1", "work", None), 1);
    assert_eq!(router.dismiss("c1", "work", None), 0);
    assert_eq!(router.dismiss("c1", "work", None), 0);
    assert_eq!(
        router.all()[0].status,
        NotificationStatus::Dismissed
    );
}

#[tokio::test(start_paused = true)]
async fn undismissed_web_notification_times_out_without_telegram_target() {
    // Telegram requested alongside web, but no bot is configured: when the
    // fallback timer fires there is nothing to deliver through, so the
    // notification times out instead of staying pending forever.
    let (router, _dir) = make_router();
    router.publish(notification(
        NotificationKind::Bell,
        &[NotificationChannel::Web, NotificationChannel::Telegram],
    ));
    assert_eq!(router.pending().len(), 1);

    // Default telegramTimeoutSecs is 60.
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    tokio::task::yield_now().await;

    assert!(router.pending().is_empty());
    assert_eq!(router.all()[0].status, NotificationStatus::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn dismissed_notification_never_times_out() {
    let (router, _dir) = make_router();
    router.publish(notification(
        NotificationKind::Bell,
        &[NotificationChannel::Web, NotificationChannel::Telegram],
    ));
    router.dismiss("c1", "work", None);

    tokio::time::sleep(std::time::Duration::from_secs(120)).await;
    tokio::task::yield_now().await;

    assert_eq!(router.all()[0].status, NotificationStatus::Dismissed);
}

#[tokio::test]
async fn sse_subscribers_see_merged_payloads() {
    let (router, _dir) = make_router();
    let mut rx = router.subscribe();
    router.publish(notification(NotificationKind::Bell, &[NotificationChannel::Web]));
    let mut n = notification(NotificationKind::Bell, &[NotificationChannel::Web]);
    n.message = "updated".into();
    n.window_index = 2;
    router.publish(n);

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.message, "updated");
    assert_eq!(second.window_index, 2);
}
