// ABOUTME: Auth gate lifecycle: first-use window, login, logout, persistence

use std::sync::Arc;

use tmuxdeck::auth::AuthService;
use tmuxdeck::store::StateStore;

#[test]
fn gate_is_open_until_pin_setup_then_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let auth = AuthService::new(store.clone());

    // First-use window: everything passes before a PIN exists.
    assert!(auth.authorize(None));

    auth.setup_pin("4321").unwrap();
    assert!(!auth.authorize(None));
    assert!(!auth.authorize(Some("not-a-token")));

    let token = auth.login("4321").unwrap();
    assert!(auth.authorize(Some(&token)));

    auth.logout(&token);
    assert!(!auth.authorize(Some(&token)));

    // Only the scrypt hash reaches disk.
    let raw = std::fs::read_to_string(dir.path().join("pin.json")).unwrap();
    assert!(!raw.contains("4321"));
    assert!(raw.contains("pinHash"));
}
