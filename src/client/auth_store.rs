//! Page-lifetime authentication state shared by every UI subtree.
//!
//! [`AuthStore`] is a single observable container: setters update one field
//! and notify subscribers only if the value changed. Subscribers get a
//! `tokio::sync::watch` receiver, which works the same in the browser and in
//! native tests.

use crate::UserProfile;
use std::sync::Arc;
use tokio::sync::watch;

/// Current value of the global auth store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthSnapshot {
    pub is_logged_in: bool,
    pub user_profile: Option<UserProfile>,
    /// Flipped to tell subscribers "re-read the cached profile now".
    pub user_profile_storage_trigger: bool,
    pub is_login_dialog_open: bool,
}

/// Cloneable handle to the global auth state.
#[derive(Clone)]
pub struct AuthStore {
    tx: Arc<watch::Sender<AuthSnapshot>>,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.tx.subscribe()
    }

    pub fn is_logged_in(&self) -> bool {
        self.tx.borrow().is_logged_in
    }

    pub fn user_profile(&self) -> Option<UserProfile> {
        self.tx.borrow().user_profile.clone()
    }

    pub fn profile_trigger(&self) -> bool {
        self.tx.borrow().user_profile_storage_trigger
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_logged_in != logged_in;
            state.is_logged_in = logged_in;
            changed
        });
    }

    pub fn set_user_profile(&self, profile: Option<UserProfile>) {
        self.tx.send_if_modified(|state| {
            let changed = state.user_profile != profile;
            state.user_profile = profile;
            changed
        });
    }

    /// Flips the storage trigger; always notifies.
    pub fn toggle_profile_trigger(&self) {
        self.tx.send_modify(|state| {
            state.user_profile_storage_trigger = !state.user_profile_storage_trigger;
        });
    }

    pub fn set_login_dialog_open(&self, open: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_login_dialog_open != open;
            state.is_login_dialog_open = open;
            changed
        });
    }

    /// Marks the user logged out and drops the profile.
    pub fn reset(&self) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_logged_in || state.user_profile.is_some();
            state.is_logged_in = false;
            state.user_profile = None;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = AuthStore::new();
        assert_eq!(store.snapshot(), AuthSnapshot::default());
        assert!(!store.is_logged_in());
    }

    #[test]
    fn test_setters_notify_only_on_change() {
        let store = AuthStore::new();
        let mut rx = store.subscribe();

        store.set_logged_in(false);
        assert!(!rx.has_changed().unwrap());

        store.set_logged_in(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_logged_in);

        store.set_logged_in(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_trigger_always_notifies() {
        let store = AuthStore::new();
        let mut rx = store.subscribe();

        store.toggle_profile_trigger();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().user_profile_storage_trigger);

        store.toggle_profile_trigger();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().user_profile_storage_trigger);
    }

    #[test]
    fn test_clones_share_state() {
        let store = AuthStore::new();
        let other = store.clone();
        other.set_user_profile(Some(UserProfile::new("9")));
        other.set_login_dialog_open(true);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.user_profile.map(|p| p.id).as_deref(), Some("9"));
        assert!(snapshot.is_login_dialog_open);
    }

    #[test]
    fn test_reset() {
        let store = AuthStore::new();
        store.set_logged_in(true);
        store.set_user_profile(Some(UserProfile::new("9")));
        store.reset();
        assert!(!store.is_logged_in());
        assert!(store.user_profile().is_none());
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_change() {
        let store = AuthStore::new();
        let mut rx = store.subscribe();
        let writer = store.clone();

        writer.set_logged_in(true);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_logged_in);
    }
}
