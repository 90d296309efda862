//! Social interactions (like, favorite, report) and profile edits.
//!
//! Each action is a single backend call. Failures never propagate to the
//! page: they end up as a toast and the caller gets `false` / `None`.

use crate::UserProfile;
use crate::client::auth_store::AuthStore;
use crate::client::http_client::{ApiError, BackendApi, ProfileUpdate, ReportRequest};
use crate::client::profile_cache::ProfileCache;
use crate::client::storage::KeyValueStore;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

/// Queue of user-visible notifications, drained by the UI.
#[derive(Clone, Default)]
pub struct Toasts {
    queue: Arc<Mutex<Vec<Toast>>>,
}

impl Toasts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: ToastKind, message: impl Into<String>) {
        let toast = Toast {
            kind,
            message: message.into(),
        };
        match self.queue.lock() {
            Ok(mut queue) => queue.push(toast),
            Err(_) => tracing::error!("Toast queue poisoned, dropping: {}", toast.message),
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(ToastKind::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(ToastKind::Success, message);
    }

    /// Removes and returns every pending toast.
    pub fn drain(&self) -> Vec<Toast> {
        self.queue
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interaction buttons backed by a [`BackendApi`].
pub struct Interactions<B, S> {
    backend: B,
    cache: ProfileCache<S>,
    store: AuthStore,
    toasts: Toasts,
}

impl<B: BackendApi, S: KeyValueStore> Interactions<B, S> {
    pub fn new(backend: B, cache: ProfileCache<S>, store: AuthStore, toasts: Toasts) -> Self {
        Self {
            backend,
            cache,
            store,
            toasts,
        }
    }

    /// Logged-out users get the login dialog instead of a request.
    fn require_login(&self) -> bool {
        if self.store.is_logged_in() {
            return true;
        }
        tracing::trace!("Interaction requires login, opening dialog");
        self.store.set_login_dialog_open(true);
        false
    }

    fn report_failure(&self, action: &str, err: &ApiError) {
        tracing::warn!("{} failed: {}", action, err);
        self.toasts.error(format!("{} failed. Please try again.", action));
    }

    pub async fn like(&self, post_id: &str, liked: bool) -> bool {
        if !self.require_login() {
            return false;
        }
        match self.backend.like_post(post_id, liked).await {
            Ok(()) => true,
            Err(e) => {
                self.report_failure("Like", &e);
                false
            }
        }
    }

    pub async fn favorite(&self, post_id: &str, favorited: bool) -> bool {
        if !self.require_login() {
            return false;
        }
        match self.backend.favorite_post(post_id, favorited).await {
            Ok(()) => true,
            Err(e) => {
                self.report_failure("Favorite", &e);
                false
            }
        }
    }

    pub async fn report(&self, report: &ReportRequest) -> bool {
        if !self.require_login() {
            return false;
        }
        match self.backend.create_report(report).await {
            Ok(()) => {
                self.toasts.success("Report submitted");
                true
            }
            Err(e) => {
                self.report_failure("Report", &e);
                false
            }
        }
    }

    /// Saves profile edits. The returned profile is merged into the cache
    /// and announced through the storage trigger.
    pub async fn save_profile(&self, update: ProfileUpdate) -> Option<UserProfile> {
        if !self.require_login() {
            return None;
        }
        let updated = match self.backend.update_profile(update).await {
            Ok(updated) => updated,
            Err(e) => {
                self.report_failure("Profile update", &e);
                return None;
            }
        };

        let Some(remote) = updated else {
            // Nothing returned, let the monitor pick it up on the next refresh
            self.toasts.success("Profile saved");
            return self.cache.read();
        };

        match self.cache.merge(remote.clone()) {
            Ok(merged) => {
                self.store.toggle_profile_trigger();
                self.toasts.success("Profile saved");
                Some(merged)
            }
            Err(e) => {
                tracing::warn!("Failed to cache updated profile: {}", e);
                self.store.set_user_profile(Some(remote.clone()));
                Some(remote)
            }
        }
    }
}
