//! Advisory cross-tab update lock.
//!
//! A lock is a storage key holding the millisecond timestamp at which it was
//! taken. It is acquired by writing that timestamp when the key is absent or
//! older than the lock duration, and released by deleting the key. Check and
//! write are two separate storage operations, so two tabs can both see a free
//! lock and both proceed; callers treat it as a hint, not a guarantee.

use crate::client::storage::{KeyValueStore, StorageError, keys};

/// Age after which a held lock is considered abandoned.
pub const UPDATE_LOCK_DURATION: u64 = 30_000;

/// A timestamp lock stored under `key`.
#[derive(Clone)]
pub struct AdvisoryLock<S> {
    storage: S,
    key: &'static str,
    duration_ms: u64,
}

impl<S: KeyValueStore> AdvisoryLock<S> {
    pub fn new(storage: S, key: &'static str, duration_ms: u64) -> Self {
        Self {
            storage,
            key,
            duration_ms,
        }
    }

    /// Lock guarding the token refresh (`auth_update_in_progress`).
    pub fn auth_update(storage: S) -> Self {
        Self::new(storage, keys::AUTH_UPDATE_LOCK, UPDATE_LOCK_DURATION)
    }

    /// Lock guarding the profile refresh (`user_profile_update_in_progress`).
    pub fn profile_update(storage: S) -> Self {
        Self::new(storage, keys::PROFILE_UPDATE_LOCK, UPDATE_LOCK_DURATION)
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// True if another holder took the lock less than `duration_ms` ago.
    pub fn is_held(&self, now_ms: u64) -> Result<bool, StorageError> {
        let Some(raw) = self.storage.get(self.key)? else {
            return Ok(false);
        };
        match raw.trim().parse::<u64>() {
            Ok(taken_at) => Ok(now_ms.saturating_sub(taken_at) < self.duration_ms),
            Err(_) => {
                tracing::warn!("Lock '{}' holds garbage '{}', treating as free", self.key, raw);
                Ok(false)
            }
        }
    }

    /// Takes the lock if it is free or stale. Returns `false` if it is held.
    pub fn try_acquire(&self, now_ms: u64) -> Result<bool, StorageError> {
        if self.is_held(now_ms)? {
            tracing::trace!("Lock '{}' is held by another context", self.key);
            return Ok(false);
        }
        self.storage.set(self.key, &now_ms.to_string())?;
        tracing::trace!("Acquired lock '{}'", self.key);
        Ok(true)
    }

    pub fn release(&self) -> Result<(), StorageError> {
        tracing::trace!("Releasing lock '{}'", self.key);
        self.storage.remove(self.key)
    }
}
