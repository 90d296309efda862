//! Local copy of the user profile under the `user` key.

use crate::UserProfile;
use crate::client::storage::{KeyValueStore, StorageError, keys};

/// Single cached [`UserProfile`], overwritten wholesale on every write.
#[derive(Clone)]
pub struct ProfileCache<S> {
    storage: S,
}

impl<S: KeyValueStore> ProfileCache<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Reads the cached profile. Malformed JSON reads as "no profile".
    pub fn read(&self) -> Option<UserProfile> {
        match self.storage.get_json::<UserProfile>(keys::USER) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Cached user profile is unreadable, ignoring: {}", e);
                None
            }
        }
    }

    pub fn write(&self, profile: &UserProfile) -> Result<(), StorageError> {
        tracing::trace!("Caching user profile {}", profile.id);
        self.storage.set_json(keys::USER, profile)
    }

    /// Overlays `remote` onto the cached copy and stores the result.
    pub fn merge(&self, remote: UserProfile) -> Result<UserProfile, StorageError> {
        let merged = match self.read() {
            Some(local) if local.id == remote.id => local.merged_with(remote),
            _ => remote,
        };
        self.write(&merged)?;
        Ok(merged)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(keys::USER)
    }
}
