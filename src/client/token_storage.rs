//! Session credentials persisted in `localStorage`.
//!
//! Credentials are stored as three discrete keys (`accessToken`, `idToken`,
//! `expiresAt`) so other tabs can observe each one through the `storage`
//! event. Writes are not atomic: a failure between keys leaves the earlier
//! keys in place.
//!
//! ## Validity checks
//!
//! - [`SessionStore::is_authenticated_local`] is a *presence* check only: it
//!   reports `true` while both `accessToken` and `expiresAt` exist, even after
//!   `expiresAt` has passed.
//! - Expiry is evaluated by [`SessionStore::is_token_expired_at_time`], which
//!   the remote refresh path uses to decide whether a refresh is due.

use crate::client::storage::{KeyValueStore, StorageError, keys};
use serde::{Deserialize, Serialize};

/// Stored token data with its absolute expiry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Access token (bearer token for backend calls)
    pub access_token: String,
    /// ID token (JWT with user claims)
    pub id_token: String,
    /// Absolute expiry, UTC milliseconds
    pub expires_at: u64,
}

impl SessionCredentials {
    /// Builds credentials received at `now_ms` that live `expires_in` seconds.
    /// Lifetimes too large to represent saturate at `u64::MAX`.
    pub fn from_expires_in(
        access_token: String,
        id_token: String,
        expires_in: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            access_token,
            id_token,
            expires_at: now_ms.saturating_add(expires_in.saturating_mul(1000)),
        }
    }

    /// True once `now_ms` has reached the expiry.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Reads and writes [`SessionCredentials`] in a key-value store.
#[derive(Clone)]
pub struct SessionStore<S> {
    storage: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The underlying store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Writes the three credential keys in order.
    pub fn save(&self, credentials: &SessionCredentials) -> Result<(), StorageError> {
        tracing::trace!(
            "Persisting session credentials, expires at {}",
            credentials.expires_at
        );
        self.storage.set(keys::ACCESS_TOKEN, &credentials.access_token)?;
        self.storage.set(keys::ID_TOKEN, &credentials.id_token)?;
        self.storage.set_json(keys::EXPIRES_AT, &credentials.expires_at)?;
        Ok(())
    }

    /// Loads the credentials if all three keys are present and readable.
    pub fn load(&self) -> Option<SessionCredentials> {
        let access_token = self.access_token()?;
        let id_token = self.storage.get(keys::ID_TOKEN).ok()??;
        let expires_at = self.expires_at()?;
        Some(SessionCredentials {
            access_token,
            id_token,
            expires_at,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        match self.storage.get(keys::ACCESS_TOKEN) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Failed to read access token: {}", e);
                None
            }
        }
    }

    /// The stored expiry, `None` when missing or malformed.
    pub fn expires_at(&self) -> Option<u64> {
        match self.storage.get_json::<u64>(keys::EXPIRES_AT) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                tracing::warn!("Ignoring unreadable expiresAt: {}", e);
                None
            }
        }
    }

    /// True iff both `accessToken` and `expiresAt` are present.
    ///
    /// Does not look at whether the expiry has passed.
    pub fn is_authenticated_local(&self) -> bool {
        let has_expiry = matches!(self.storage.get(keys::EXPIRES_AT), Ok(Some(_)));
        has_expiry && self.access_token().is_some()
    }

    /// True iff `t_ms + buffer_minutes * 60000 >= expiresAt`.
    ///
    /// A missing or malformed expiry counts as expired.
    pub fn is_token_expired_at_time(&self, t_ms: u64, buffer_minutes: u64) -> bool {
        match self.expires_at() {
            Some(expires_at) => t_ms + buffer_minutes * 60_000 >= expires_at,
            None => true,
        }
    }

    /// Removes the three credential keys.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(keys::ACCESS_TOKEN)?;
        self.storage.remove(keys::ID_TOKEN)?;
        self.storage.remove(keys::EXPIRES_AT)?;
        Ok(())
    }
}

/// Keys removed from `localStorage` on logout.
pub const LOGOUT_KEYS: [&str; 4] = [
    keys::ACCESS_TOKEN,
    keys::ID_TOKEN,
    keys::EXPIRES_AT,
    keys::USER,
];

/// Clears the local session: exactly [`LOGOUT_KEYS`] from `local` and all of
/// `session`. The caller redirects to the provider logout URL afterwards.
pub fn logout<L: KeyValueStore, T: KeyValueStore>(
    local: &L,
    session: &T,
) -> Result<(), StorageError> {
    tracing::trace!("Clearing local session");
    for key in LOGOUT_KEYS {
        local.remove(key)?;
    }
    session.clear()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::storage::MemoryStore;

    const NOW: u64 = 1_700_000_000_000;

    fn credentials(expires_in: u64) -> SessionCredentials {
        SessionCredentials::from_expires_in(
            "access".to_string(),
            "id".to_string(),
            expires_in,
            NOW,
        )
    }

    #[test]
    fn test_expires_at_is_absolute_ms() {
        let creds = credentials(3600);
        assert_eq!(creds.expires_at, NOW + 3_600_000);
        assert!(!creds.is_expired_at(NOW));
        assert!(creds.is_expired_at(NOW + 3_600_000));
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let creds = credentials(u64::MAX);
        assert_eq!(creds.expires_at, u64::MAX);
        assert!(!creds.is_expired_at(NOW));
    }

    #[test]
    fn test_save_writes_discrete_keys() {
        let store = MemoryStore::new();
        let session = SessionStore::new(store.clone());
        session.save(&credentials(3600)).unwrap();

        assert_eq!(store.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("access"));
        assert_eq!(store.get(keys::ID_TOKEN).unwrap().as_deref(), Some("id"));
        assert_eq!(
            store.get(keys::EXPIRES_AT).unwrap(),
            Some((NOW + 3_600_000).to_string())
        );
        assert_eq!(session.load(), Some(credentials(3600)));
    }

    #[test]
    fn test_authenticated_local_ignores_expiry() {
        let store = MemoryStore::new();
        let session = SessionStore::new(store.clone());
        assert!(!session.is_authenticated_local());

        // Long expired, still "authenticated" locally
        session
            .save(&SessionCredentials {
                access_token: "a".to_string(),
                id_token: "i".to_string(),
                expires_at: 1,
            })
            .unwrap();
        assert!(session.is_authenticated_local());

        store.remove(keys::EXPIRES_AT).unwrap();
        assert!(!session.is_authenticated_local());
    }

    #[test]
    fn test_authenticated_local_needs_access_token() {
        let store = MemoryStore::new();
        let session = SessionStore::new(store.clone());
        store.set(keys::EXPIRES_AT, "123").unwrap();
        assert!(!session.is_authenticated_local());
    }

    #[test]
    fn test_is_token_expired_at_time() {
        let session = SessionStore::new(MemoryStore::new());
        session.save(&credentials(3600)).unwrap();
        let expires_at = NOW + 3_600_000;

        assert!(!session.is_token_expired_at_time(expires_at - 1, 0));
        assert!(session.is_token_expired_at_time(expires_at, 0));
        // Within the one-minute buffer
        assert!(session.is_token_expired_at_time(expires_at - 60_000, 1));
        assert!(!session.is_token_expired_at_time(expires_at - 60_001, 1));
    }

    #[test]
    fn test_missing_expiry_counts_as_expired() {
        let store = MemoryStore::new();
        let session = SessionStore::new(store.clone());
        assert!(session.is_token_expired_at_time(NOW, 0));

        store.set(keys::EXPIRES_AT, "not-a-number").unwrap();
        assert!(session.expires_at().is_none());
        assert!(session.is_token_expired_at_time(NOW, 0));
    }

    #[test]
    fn test_logout_removes_exactly_four_keys() {
        let local = MemoryStore::new();
        let session_storage = MemoryStore::new();
        SessionStore::new(local.clone())
            .save(&credentials(3600))
            .unwrap();
        local.set(keys::USER, r#"{"id":"1"}"#).unwrap();
        local.set(keys::DEVICE_ID, "device").unwrap();
        local.set(keys::LOCATION_INFO, "{}").unwrap();
        session_storage.set("draft", "text").unwrap();

        logout(&local, &session_storage).unwrap();

        for key in LOGOUT_KEYS {
            assert!(local.get(key).unwrap().is_none(), "{key} should be removed");
        }
        assert_eq!(local.get(keys::DEVICE_ID).unwrap().as_deref(), Some("device"));
        assert_eq!(local.get(keys::LOCATION_INFO).unwrap().as_deref(), Some("{}"));
        assert!(session_storage.is_empty());
    }
}
