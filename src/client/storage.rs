//! Flat key-value storage shared between browser tabs.
//!
//! Every piece of persisted session state (tokens, cached profile, advisory
//! locks, device id) lives in a string-keyed store with last-writer-wins
//! semantics. In the browser that store is `localStorage` (or
//! `sessionStorage`); natively and in tests it is a [`MemoryStore`], whose
//! handles behave like tabs sharing one origin: a write made through one
//! handle raises a [`StorageEvent`] on every *other* handle, never on the
//! writer's own.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// `localStorage` keys used by the session layer.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const ID_TOKEN: &str = "idToken";
    pub const EXPIRES_AT: &str = "expiresAt";
    pub const USER: &str = "user";
    pub const AUTH_UPDATE_LOCK: &str = "auth_update_in_progress";
    pub const PROFILE_UPDATE_LOCK: &str = "user_profile_update_in_progress";
    pub const DEVICE_ID: &str = "firebase_device_id";
    pub const LOCATION_INFO: &str = "user_location_info";
    pub const LOCATION_TIME: &str = "user_location_time";
}

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The storage backend is missing (no window, storage disabled, ...)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A write or removal was rejected (quota, privacy mode, ...)
    #[error("Storage write for '{key}' failed: {reason}")]
    Write { key: String, reason: String },

    /// A stored value could not be (de)serialized
    #[error("Storage value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A string key-value store with `localStorage` semantics.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;

    /// Reads and deserializes a JSON value.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serializes a value to JSON and stores it.
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

/// Change notification delivered to the tabs that did not perform the write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed key, or `None` when the whole store was cleared.
    pub key: Option<String>,
    /// Value after the change, `None` for removals.
    pub new_value: Option<String>,
    source_tab: u64,
}

impl StorageEvent {
    pub fn new(key: Option<String>, new_value: Option<String>) -> Self {
        Self {
            key,
            new_value,
            source_tab: 0,
        }
    }

    /// True if the event concerns `key` (a clear concerns every key).
    pub fn touches(&self, key: &str) -> bool {
        self.key.as_deref().is_none_or(|k| k == key)
    }
}

/// In-memory store whose clones share data; [`MemoryStore::open_tab`] hands
/// out a handle with its own tab identity.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, String>>>,
    events: broadcast::Sender<StorageEvent>,
    next_tab: Arc<AtomicU64>,
    tab_id: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_tab: Arc::new(AtomicU64::new(2)),
            tab_id: 1,
        }
    }

    /// Returns a handle onto the same data acting as a different tab.
    pub fn open_tab(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            events: self.events.clone(),
            next_tab: Arc::clone(&self.next_tab),
            tab_id: self.next_tab.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Subscribes to writes made by other tabs.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            rx: self.events.subscribe(),
            tab_id: self.tab_id,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_data<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> R,
    ) -> Result<R, StorageError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        Ok(f(&mut data))
    }

    fn publish(&self, key: Option<&str>, new_value: Option<&str>) {
        // No subscribers is fine
        let _ = self.events.send(StorageEvent {
            key: key.map(str::to_string),
            new_value: new_value.map(str::to_string),
            source_tab: self.tab_id,
        });
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_data(|d| d.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_data(|d| d.insert(key.to_string(), value.to_string()))?;
        self.publish(Some(key), Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.with_data(|d| d.remove(key))?.is_some() {
            self.publish(Some(key), None);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.with_data(HashMap::clear)?;
        self.publish(None, None);
        Ok(())
    }
}

/// Storage events as seen by one tab.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    tab_id: u64,
}

impl StorageEvents {
    /// Returns the next pending event from another tab without waiting.
    pub fn try_next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.source_tab == self.tab_id => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} storage events", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Waits for the next event from another tab.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.source_tab == self.tab_id => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} storage events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// `localStorage` / `sessionStorage` of the current window.
#[cfg(target_arch = "wasm32")]
#[derive(Clone)]
pub struct BrowserStorage {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl BrowserStorage {
    /// The window's `localStorage`.
    pub fn local() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window".to_string()))?;
        let storage = window
            .local_storage()
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage disabled".to_string()))?;
        Ok(Self { storage })
    }

    /// The window's `sessionStorage`.
    pub fn session() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window".to_string()))?;
        let storage = window
            .session_storage()
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("sessionStorage disabled".to_string()))?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for BrowserStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage
            .set_item(key, value)
            .map_err(|e| StorageError::Write {
                key: key.to_string(),
                reason: format!("{:?}", e),
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Write {
                key: key.to_string(),
                reason: format!("{:?}", e),
            })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear().map_err(|e| StorageError::Write {
            key: "*".to_string(),
            reason: format!("{:?}", e),
        })
    }
}

/// The store an application runs on: browser storage when the browser
/// allows it, otherwise a page-lifetime [`MemoryStore`].
#[derive(Clone)]
pub enum AppStorage {
    #[cfg(target_arch = "wasm32")]
    Browser(BrowserStorage),
    Memory(MemoryStore),
}

impl AppStorage {
    /// `localStorage`, falling back to memory.
    pub fn local() -> Self {
        #[cfg(target_arch = "wasm32")]
        match BrowserStorage::local() {
            Ok(storage) => return AppStorage::Browser(storage),
            Err(e) => tracing::warn!("localStorage unavailable, session will not persist: {}", e),
        }
        AppStorage::Memory(MemoryStore::new())
    }

    /// `sessionStorage`, falling back to memory.
    pub fn session() -> Self {
        #[cfg(target_arch = "wasm32")]
        match BrowserStorage::session() {
            Ok(storage) => return AppStorage::Browser(storage),
            Err(e) => tracing::warn!("sessionStorage unavailable: {}", e),
        }
        AppStorage::Memory(MemoryStore::new())
    }
}

impl KeyValueStore for AppStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self {
            #[cfg(target_arch = "wasm32")]
            AppStorage::Browser(storage) => storage.get(key),
            AppStorage::Memory(storage) => storage.get(key),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        match self {
            #[cfg(target_arch = "wasm32")]
            AppStorage::Browser(storage) => storage.set(key, value),
            AppStorage::Memory(storage) => storage.set(key, value),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self {
            #[cfg(target_arch = "wasm32")]
            AppStorage::Browser(storage) => storage.remove(key),
            AppStorage::Memory(storage) => storage.remove(key),
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        match self {
            #[cfg(target_arch = "wasm32")]
            AppStorage::Browser(storage) => storage.clear(),
            AppStorage::Memory(storage) => storage.clear(),
        }
    }
}

/// Registration of a window `storage` listener; removed on drop.
#[cfg(target_arch = "wasm32")]
pub struct StorageListener {
    closure: wasm_bindgen::closure::Closure<dyn FnMut(web_sys::StorageEvent)>,
}

#[cfg(target_arch = "wasm32")]
impl StorageListener {
    /// Calls `handler` for every `storage` event raised by other tabs.
    pub fn register(
        mut handler: impl FnMut(StorageEvent) + 'static,
    ) -> Result<Self, StorageError> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen::closure::Closure;

        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window".to_string()))?;
        let closure = Closure::<dyn FnMut(web_sys::StorageEvent)>::new(
            move |event: web_sys::StorageEvent| {
                handler(StorageEvent::new(event.key(), event.new_value()));
            },
        );
        window
            .add_event_listener_with_callback("storage", closure.as_ref().unchecked_ref())
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?;
        Ok(Self { closure })
    }
}

#[cfg(target_arch = "wasm32")]
impl Drop for StorageListener {
    fn drop(&mut self) {
        use wasm_bindgen::JsCast;

        if let Some(window) = web_sys::window() {
            let _ = window.remove_event_listener_with_callback(
                "storage",
                self.closure.as_ref().unchecked_ref(),
            );
        }
    }
}
