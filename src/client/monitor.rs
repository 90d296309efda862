//! Page-lifetime session monitors.
//!
//! [`TokenMonitor`] keeps `is_logged_in` in step with `localStorage` and
//! renews tokens shortly before they expire. [`UserProfileMonitor`] keeps the
//! cached profile fresh and mirrors it into the [`AuthStore`]. Both share the
//! network work between tabs with an [`AdvisoryLock`], and neither ever fails
//! the page: errors are logged and the cycle is skipped.
//!
//! The monitors are driven from the outside: call `tick()` from a timer,
//! and forward route changes, storage events and trigger flips as they happen.

use crate::UserProfile;
use crate::client::auth_store::AuthStore;
use crate::client::clock::{Clock, SystemClock};
use crate::client::http_client::{ApiError, BackendApi};
use crate::client::lock::AdvisoryLock;
use crate::client::profile_cache::ProfileCache;
use crate::client::provider::{AuthorizeOptions, IdentityProvider, ProviderError, ProviderErrorKind};
use crate::client::storage::{KeyValueStore, StorageEvent, keys};
use crate::client::token_storage::{SessionCredentials, SessionStore};
use crate::config::SessionTimings;

/// Interval bookkeeping for a periodic job. A fresh schedule is due at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    interval_ms: u64,
    last_run: Option<u64>,
}

impl Schedule {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_run: None,
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        self.last_run
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_run = Some(now_ms);
    }

    /// Milliseconds until the job is due again.
    pub fn remaining(&self, now_ms: u64) -> u64 {
        match self.last_run {
            Some(last) => (last + self.interval_ms).saturating_sub(now_ms),
            None => 0,
        }
    }
}

/// What a remote token check did.
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshOutcome {
    NotAuthenticated,
    /// The token is not close to expiry yet.
    NotDue,
    /// Another tab is refreshing.
    LockHeld,
    Refreshed,
    /// The provider session is gone; the local session was cleared.
    LoggedOut,
    Failed(ProviderError),
    /// Storage was unusable; try again next cycle.
    Skipped,
}

/// Keeps the access token alive and `is_logged_in` accurate.
pub struct TokenMonitor<P, S, C = SystemClock> {
    provider: P,
    session: SessionStore<S>,
    lock: AdvisoryLock<S>,
    store: AuthStore,
    clock: C,
    timings: SessionTimings,
    local: Schedule,
    remote: Schedule,
    ignore_storage_until: Option<u64>,
}

impl<P, S, C> TokenMonitor<P, S, C>
where
    P: IdentityProvider,
    S: KeyValueStore + Clone,
    C: Clock,
{
    pub fn new(provider: P, storage: S, store: AuthStore, clock: C, timings: SessionTimings) -> Self {
        Self {
            provider,
            session: SessionStore::new(storage.clone()),
            lock: AdvisoryLock::auth_update(storage).with_duration(timings.lock_duration_ms),
            store,
            clock,
            local: Schedule::new(timings.local_check_interval_ms),
            remote: Schedule::new(timings.remote_check_interval_ms),
            timings,
            ignore_storage_until: None,
        }
    }

    /// Pushes the local presence check into the store.
    pub fn check_local(&self) -> bool {
        let authenticated = self.session.is_authenticated_local();
        self.store.set_logged_in(authenticated);
        authenticated
    }

    /// Refreshes the token through a silent session check if it is about to expire.
    pub async fn check_remote(&mut self) -> RefreshOutcome {
        let now = self.clock.now_ms();
        self.remote.mark(now);

        if !self.session.is_authenticated_local() {
            return RefreshOutcome::NotAuthenticated;
        }
        if !self
            .session
            .is_token_expired_at_time(now, self.timings.expiry_buffer_minutes)
        {
            return RefreshOutcome::NotDue;
        }

        match self.lock.try_acquire(now) {
            Ok(true) => {}
            Ok(false) => return RefreshOutcome::LockHeld,
            Err(e) => {
                tracing::warn!("Token refresh skipped, lock unavailable: {}", e);
                return RefreshOutcome::Skipped;
            }
        }

        tracing::trace!("Token close to expiry, running silent session check");
        let outcome = match self.provider.check_session(&AuthorizeOptions::silent()).await {
            Ok(tokens) => self.store_refreshed(tokens.credentials(self.clock.now_ms())),
            Err(e) if e.kind() == ProviderErrorKind::LoginRequired => {
                tracing::warn!("Provider session ended, logging out: {}", e);
                if let Err(e) = self.session.clear() {
                    tracing::error!("Failed to clear expired session: {}", e);
                }
                self.store.reset();
                RefreshOutcome::LoggedOut
            }
            Err(e) => {
                tracing::warn!("Silent token refresh failed: {}", e);
                RefreshOutcome::Failed(e)
            }
        };

        if let Err(e) = self.lock.release() {
            tracing::warn!("Failed to release token lock: {}", e);
        }
        outcome
    }

    fn store_refreshed(
        &mut self,
        credentials: Option<SessionCredentials>,
    ) -> RefreshOutcome {
        let Some(credentials) = credentials else {
            return RefreshOutcome::Failed(ProviderError::new(
                "invalid_response",
                "Session check returned no access token",
            ));
        };

        // Our own writes must not bounce back through the storage listener
        self.ignore_storage_until =
            Some(self.clock.now_ms() + self.timings.ignore_storage_events_ms);

        match self.session.save(&credentials) {
            Ok(()) => {
                self.store.set_logged_in(true);
                tracing::trace!("Token refreshed until {}", credentials.expires_at);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                tracing::error!("Failed to store refreshed token: {}", e);
                RefreshOutcome::Skipped
            }
        }
    }

    /// Runs whatever is due. Returns the remote outcome if a remote check ran.
    pub async fn tick(&mut self) -> Option<RefreshOutcome> {
        let now = self.clock.now_ms();
        if self.local.due(now) {
            self.local.mark(now);
            self.check_local();
        }
        if self.remote.due(now) {
            return Some(self.check_remote().await);
        }
        None
    }

    pub async fn on_route_change(&mut self) -> RefreshOutcome {
        self.check_remote().await
    }

    pub fn is_ignoring_storage_events(&self) -> bool {
        self.ignore_storage_until
            .is_some_and(|until| self.clock.now_ms() < until)
    }

    /// Re-runs the local check when another tab changed the session keys.
    /// Returns true if the event was acted on.
    pub fn on_storage_event(&self, event: &StorageEvent) -> bool {
        if self.is_ignoring_storage_events() {
            tracing::trace!("Ignoring storage event during refresh: {:?}", event.key);
            return false;
        }
        if event.touches(keys::ACCESS_TOKEN) || event.touches(keys::EXPIRES_AT) {
            self.check_local();
            return true;
        }
        false
    }

    /// Milliseconds until the next `tick` has work to do.
    pub fn next_tick_in(&self) -> u64 {
        let now = self.clock.now_ms();
        self.local.remaining(now).min(self.remote.remaining(now))
    }
}

/// What a profile refresh did.
#[derive(Clone, Debug, PartialEq)]
pub enum ProfileRefresh {
    NotAuthenticated,
    LockHeld,
    Updated(UserProfile),
    Failed(ApiError),
    Skipped,
}

/// Keeps the cached profile and the store's `user_profile` fresh.
pub struct UserProfileMonitor<B, S, C = SystemClock> {
    backend: B,
    session: SessionStore<S>,
    cache: ProfileCache<S>,
    lock: AdvisoryLock<S>,
    store: AuthStore,
    clock: C,
    schedule: Schedule,
    last_trigger: bool,
}

impl<B, S, C> UserProfileMonitor<B, S, C>
where
    B: BackendApi,
    S: KeyValueStore + Clone,
    C: Clock,
{
    pub fn new(backend: B, storage: S, store: AuthStore, clock: C, timings: SessionTimings) -> Self {
        let last_trigger = store.profile_trigger();
        Self {
            backend,
            session: SessionStore::new(storage.clone()),
            cache: ProfileCache::new(storage.clone()),
            lock: AdvisoryLock::profile_update(storage).with_duration(timings.lock_duration_ms),
            store,
            clock,
            schedule: Schedule::new(timings.profile_refresh_interval_ms),
            last_trigger,
        }
    }

    /// Publishes the cached profile, then fetches a fresh one.
    pub async fn mount(&mut self) -> ProfileRefresh {
        self.reload_from_cache();
        self.refresh().await
    }

    /// Fetches the profile and overwrites the cache with it.
    pub async fn refresh(&mut self) -> ProfileRefresh {
        let now = self.clock.now_ms();
        self.schedule.mark(now);

        if !self.session.is_authenticated_local() {
            return ProfileRefresh::NotAuthenticated;
        }
        match self.lock.try_acquire(now) {
            Ok(true) => {}
            Ok(false) => return ProfileRefresh::LockHeld,
            Err(e) => {
                tracing::warn!("Profile refresh skipped, lock unavailable: {}", e);
                return ProfileRefresh::Skipped;
            }
        }

        let outcome = match self.backend.fetch_profile().await {
            Ok(profile) => match self.cache.write(&profile) {
                Ok(()) => {
                    self.store.set_user_profile(Some(profile.clone()));
                    ProfileRefresh::Updated(profile)
                }
                Err(e) => {
                    tracing::error!("Failed to cache profile: {}", e);
                    ProfileRefresh::Skipped
                }
            },
            Err(e) => {
                tracing::warn!("Profile refresh failed: {}", e);
                ProfileRefresh::Failed(e)
            }
        };

        if let Err(e) = self.lock.release() {
            tracing::warn!("Failed to release profile lock: {}", e);
        }
        outcome
    }

    pub async fn tick(&mut self) -> Option<ProfileRefresh> {
        if self.schedule.due(self.clock.now_ms()) {
            Some(self.refresh().await)
        } else {
            None
        }
    }

    /// Copies the cached profile into the store.
    pub fn reload_from_cache(&self) {
        self.store.set_user_profile(self.cache.read());
    }

    /// Another tab wrote the `user` key.
    pub fn on_storage_event(&self, event: &StorageEvent) -> bool {
        if event.touches(keys::USER) {
            tracing::trace!("Profile changed in another tab");
            self.reload_from_cache();
            return true;
        }
        false
    }

    /// Same-tab notification: a component flipped the storage trigger.
    pub fn on_trigger_changed(&mut self, trigger: bool) -> bool {
        if trigger == self.last_trigger {
            return false;
        }
        self.last_trigger = trigger;
        self.reload_from_cache();
        true
    }

    pub fn next_tick_in(&self) -> u64 {
        self.schedule.remaining(self.clock.now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::authorization::TokenFragment;
    use crate::client::clock::ManualClock;
    use crate::client::interactions::tests::ScriptedBackend;
    use crate::client::provider::SignupRequest;
    use crate::client::storage::MemoryStore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const NOW: u64 = 1_700_000_000_000;

    /// Provider whose session check blocks until released.
    #[derive(Default)]
    struct GatedProvider {
        calls: AtomicUsize,
        gate: Notify,
        answer: std::sync::Mutex<Option<Result<TokenFragment, ProviderError>>>,
    }

    impl GatedProvider {
        fn answering(answer: Result<TokenFragment, ProviderError>) -> Arc<Self> {
            let provider = Self::default();
            *provider.answer.lock().unwrap() = Some(answer);
            Arc::new(provider)
        }

        fn open(&self) {
            self.gate.notify_one();
        }
    }

    impl IdentityProvider for GatedProvider {
        async fn popup_authorize(
            &self,
            _options: &AuthorizeOptions,
        ) -> Result<TokenFragment, ProviderError> {
            Err(ProviderError::unsupported("popup"))
        }

        async fn popup_login_with_credentials(
            &self,
            _username: &str,
            _password: &str,
        ) -> Result<TokenFragment, ProviderError> {
            Err(ProviderError::unsupported("credentials"))
        }

        async fn check_session(
            &self,
            _options: &AuthorizeOptions,
        ) -> Result<TokenFragment, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.answer
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ProviderError::new("unscripted", "")))
        }

        async fn signup(&self, _request: &SignupRequest) -> Result<(), ProviderError> {
            Ok(())
        }

        fn authorize_redirect(&self, _options: &AuthorizeOptions) -> Result<(), ProviderError> {
            Ok(())
        }

        fn logout_url(&self, return_to: &str) -> String {
            return_to.to_string()
        }
    }

    fn fresh_tokens() -> TokenFragment {
        TokenFragment {
            access_token: Some("fresh".to_string()),
            id_token: Some("id".to_string()),
            expires_in: Some(7200),
            ..TokenFragment::default()
        }
    }

    /// Stores a token expiring `expires_in_ms` after NOW.
    fn seed_session(storage: &MemoryStore, expires_in_ms: u64) {
        SessionStore::new(storage.clone())
            .save(&SessionCredentials {
                access_token: "old".to_string(),
                id_token: "id".to_string(),
                expires_at: NOW + expires_in_ms,
            })
            .unwrap();
    }

    fn token_monitor(
        provider: Arc<GatedProvider>,
        storage: MemoryStore,
        clock: &ManualClock,
    ) -> TokenMonitor<Arc<GatedProvider>, MemoryStore, ManualClock> {
        TokenMonitor::new(
            provider,
            storage,
            AuthStore::new(),
            clock.clone(),
            SessionTimings::default(),
        )
    }

    #[test]
    fn test_schedule() {
        let mut schedule = Schedule::new(60_000);
        assert!(schedule.due(NOW));
        schedule.mark(NOW);
        assert!(!schedule.due(NOW + 59_999));
        assert_eq!(schedule.remaining(NOW + 59_000), 1_000);
        assert!(schedule.due(NOW + 60_000));
    }

    #[test]
    fn test_check_local_is_presence_only() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        let monitor = token_monitor(Arc::default(), storage.clone(), &clock);

        assert!(!monitor.check_local());

        // Already expired, still "authenticated" locally
        seed_session(&storage, 0);
        clock.advance(10_000);
        assert!(monitor.check_local());
        assert!(monitor.store.is_logged_in());
    }

    #[tokio::test]
    async fn test_remote_check_not_due() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 3_600_000);
        let provider = GatedProvider::answering(Ok(fresh_tokens()));
        let mut monitor = token_monitor(Arc::clone(&provider), storage, &clock);

        assert_eq!(monitor.check_remote().await, RefreshOutcome::NotDue);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_check_without_session() {
        let clock = ManualClock::new(NOW);
        let mut monitor = token_monitor(Arc::default(), MemoryStore::new(), &clock);
        assert_eq!(monitor.check_remote().await, RefreshOutcome::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_refresh_within_expiry_buffer() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 30_000);
        let provider = GatedProvider::answering(Ok(fresh_tokens()));
        provider.open();
        let mut monitor = token_monitor(Arc::clone(&provider), storage.clone(), &clock);

        assert_eq!(monitor.check_remote().await, RefreshOutcome::Refreshed);
        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("fresh"));
        assert_eq!(
            SessionStore::new(storage.clone()).expires_at(),
            Some(NOW + 7_200_000)
        );
        assert!(storage.get(keys::AUTH_UPDATE_LOCK).unwrap().is_none());
        assert!(monitor.store.is_logged_in());

        // Own writes are ignored for 500 ms
        let event = StorageEvent::new(Some(keys::ACCESS_TOKEN.to_string()), None);
        assert!(monitor.is_ignoring_storage_events());
        assert!(!monitor.on_storage_event(&event));
        clock.advance(500);
        assert!(monitor.on_storage_event(&event));
    }

    #[tokio::test]
    async fn test_two_tabs_refresh_once() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.open_tab();
        let clock = ManualClock::new(NOW);
        seed_session(&tab_a, 10_000);

        let provider = GatedProvider::answering(Ok(fresh_tokens()));
        let mut monitor_a = token_monitor(Arc::clone(&provider), tab_a.clone(), &clock);
        let mut monitor_b = token_monitor(Arc::clone(&provider), tab_b, &clock);

        let (a, b) = tokio::join!(monitor_a.check_remote(), async {
            // Tab A holds the lock and waits on the network
            let outcome = monitor_b.check_remote().await;
            provider.open();
            outcome
        });

        assert_eq!(a, RefreshOutcome::Refreshed);
        assert_eq!(b, RefreshOutcome::LockHeld);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tab_a.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 10_000);
        storage
            .set(keys::AUTH_UPDATE_LOCK, &(NOW - 30_000).to_string())
            .unwrap();

        let provider = GatedProvider::answering(Ok(fresh_tokens()));
        provider.open();
        let mut monitor = token_monitor(Arc::clone(&provider), storage, &clock);
        assert_eq!(monitor.check_remote().await, RefreshOutcome::Refreshed);
    }

    #[tokio::test]
    async fn test_login_required_logs_out() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 10_000);
        let provider = GatedProvider::answering(Err(ProviderError::new("login_required", "")));
        provider.open();
        let mut monitor = token_monitor(Arc::clone(&provider), storage.clone(), &clock);
        monitor.store.set_logged_in(true);

        assert_eq!(monitor.check_remote().await, RefreshOutcome::LoggedOut);
        assert!(!monitor.store.is_logged_in());
        assert!(storage.get(keys::ACCESS_TOKEN).unwrap().is_none());
        assert!(storage.get(keys::AUTH_UPDATE_LOCK).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_failures_skip_cycle() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 10_000);
        let provider = GatedProvider::answering(Err(ProviderError::timeout("checkSession")));
        provider.open();
        let mut monitor = token_monitor(Arc::clone(&provider), storage.clone(), &clock);

        assert!(matches!(monitor.check_remote().await, RefreshOutcome::Failed(_)));
        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("old"));
        assert!(storage.get(keys::AUTH_UPDATE_LOCK).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tick_runs_due_jobs() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 3_600_000 * 2);
        let mut monitor = token_monitor(Arc::default(), storage, &clock);

        assert_eq!(monitor.tick().await, Some(RefreshOutcome::NotDue));
        assert!(monitor.store.is_logged_in());
        assert_eq!(monitor.tick().await, None);
        assert_eq!(monitor.next_tick_in(), 60_000);

        clock.advance(60_000);
        assert_eq!(monitor.tick().await, None);
        assert_eq!(monitor.next_tick_in(), 60_000);
    }

    fn profile_monitor(
        backend: ScriptedBackend,
        storage: MemoryStore,
        clock: &ManualClock,
    ) -> UserProfileMonitor<ScriptedBackend, MemoryStore, ManualClock> {
        UserProfileMonitor::new(
            backend,
            storage,
            AuthStore::new(),
            clock.clone(),
            SessionTimings::default(),
        )
    }

    #[tokio::test]
    async fn test_profile_refresh_overwrites_cache() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 3_600_000);

        let mut cached = UserProfile::new("42");
        cached.bio = Some("old bio".to_string());
        ProfileCache::new(storage.clone()).write(&cached).unwrap();

        let backend = ScriptedBackend::default();
        let mut remote = UserProfile::new("42");
        remote.name = Some("Ada".to_string());
        backend.profiles.lock().unwrap().push_back(Ok(remote.clone()));

        let mut monitor = profile_monitor(backend, storage.clone(), &clock);
        assert_eq!(monitor.mount().await, ProfileRefresh::Updated(remote.clone()));
        assert_eq!(ProfileCache::new(storage.clone()).read(), Some(remote.clone()));
        assert_eq!(monitor.store.user_profile(), Some(remote));
        assert!(storage.get(keys::PROFILE_UPDATE_LOCK).unwrap().is_none());
        assert_eq!(monitor.tick().await, None);
    }

    #[tokio::test]
    async fn test_profile_refresh_requires_session_and_lock() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        let mut monitor = profile_monitor(ScriptedBackend::default(), storage.clone(), &clock);
        assert_eq!(monitor.refresh().await, ProfileRefresh::NotAuthenticated);

        seed_session(&storage, 3_600_000);
        storage
            .set(keys::PROFILE_UPDATE_LOCK, &(NOW - 1_000).to_string())
            .unwrap();
        assert_eq!(monitor.refresh().await, ProfileRefresh::LockHeld);
        assert!(monitor.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_profile_refresh_failure_keeps_cache() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        seed_session(&storage, 3_600_000);
        let cached = UserProfile::new("42");
        ProfileCache::new(storage.clone()).write(&cached).unwrap();

        let backend = ScriptedBackend::default();
        backend
            .profiles
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Transport("offline".to_string())));
        let mut monitor = profile_monitor(backend, storage.clone(), &clock);

        assert!(matches!(monitor.refresh().await, ProfileRefresh::Failed(_)));
        assert_eq!(ProfileCache::new(storage).read(), Some(cached));
    }

    #[test]
    fn test_profile_events_reload_cache() {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        let mut monitor = profile_monitor(ScriptedBackend::default(), storage.clone(), &clock);

        let profile = UserProfile::new("7");
        ProfileCache::new(storage.clone()).write(&profile).unwrap();

        let unrelated = StorageEvent::new(Some(keys::ACCESS_TOKEN.to_string()), None);
        assert!(!monitor.on_storage_event(&unrelated));
        assert_eq!(monitor.store.user_profile(), None);

        let user = StorageEvent::new(Some(keys::USER.to_string()), None);
        assert!(monitor.on_storage_event(&user));
        assert_eq!(monitor.store.user_profile(), Some(profile.clone()));

        // Same-tab path goes through the trigger
        let updated = UserProfile::new("8");
        ProfileCache::new(storage).write(&updated).unwrap();
        assert!(!monitor.on_trigger_changed(false));
        assert!(monitor.on_trigger_changed(true));
        assert_eq!(monitor.store.user_profile(), Some(updated));
    }

    #[tokio::test]
    async fn test_cross_tab_profile_write_is_seen() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.open_tab();
        let clock = ManualClock::new(NOW);
        let monitor_b = profile_monitor(ScriptedBackend::default(), tab_b.clone(), &clock);
        let mut events = tab_b.subscribe();

        ProfileCache::new(tab_a).write(&UserProfile::new("99")).unwrap();

        let event = events.next().await.unwrap();
        assert!(monitor_b.on_storage_event(&event));
        assert_eq!(monitor_b.store.user_profile().map(|p| p.id), Some("99".to_string()));
    }
}
