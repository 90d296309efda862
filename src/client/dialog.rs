//! Login dialog state machine.
//!
//! ```text
//! Idle ──begin_popup──▶ PopupOpen ──tokens──▶ Processing ──▶ Success
//!  │                      │    ▲                   │
//!  │                      │    └─ channel blocked  └──────▶ Error ──retry──▶ Idle
//!  └──── redirect callback ─────────▶ Processing
//! ```
//!
//! Popup errors are held back for the error grace period (30 s by default)
//! before the dialog shows them, so a slow popup does not flash an error that
//! a late success would have cleared. Errors that mean "the browser blocked
//! the channel" never reach the list: they switch email logins to Universal
//! Login and ask the user to click again.
//!
//! Once tokens arrive the dialog runs the post-auth sequence in order: save
//! credentials, sync the backend user, fetch the profile, merge it into the
//! cache, then publish to the [`AuthStore`]. A failure aborts the remaining
//! steps but keeps whatever was already written.

use crate::UserProfile;
use crate::client::auth_store::AuthStore;
use crate::client::authorization::{AuthorizationResponse, TokenFragment};
use crate::client::clock::{Clock, SystemClock};
use crate::client::http_client::{ApiError, BackendApi};
use crate::client::interactions::Toasts;
use crate::client::login::{LoginClient, LoginOutcome, SilentAuthSupport};
use crate::client::profile_cache::ProfileCache;
use crate::client::provider::{IdentityProvider, ProviderError, ProviderErrorKind};
use crate::client::storage::{KeyValueStore, StorageError};
use crate::client::token_storage::SessionStore;
use crate::config::SessionTimings;

/// Shown when the browser blocks the popup channel.
pub const CLICK_AGAIN_NOTICE: &str =
    "Your browser blocked the sign-in window. Please click the button again.";

/// Shown on `visibilitychange` while an authentication is in flight.
pub const LEAVE_WARNING: &str =
    "Sign-in is in progress. Please don't close or leave this page until it completes.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiState {
    Idle,
    PopupOpen,
    Processing,
    Success,
    Error,
}

/// How the email form should sign in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailFlow {
    /// Inline credentials form.
    Inline,
    /// Universal Login in a popup.
    UniversalPopup,
}

#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    #[error("Invalid dialog transition from {from:?} to {to:?}")]
    InvalidTransition { from: UiState, to: UiState },

    #[error("Authorization response has no access token")]
    MissingToken,

    #[error("Failed to save session: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to sync user: {0}")]
    Sync(ApiError),

    #[error("user profile not found")]
    ProfileNotFound,

    #[error("Failed to load user profile: {0}")]
    Profile(ApiError),

    #[error("{}", .0.user_message())]
    Provider(ProviderError),
}

impl DialogError {
    /// Backend failures are also announced with a toast.
    fn is_backend(&self) -> bool {
        matches!(
            self,
            DialogError::Sync(_) | DialogError::ProfileNotFound | DialogError::Profile(_)
        )
    }
}

/// The login dialog and its collaborators.
pub struct LoginDialog<P, B, S, C = SystemClock> {
    login: LoginClient<P>,
    backend: B,
    session: SessionStore<S>,
    cache: ProfileCache<S>,
    store: AuthStore,
    toasts: Toasts,
    clock: C,
    timings: SessionTimings,

    state: UiState,
    errors: Vec<String>,
    pending_errors: Vec<String>,
    popup_started_at: Option<u64>,
    force_universal_for_email: bool,
    notice: Option<String>,
}

impl<P, B, S, C> LoginDialog<P, B, S, C>
where
    P: IdentityProvider,
    B: BackendApi,
    S: KeyValueStore + Clone,
    C: Clock,
{
    pub fn new(
        login: LoginClient<P>,
        backend: B,
        storage: S,
        store: AuthStore,
        toasts: Toasts,
        clock: C,
        timings: SessionTimings,
    ) -> Self {
        Self {
            login,
            backend,
            session: SessionStore::new(storage.clone()),
            cache: ProfileCache::new(storage),
            store,
            toasts,
            clock,
            timings,
            state: UiState::Idle,
            errors: Vec::new(),
            pending_errors: Vec::new(),
            popup_started_at: None,
            force_universal_for_email: false,
            notice: None,
        }
    }

    pub fn state(&self) -> UiState {
        self.state
    }

    /// Errors currently shown in the error panel.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Popup errors still inside the grace period.
    pub fn pending_errors(&self) -> &[String] {
        &self.pending_errors
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn force_universal_for_email(&self) -> bool {
        self.force_universal_for_email
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    fn transition(&mut self, to: UiState) -> Result<(), DialogError> {
        use UiState::*;

        let allowed = matches!(
            (self.state, to),
            (Idle, PopupOpen)
                | (PopupOpen, PopupOpen)
                | (Idle, Processing)
                | (PopupOpen, Processing)
                | (PopupOpen, Idle)
                | (PopupOpen, Error)
                | (Processing, Success)
                | (Processing, Error)
                | (Error, Idle)
        );
        if !allowed {
            return Err(DialogError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!("Login dialog {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Opens the dialog fresh. The `force_universal_for_email` decision
    /// survives only while the dialog stays open.
    pub fn open(&mut self) {
        self.state = UiState::Idle;
        self.errors.clear();
        self.pending_errors.clear();
        self.popup_started_at = None;
        self.notice = None;
        self.store.set_login_dialog_open(true);
    }

    pub fn close(&mut self) {
        self.force_universal_for_email = false;
        self.store.set_login_dialog_open(false);
    }

    /// A popup-based login was launched.
    pub fn begin_popup(&mut self, now_ms: u64) -> Result<(), DialogError> {
        self.transition(UiState::PopupOpen)?;
        self.popup_started_at = Some(now_ms);
        self.pending_errors.clear();
        self.notice = None;
        Ok(())
    }

    /// A popup attempt failed.
    pub fn on_popup_error(&mut self, err: ProviderError, now_ms: u64) {
        if err.kind() == ProviderErrorKind::ChannelBlocked {
            tracing::warn!("Popup channel blocked, switching email to Universal Login: {}", err);
            self.force_universal_for_email = true;
            self.notice = Some(CLICK_AGAIN_NOTICE.to_string());
            self.pending_errors.clear();
            if self.state == UiState::PopupOpen {
                self.state = UiState::Idle;
            }
            return;
        }

        tracing::trace!("Holding popup error until grace period ends: {}", err);
        self.pending_errors.push(err.user_message());
        self.on_grace_elapsed(now_ms);
    }

    /// When the grace period has passed, shows held errors. Returns true if
    /// the dialog moved to `Error`.
    pub fn on_grace_elapsed(&mut self, now_ms: u64) -> bool {
        if self.state != UiState::PopupOpen || self.pending_errors.is_empty() {
            return false;
        }
        let Some(deadline) = self.grace_deadline() else {
            return false;
        };
        if now_ms < deadline {
            return false;
        }

        self.errors.append(&mut self.pending_errors);
        self.state = UiState::Error;
        true
    }

    /// When the held errors become visible.
    pub fn grace_deadline(&self) -> Option<u64> {
        self.popup_started_at
            .map(|started| started + self.timings.error_grace_ms)
    }

    /// True once a popup has been open for the whole grace period.
    pub fn show_extended_wait(&self, now_ms: u64) -> bool {
        self.state == UiState::PopupOpen
            && self.grace_deadline().is_some_and(|deadline| now_ms >= deadline)
    }

    pub fn retry(&mut self) -> Result<(), DialogError> {
        self.transition(UiState::Idle)?;
        self.errors.clear();
        self.pending_errors.clear();
        self.popup_started_at = None;
        Ok(())
    }

    /// Records the preflight result and picks the email flow.
    pub fn choose_email_flow(&mut self, support: SilentAuthSupport) -> EmailFlow {
        if support == SilentAuthSupport::Blocked {
            self.force_universal_for_email = true;
        }
        if self.force_universal_for_email {
            EmailFlow::UniversalPopup
        } else {
            EmailFlow::Inline
        }
    }

    /// `beforeunload` veto while a sequence is in flight.
    pub fn should_block_unload(&self) -> bool {
        matches!(self.state, UiState::PopupOpen | UiState::Processing)
    }

    /// Warning for `visibilitychange`, if leaving is unsafe right now.
    pub fn leave_warning(&self) -> Option<&'static str> {
        self.should_block_unload().then_some(LEAVE_WARNING)
    }

    fn fail(&mut self, err: DialogError) -> DialogError {
        tracing::error!("Authentication failed: {}", err);
        if err.is_backend() {
            self.toasts.error(err.to_string());
        }
        self.errors.push(err.to_string());
        self.state = UiState::Error;
        err
    }

    /// Runs the post-auth sequence for `tokens`.
    pub async fn complete_authentication(
        &mut self,
        tokens: TokenFragment,
    ) -> Result<UserProfile, DialogError> {
        self.transition(UiState::Processing)?;
        // A success clears anything held back
        self.pending_errors.clear();
        self.notice = None;

        match self.run_post_auth(&tokens).await {
            Ok(profile) => {
                self.store.set_user_profile(Some(profile.clone()));
                self.store.set_logged_in(true);
                self.store.toggle_profile_trigger();
                self.state = UiState::Success;
                self.close();
                tracing::trace!("Signed in as {}", profile.id);
                Ok(profile)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn run_post_auth(&self, tokens: &TokenFragment) -> Result<UserProfile, DialogError> {
        let credentials = tokens
            .credentials(self.clock.now_ms())
            .ok_or(DialogError::MissingToken)?;
        self.session.save(&credentials)?;

        self.backend.sync_user().await.map_err(DialogError::Sync)?;

        let remote = self.backend.fetch_profile().await.map_err(|e| {
            if e.is_not_found() {
                DialogError::ProfileNotFound
            } else {
                DialogError::Profile(e)
            }
        })?;

        Ok(self.cache.merge(remote)?)
    }

    /// Applies a login outcome.
    pub async fn handle_outcome(
        &mut self,
        outcome: LoginOutcome,
    ) -> Result<Option<UserProfile>, DialogError> {
        match outcome {
            LoginOutcome::Authenticated(tokens) => {
                self.complete_authentication(tokens).await.map(Some)
            }
            LoginOutcome::ChannelBlocked(err) | LoginOutcome::Failed(err) => {
                self.on_popup_error(err, self.clock.now_ms());
                Ok(None)
            }
        }
    }

    pub async fn sign_in_with_social(
        &mut self,
        connection: &str,
    ) -> Result<Option<UserProfile>, DialogError> {
        self.begin_popup(self.clock.now_ms())?;
        let outcome = self.login.login_with_social_popup(connection).await;
        self.handle_outcome(outcome).await
    }

    pub async fn sign_in_with_email(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserProfile>, DialogError> {
        self.begin_popup(self.clock.now_ms())?;
        let outcome = self
            .login
            .login_with_email(email, password, self.force_universal_for_email)
            .await;
        self.handle_outcome(outcome).await
    }

    pub async fn register(
        &mut self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<UserProfile>, DialogError> {
        self.begin_popup(self.clock.now_ms())?;
        let outcome = self
            .login
            .register(email, password, name, self.force_universal_for_email)
            .await;
        self.handle_outcome(outcome).await
    }

    /// Checks silent auth before offering the inline email form.
    pub async fn preflight(&mut self) -> EmailFlow {
        let support = self.login.preflight().await;
        self.choose_email_flow(support)
    }

    pub fn sign_in_with_redirect(&mut self, connection: Option<&str>) -> Result<(), DialogError> {
        self.login
            .login_with_redirect(connection)
            .map_err(DialogError::Provider)
    }

    /// Completes a redirect login from the `/auth/callback` hash.
    pub async fn handle_redirect_callback(
        &mut self,
        response: AuthorizationResponse,
    ) -> Result<UserProfile, DialogError> {
        match response.into_result() {
            Ok(tokens) => self.complete_authentication(tokens).await,
            Err(err) => {
                self.transition(UiState::Processing)?;
                Err(self.fail(DialogError::Provider(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::clock::ManualClock;
    use crate::client::interactions::tests::ScriptedBackend;
    use crate::client::login::tests::{ScriptedProvider, tokens};
    use crate::client::storage::{MemoryStore, keys};

    const NOW: u64 = 1_700_000_000_000;

    type TestDialog = LoginDialog<ScriptedProvider, ScriptedBackend, MemoryStore, ManualClock>;

    fn dialog_with(
        provider: ScriptedProvider,
        backend: ScriptedBackend,
    ) -> (TestDialog, MemoryStore, ManualClock) {
        let storage = MemoryStore::new();
        let clock = ManualClock::new(NOW);
        let dialog = LoginDialog::new(
            LoginClient::new(provider, SessionTimings::default()),
            backend,
            storage.clone(),
            AuthStore::new(),
            Toasts::new(),
            clock.clone(),
            SessionTimings::default(),
        );
        (dialog, storage, clock)
    }

    fn backend_with_profile(profile: Result<UserProfile, ApiError>) -> ScriptedBackend {
        let backend = ScriptedBackend::default();
        backend.profiles.lock().unwrap().push_back(profile);
        backend
    }

    fn abc_tokens() -> TokenFragment {
        TokenFragment {
            access_token: Some("abc".to_string()),
            expires_in: Some(3600),
            ..TokenFragment::default()
        }
    }

    #[tokio::test]
    async fn test_successful_popup_login() {
        let provider = ScriptedProvider::default();
        provider.popup.lock().unwrap().push_back(Ok(abc_tokens()));
        let (mut dialog, storage, _clock) =
            dialog_with(provider, backend_with_profile(Ok(UserProfile::new("42"))));
        dialog.open();

        let profile = dialog.sign_in_with_social("google-oauth2").await.unwrap();
        assert_eq!(profile.map(|p| p.id), Some("42".to_string()));
        assert_eq!(dialog.state(), UiState::Success);

        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("abc"));
        assert_eq!(
            storage.get(keys::EXPIRES_AT).unwrap(),
            Some((NOW + 3_600_000).to_string())
        );

        let snapshot = dialog.store().snapshot();
        assert!(snapshot.is_logged_in);
        assert!(snapshot.user_profile_storage_trigger);
        assert!(!snapshot.is_login_dialog_open);
        assert_eq!(snapshot.user_profile.map(|p| p.id), Some("42".to_string()));
    }

    #[tokio::test]
    async fn test_profile_not_found_keeps_token() {
        let backend = backend_with_profile(Err(ApiError::Status {
            code: 404,
            message: "not found".to_string(),
        }));
        let (mut dialog, storage, _clock) = dialog_with(ScriptedProvider::default(), backend);

        let err = dialog.complete_authentication(abc_tokens()).await.unwrap_err();
        assert!(matches!(err, DialogError::ProfileNotFound));
        assert_eq!(dialog.state(), UiState::Error);
        assert!(
            dialog
                .errors()
                .iter()
                .any(|e| e.contains("user profile not found"))
        );
        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("abc"));
        assert_eq!(dialog.toasts.len(), 1);
        assert!(!dialog.store().is_logged_in());
    }

    #[tokio::test]
    async fn test_sync_failure_aborts_before_profile_fetch() {
        let backend = ScriptedBackend::default();
        backend.sync.lock().unwrap().push_back(Err(ApiError::Transport("offline".to_string())));
        let (mut dialog, storage, _clock) = dialog_with(ScriptedProvider::default(), backend);

        let err = dialog.complete_authentication(abc_tokens()).await.unwrap_err();
        assert!(matches!(err, DialogError::Sync(_)));
        assert_eq!(dialog.backend.calls(), vec!["sync_user"]);
        assert!(storage.get(keys::ACCESS_TOKEN).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_access_token_fails_without_backend_calls() {
        let (mut dialog, storage, _clock) =
            dialog_with(ScriptedProvider::default(), ScriptedBackend::default());

        let err = dialog
            .complete_authentication(TokenFragment::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DialogError::MissingToken));
        assert!(dialog.backend.calls().is_empty());
        assert!(storage.is_empty());
        assert!(dialog.toasts.is_empty());
    }

    #[tokio::test]
    async fn test_popup_errors_wait_for_grace_period() {
        let provider = ScriptedProvider::default();
        provider
            .popup
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::new("access_denied", "User cancelled")));
        let (mut dialog, _storage, clock) = dialog_with(provider, ScriptedBackend::default());

        assert_eq!(dialog.sign_in_with_social("github").await.unwrap(), None);
        assert_eq!(dialog.state(), UiState::PopupOpen);
        assert!(dialog.errors().is_empty());
        assert_eq!(dialog.pending_errors(), ["User cancelled"]);

        clock.advance(29_999);
        assert!(!dialog.on_grace_elapsed(clock.now_ms()));
        assert!(!dialog.show_extended_wait(clock.now_ms()));

        clock.advance(1);
        assert!(dialog.on_grace_elapsed(clock.now_ms()));
        assert_eq!(dialog.state(), UiState::Error);
        assert_eq!(dialog.errors(), ["User cancelled"]);

        dialog.retry().unwrap();
        assert_eq!(dialog.state(), UiState::Idle);
        assert!(dialog.errors().is_empty());
    }

    #[tokio::test]
    async fn test_late_success_clears_pending_errors() {
        let (mut dialog, _storage, clock) =
            dialog_with(ScriptedProvider::default(), backend_with_profile(Ok(UserProfile::new("1"))));

        dialog.begin_popup(clock.now_ms()).unwrap();
        dialog.on_popup_error(ProviderError::new("access_denied", "spurious"), clock.now_ms());
        assert_eq!(dialog.pending_errors().len(), 1);

        dialog.complete_authentication(abc_tokens()).await.unwrap();
        assert_eq!(dialog.state(), UiState::Success);
        assert!(dialog.pending_errors().is_empty());
        assert!(dialog.errors().is_empty());
    }

    #[tokio::test]
    async fn test_outcome_from_separate_popup_run() {
        let provider = ScriptedProvider::default();
        provider.credentials.lock().unwrap().push_back(Ok(abc_tokens()));
        let login = LoginClient::new(provider, SessionTimings::default());
        let (mut dialog, storage, clock) =
            dialog_with(ScriptedProvider::default(), backend_with_profile(Ok(UserProfile::new("7"))));
        dialog.open();

        dialog.begin_popup(clock.now_ms()).unwrap();
        let force_universal = dialog.force_universal_for_email();
        let outcome = login.login_with_email("a@b.c", "pw", force_universal).await;

        // The dialog stays usable while the popup is up
        dialog.on_popup_error(ProviderError::new("access_denied", "spurious"), clock.now_ms());
        assert_eq!(dialog.state(), UiState::PopupOpen);

        let profile = dialog.handle_outcome(outcome).await.unwrap();
        assert_eq!(profile.map(|p| p.id), Some("7".to_string()));
        assert_eq!(dialog.state(), UiState::Success);
        assert!(dialog.pending_errors().is_empty());
        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_channel_blocked_forces_universal_for_email() {
        let provider = ScriptedProvider::default();
        provider
            .credentials
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::new("request_error", "web_message blocked")));
        provider.popup.lock().unwrap().push_back(Ok(tokens("universal")));
        let (mut dialog, _storage, _clock) =
            dialog_with(provider, backend_with_profile(Ok(UserProfile::new("7"))));

        assert_eq!(dialog.sign_in_with_email("a@b.c", "pw").await.unwrap(), None);
        assert_eq!(dialog.state(), UiState::Idle);
        assert!(dialog.force_universal_for_email());
        assert_eq!(dialog.notice(), Some(CLICK_AGAIN_NOTICE));
        assert!(dialog.errors().is_empty());

        // Second click goes through Universal Login
        let profile = dialog.sign_in_with_email("a@b.c", "pw").await.unwrap();
        assert!(profile.is_some());
        assert_eq!(
            dialog.login.provider().calls(),
            vec!["credentials:a@b.c", "popup"]
        );
    }

    #[tokio::test]
    async fn test_preflight_blocked_routes_email_to_universal() {
        let provider = ScriptedProvider::default();
        provider
            .silent
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::timeout("checkSession")));
        let (mut dialog, _storage, _clock) = dialog_with(provider, ScriptedBackend::default());

        assert_eq!(dialog.preflight().await, EmailFlow::UniversalPopup);
        assert!(dialog.force_universal_for_email());
    }

    #[test]
    fn test_unload_guard() {
        let (mut dialog, _storage, clock) =
            dialog_with(ScriptedProvider::default(), ScriptedBackend::default());
        assert!(!dialog.should_block_unload());
        assert_eq!(dialog.leave_warning(), None);

        dialog.begin_popup(clock.now_ms()).unwrap();
        assert!(dialog.should_block_unload());
        assert_eq!(dialog.leave_warning(), Some(LEAVE_WARNING));
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut dialog, _storage, _clock) =
            dialog_with(ScriptedProvider::default(), ScriptedBackend::default());
        assert!(matches!(
            dialog.retry(),
            Err(DialogError::InvalidTransition {
                from: UiState::Idle,
                to: UiState::Idle
            })
        ));
    }

    #[tokio::test]
    async fn test_redirect_callback_error() {
        let (mut dialog, _storage, _clock) =
            dialog_with(ScriptedProvider::default(), ScriptedBackend::default());

        let response = crate::client::authorization::parse_hash(
            "#error=access_denied&error_description=User%20cancelled",
        );
        let err = dialog.handle_redirect_callback(response).await.unwrap_err();
        assert!(matches!(err, DialogError::Provider(_)));
        assert_eq!(dialog.state(), UiState::Error);
        assert_eq!(dialog.errors(), ["User cancelled"]);
    }

    #[tokio::test]
    async fn test_redirect_callback_success() {
        let (mut dialog, _storage, _clock) = dialog_with(
            ScriptedProvider::default(),
            backend_with_profile(Ok(UserProfile::new("9"))),
        );

        let response =
            crate::client::authorization::parse_hash("#access_token=abc&expires_in=3600");
        let profile = dialog.handle_redirect_callback(response).await.unwrap();
        assert_eq!(profile.id, "9");
        assert_eq!(dialog.state(), UiState::Success);
    }
}
