//! Dioxus integration of the session layer.
//!
//! Call [`use_session_provider`] once at the root of the app. It builds the
//! long-lived services (Auth0 client, backend client, auth store, login
//! dialog), mirrors the auth store and the dialog into signals, and in the
//! browser starts the session monitors and the unload guard. Descendants use
//! [`use_session`] to reach the context.
//!
//! # Example
//!
//! ```ignore
//! #[component]
//! pub fn App() -> Element {
//!     let session = use_session_provider();
//!     let snapshot = session.snapshot();
//!     rsx! {
//!         if snapshot.read().is_logged_in {
//!             button { onclick: move |_| session.logout(), "Sign out" }
//!         } else {
//!             button { onclick: move |_| session.open_login_dialog(), "Sign in" }
//!         }
//!     }
//! }
//! ```

use crate::client::auth0::Auth0Client;
use crate::client::auth_store::{AuthSnapshot, AuthStore};
use crate::client::clock::{Clock, SystemClock};
use crate::client::dialog::{EmailFlow, LoginDialog, UiState};
use crate::client::http_client::HttpBackend;
use crate::client::interactions::{Interactions, Toast, Toasts};
use crate::client::login::{LoginClient, LoginOutcome};
use crate::client::profile_cache::ProfileCache;
use crate::client::provider::IdentityProvider;
use crate::client::storage::AppStorage;
use crate::client::token_storage::{self, SessionStore};
use crate::config::SessionTimings;
use crate::Auth0Config;

use dioxus::prelude::*;
use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

pub type AppBackend = HttpBackend<AppStorage>;
pub type AppDialog = LoginDialog<Auth0Client, AppBackend, AppStorage>;

/// Render state of the login dialog.
#[derive(Clone, Debug, PartialEq)]
pub struct DialogView {
    pub state: UiState,
    pub errors: Vec<String>,
    pub notice: Option<String>,
    /// The popup has been open for the whole grace period.
    pub extended_wait: bool,
    pub email_flow: EmailFlow,
    /// Set while leaving the page would abort a sign-in.
    pub leave_warning: Option<&'static str>,
}

impl Default for DialogView {
    fn default() -> Self {
        Self {
            state: UiState::Idle,
            errors: Vec::new(),
            notice: None,
            extended_wait: false,
            email_flow: EmailFlow::Inline,
            leave_warning: None,
        }
    }
}

impl DialogView {
    pub fn of(dialog: &AppDialog, now_ms: u64) -> Self {
        Self {
            state: dialog.state(),
            errors: dialog.errors().to_vec(),
            notice: dialog.notice().map(str::to_string),
            extended_wait: dialog.show_extended_wait(now_ms),
            email_flow: if dialog.force_universal_for_email() {
                EmailFlow::UniversalPopup
            } else {
                EmailFlow::Inline
            },
            leave_warning: dialog.leave_warning(),
        }
    }
}

/// Origin the app is served from.
#[cfg(target_arch = "wasm32")]
pub fn current_origin() -> String {
    web_sys::window()
        .and_then(|w| w.location().origin().ok())
        .unwrap_or_else(|| "http://localhost:8080".to_string())
}

/// Non-WASM stub for current_origin.
#[cfg(not(target_arch = "wasm32"))]
pub fn current_origin() -> String {
    "http://localhost:8080".to_string()
}

/// Long-lived objects shared by every component.
#[derive(Clone)]
pub struct SessionServices {
    pub config: Auth0Config,
    pub timings: SessionTimings,
    pub store: AuthStore,
    pub toasts: Toasts,
    pub local: AppStorage,
    pub session: AppStorage,
    pub auth0: Auth0Client,
    pub backend: AppBackend,
    /// Runs popups outside the dialog lock.
    login: Rc<LoginClient<Auth0Client>>,
    dialog: Rc<tokio::sync::Mutex<AppDialog>>,
    route_changes: Rc<Cell<u64>>,
    popup_runs: Rc<Cell<u64>>,
}

impl SessionServices {
    pub fn new(
        config: Auth0Config,
        timings: SessionTimings,
        origin: String,
        local: AppStorage,
        session: AppStorage,
    ) -> Self {
        let auth0 = Auth0Client::new(config.clone(), timings, origin);
        let backend = HttpBackend::new(config.clone(), local.clone());
        let store = AuthStore::new();
        let toasts = Toasts::new();

        // Start from whatever a previous page load left behind
        store.set_logged_in(SessionStore::new(local.clone()).is_authenticated_local());
        store.set_user_profile(ProfileCache::new(local.clone()).read());

        let dialog = LoginDialog::new(
            LoginClient::new(auth0.clone(), timings),
            backend.clone(),
            local.clone(),
            store.clone(),
            toasts.clone(),
            SystemClock,
            timings,
        );

        Self {
            config,
            timings,
            store,
            toasts,
            local,
            session,
            login: Rc::new(LoginClient::new(auth0.clone(), timings)),
            auth0,
            backend,
            dialog: Rc::new(tokio::sync::Mutex::new(dialog)),
            route_changes: Rc::new(Cell::new(0)),
            popup_runs: Rc::new(Cell::new(0)),
        }
    }

    /// Services configured from compile-time environment variables.
    pub fn from_env() -> Self {
        let config = Auth0Config::from_env().unwrap_or_else(|| {
            tracing::warn!("Auth0 environment variables not set, using development config");
            Auth0Config::new(
                "dev.auth0.com".to_string(),
                "dev_client_id".to_string(),
                "https://api.dev.com".to_string(),
                "http://localhost:8000".to_string(),
            )
        });
        Self::new(
            config,
            SessionTimings::default(),
            current_origin(),
            AppStorage::local(),
            AppStorage::session(),
        )
    }

    pub fn interactions(&self) -> Interactions<AppBackend, AppStorage> {
        Interactions::new(
            self.backend.clone(),
            ProfileCache::new(self.local.clone()),
            self.store.clone(),
            self.toasts.clone(),
        )
    }

    /// Clears the local session and the store. Returns the provider logout URL.
    pub fn logout(&self) -> String {
        if let Err(e) = token_storage::logout(&self.local, &self.session) {
            tracing::error!("Failed to clear session storage: {}", e);
        }
        self.store.reset();
        self.auth0.logout_url(self.auth0.origin())
    }
}

/// Context returned by [`use_session`].
#[derive(Clone)]
pub struct SessionContext {
    services: SessionServices,
    snapshot: Signal<AuthSnapshot>,
    dialog_view: Signal<DialogView>,
}

impl SessionContext {
    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Signal mirroring the auth store.
    pub fn snapshot(&self) -> Signal<AuthSnapshot> {
        self.snapshot
    }

    pub fn dialog_view(&self) -> Signal<DialogView> {
        self.dialog_view
    }

    pub fn is_logged_in(&self) -> bool {
        self.snapshot.read().is_logged_in
    }

    pub fn interactions(&self) -> Interactions<AppBackend, AppStorage> {
        self.services.interactions()
    }

    /// Toasts queued since the last call.
    pub fn take_toasts(&self) -> Vec<Toast> {
        self.services.toasts.drain()
    }

    /// Tells the token monitor the route changed.
    pub fn notify_route_change(&self) {
        let changes = &self.services.route_changes;
        changes.set(changes.get() + 1);
    }

    fn publish(&self, dialog: &AppDialog) {
        let mut view = self.dialog_view;
        view.set(DialogView::of(dialog, SystemClock.now_ms()));
    }

    /// Moves the dialog to `PopupOpen` and publishes it before the popup runs.
    fn start_popup(&self, dialog: &mut AppDialog) -> bool {
        if let Err(e) = dialog.begin_popup(SystemClock.now_ms()) {
            tracing::warn!("{}", e);
            return false;
        }
        self.publish(dialog);

        let runs = &self.services.popup_runs;
        runs.set(runs.get() + 1);
        self.flag_extended_wait(runs.get());
        true
    }

    /// Sets `extended_wait` if popup `run` is still open after the grace period.
    fn flag_extended_wait(&self, run: u64) {
        #[cfg(target_arch = "wasm32")]
        {
            let mut view = self.dialog_view;
            let runs = Rc::clone(&self.services.popup_runs);
            let grace_ms = self.services.timings.error_grace_ms;
            spawn(async move {
                gloo_timers::future::TimeoutFuture::new(grace_ms as u32).await;
                if runs.get() == run && view.peek().state == UiState::PopupOpen {
                    view.write().extended_wait = true;
                }
            });
        }

        #[cfg(not(target_arch = "wasm32"))]
        tracing::trace!("Popup run {} started", run);
    }

    /// Shows held popup errors once their grace period is over.
    fn schedule_grace(&self, dialog: &AppDialog) {
        if dialog.state() != UiState::PopupOpen || dialog.pending_errors().is_empty() {
            return;
        }
        let Some(deadline) = dialog.grace_deadline() else {
            return;
        };

        #[cfg(target_arch = "wasm32")]
        {
            let ctx = self.clone();
            spawn(async move {
                let wait = deadline.saturating_sub(SystemClock.now_ms());
                gloo_timers::future::TimeoutFuture::new(wait as u32).await;
                let mut dialog = ctx.services.dialog.lock().await;
                dialog.on_grace_elapsed(SystemClock.now_ms());
                ctx.publish(&dialog);
            });
        }

        #[cfg(not(target_arch = "wasm32"))]
        tracing::trace!("No timer available, errors stay pending until {}", deadline);
    }

    pub fn open_login_dialog(&self) {
        let ctx = self.clone();
        spawn(async move {
            let mut dialog = ctx.services.dialog.lock().await;
            dialog.open();
            ctx.publish(&dialog);

            let flow = dialog.preflight().await;
            tracing::trace!("Email sign-in will use {:?}", flow);
            ctx.publish(&dialog);
        });
    }

    pub fn close_login_dialog(&self) {
        let ctx = self.clone();
        spawn(async move {
            let mut dialog = ctx.services.dialog.lock().await;
            dialog.close();
            ctx.publish(&dialog);
        });
    }

    /// Runs a popup login. The dialog lock is held only to begin the popup
    /// and to apply its outcome. `flow` receives the force-Universal flag.
    async fn run_popup<F, Fut>(&self, what: &str, flow: F)
    where
        F: FnOnce(Rc<LoginClient<Auth0Client>>, bool) -> Fut,
        Fut: Future<Output = LoginOutcome>,
    {
        let force_universal = {
            let mut dialog = self.services.dialog.lock().await;
            if !self.start_popup(&mut dialog) {
                return;
            }
            dialog.force_universal_for_email()
        };

        let outcome = flow(Rc::clone(&self.services.login), force_universal).await;

        let mut dialog = self.services.dialog.lock().await;
        if let Err(e) = dialog.handle_outcome(outcome).await {
            tracing::warn!("{} failed: {}", what, e);
        }
        self.publish(&dialog);
        self.schedule_grace(&dialog);
    }

    pub fn sign_in_with_social(&self, connection: String) {
        let ctx = self.clone();
        spawn(async move {
            let what = format!("Social sign-in with {}", connection);
            ctx.run_popup(&what, |login, _| async move {
                login.login_with_social_popup(&connection).await
            })
            .await;
        });
    }

    pub fn sign_in_with_email(&self, email: String, password: String) {
        let ctx = self.clone();
        spawn(async move {
            ctx.run_popup("Email sign-in", |login, force_universal| async move {
                login.login_with_email(&email, &password, force_universal).await
            })
            .await;
        });
    }

    pub fn register(&self, email: String, password: String, name: Option<String>) {
        let ctx = self.clone();
        spawn(async move {
            ctx.run_popup("Registration", |login, force_universal| async move {
                login
                    .register(&email, &password, name.as_deref(), force_universal)
                    .await
            })
            .await;
        });
    }

    pub fn sign_in_with_redirect(&self, connection: Option<String>) {
        let ctx = self.clone();
        spawn(async move {
            let mut dialog = ctx.services.dialog.lock().await;
            if let Err(e) = dialog.sign_in_with_redirect(connection.as_deref()) {
                tracing::error!("Redirect sign-in failed: {}", e);
            }
        });
    }

    pub fn retry(&self) {
        let ctx = self.clone();
        spawn(async move {
            let mut dialog = ctx.services.dialog.lock().await;
            if let Err(e) = dialog.retry() {
                tracing::warn!("{}", e);
            }
            ctx.publish(&dialog);
        });
    }

    /// Completes a redirect login on `/auth/callback`.
    pub fn handle_redirect_callback(&self) {
        let Some(response) = crate::client::callback_page::take_redirect_response() else {
            tracing::warn!("No authorization response in the callback URL");
            return;
        };
        let ctx = self.clone();
        spawn(async move {
            let mut dialog = ctx.services.dialog.lock().await;
            if let Err(e) = dialog.handle_redirect_callback(response).await {
                tracing::error!("Redirect callback failed: {}", e);
            }
            ctx.publish(&dialog);
        });
    }

    /// Clears the session and navigates to the provider logout page.
    pub fn logout(&self) {
        let url = self.services.logout();

        #[cfg(target_arch = "wasm32")]
        {
            if let Some(window) = web_sys::window() {
                let _ = window.location().set_href(&url);
                tracing::trace!("Redirecting to Auth0 logout");
            } else {
                tracing::error!("Failed to get window for logout redirect");
            }
        }

        #[cfg(not(target_arch = "wasm32"))]
        tracing::warn!("Logout redirect not supported in non-WASM builds: {}", url);
    }
}

/// Provides the session context to the component tree.
///
/// Must be called once, at the root of the app.
pub fn use_session_provider() -> SessionContext {
    let services = use_hook(SessionServices::from_env);
    let snapshot = use_signal(|| services.store.snapshot());
    let dialog_view = use_signal(DialogView::default);

    use_hook({
        let store = services.store.clone();
        move || {
            let mut snapshot = snapshot;
            spawn(async move {
                let mut rx = store.subscribe();
                while rx.changed().await.is_ok() {
                    let current = rx.borrow_and_update().clone();
                    snapshot.set(current);
                }
            })
        }
    });

    #[cfg(target_arch = "wasm32")]
    use_hook({
        let services = services.clone();
        move || {
            browser::install_unload_guard(dialog_view);
            browser::spawn_monitors(services)
        }
    });

    use_context_provider(|| SessionContext {
        services,
        snapshot,
        dialog_view,
    })
}

/// The session context set up by [`use_session_provider`].
///
/// # Panics
///
/// Panics if no ancestor called `use_session_provider()`.
pub fn use_session() -> SessionContext {
    use_context::<SessionContext>()
}

/// Signal mirroring the global auth store.
pub fn use_auth_snapshot() -> Signal<AuthSnapshot> {
    use_session().snapshot()
}

/// Page mounted at `/auth/popup-callback`: relays the result to the opener.
#[component]
pub fn PopupCallbackPage() -> Element {
    use_hook(|| {
        #[cfg(target_arch = "wasm32")]
        if let Err(e) = crate::client::callback_page::relay_to_opener(
            SessionTimings::default().popup_close_delay_ms,
        ) {
            tracing::error!("Failed to relay authorization response: {}", e);
        }
    });

    rsx! {
        p { "Completing sign-in..." }
    }
}

/// Page mounted at `/auth/callback` after a redirect login.
#[component]
pub fn AuthCallbackPage() -> Element {
    let session = use_session();
    use_hook({
        let session = session.clone();
        move || session.handle_redirect_callback()
    });

    let view = session.dialog_view();
    let view = view.read();
    rsx! {
        match view.state {
            UiState::Success => rsx! { p { "Signed in." } },
            UiState::Error => rsx! {
                ul {
                    for error in view.errors.iter() {
                        li { "{error}" }
                    }
                }
            },
            _ => rsx! { p { "Completing sign-in..." } },
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::*;
    use crate::client::monitor::{TokenMonitor, UserProfileMonitor};
    use crate::client::storage::StorageListener;

    /// Monitor loop granularity.
    const POLL_INTERVAL_MS: u32 = 250;

    pub(super) fn spawn_monitors(services: SessionServices) -> Task {
        spawn(async move {
            let mut tokens = TokenMonitor::new(
                services.auth0.clone(),
                services.local.clone(),
                services.store.clone(),
                SystemClock,
                services.timings,
            );
            let mut profile = UserProfileMonitor::new(
                services.backend.clone(),
                services.local.clone(),
                services.store.clone(),
                SystemClock,
                services.timings,
            );

            let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
            let _listener = match StorageListener::register(move |event| {
                let _ = tx.send(event);
            }) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    tracing::warn!("Cross-tab sync disabled: {}", e);
                    None
                }
            };
            let mut trigger = services.store.subscribe();
            let mut seen_routes = services.route_changes.get();

            profile.mount().await;
            loop {
                tokens.tick().await;
                profile.tick().await;

                let routes = services.route_changes.get();
                if routes != seen_routes {
                    seen_routes = routes;
                    tokens.on_route_change().await;
                }

                while let Ok(event) = events.try_recv() {
                    tokens.on_storage_event(&event);
                    profile.on_storage_event(&event);
                }

                if trigger.has_changed().unwrap_or(false) {
                    let flipped = trigger.borrow_and_update().user_profile_storage_trigger;
                    profile.on_trigger_changed(flipped);
                }

                gloo_timers::future::TimeoutFuture::new(POLL_INTERVAL_MS).await;
            }
        })
    }

    pub(super) fn install_unload_guard(view: Signal<DialogView>) {
        use wasm_bindgen::JsCast;
        use wasm_bindgen::closure::Closure;

        let Some(window) = web_sys::window() else {
            return;
        };

        let before_unload = Closure::<dyn FnMut(web_sys::BeforeUnloadEvent)>::new(
            move |event: web_sys::BeforeUnloadEvent| {
                if let Some(warning) = view.peek().leave_warning {
                    event.prevent_default();
                    event.set_return_value(warning);
                }
            },
        );
        if let Err(e) = window
            .add_event_listener_with_callback("beforeunload", before_unload.as_ref().unchecked_ref())
        {
            tracing::warn!("Failed to install beforeunload guard: {:?}", e);
        }
        // Page lifetime
        before_unload.forget();

        let Some(document) = window.document() else {
            return;
        };
        let alert_window = window.clone();
        let watched = document.clone();
        let visibility = Closure::<dyn FnMut()>::new(move || {
            if watched.visibility_state() != web_sys::VisibilityState::Hidden {
                return;
            }
            if let Some(warning) = view.peek().leave_warning {
                let _ = alert_window.alert_with_message(warning);
            }
        });
        if let Err(e) = document
            .add_event_listener_with_callback("visibilitychange", visibility.as_ref().unchecked_ref())
        {
            tracing::warn!("Failed to install visibility guard: {:?}", e);
        }
        visibility.forget();
    }
}
