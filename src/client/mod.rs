//! Client-side session layer.
//!
//! - [`auth0`] and [`login`]: popup, credentials, silent and redirect flows
//!   against Auth0
//! - [`dialog`]: the login dialog state machine and the post-auth sequence
//! - [`monitor`]: token expiry and profile refresh monitors, coordinated
//!   across tabs with [`lock`]
//! - [`token_storage`], [`profile_cache`], [`storage`]: persisted session state
//! - [`auth_store`]: observable auth state shared by all components
//! - [`http_client`], [`interactions`]: the application backend
//! - [`use_session`]: Dioxus hooks and callback pages
//!
//! Browser-only pieces are compiled for `wasm32`; native builds get stubs so
//! the state machines stay testable with in-memory storage.

pub mod auth0;
pub mod auth_store;
pub mod authorization;
pub mod callback_page;
pub mod clock;
pub mod dialog;
pub mod http_client;
pub mod interactions;
pub mod jwt;
pub mod lock;
pub mod login;
pub mod monitor;
pub mod popup;
pub mod profile_cache;
pub mod provider;
pub mod storage;
pub mod token_storage;
pub mod use_session;

// Re-export commonly used types and functions
pub use auth0::Auth0Client;
pub use auth_store::{AuthSnapshot, AuthStore};
pub use dialog::{DialogError, EmailFlow, LoginDialog, UiState};
pub use http_client::{ApiError, BackendApi, HttpBackend};
pub use jwt::{IdTokenClaims, decode_id_token};
pub use provider::{AuthorizeOptions, IdentityProvider, ProviderError, ProviderErrorKind};
pub use storage::{AppStorage, KeyValueStore, MemoryStore, StorageError};
pub use token_storage::{SessionCredentials, SessionStore};
pub use use_session::{
    AuthCallbackPage, PopupCallbackPage, SessionContext, use_auth_snapshot, use_session,
    use_session_provider,
};
