//! Auth0 and backend configuration.
//!
//! This module provides the configuration shared by the login utilities, the
//! login dialog and the session monitors: the Auth0 tenant, the backend API
//! base URL, the local callback routes, and the timing constants of the popup
//! protocol and the monitors.

use serde::{Deserialize, Serialize};

/// Route of the redirect-flow callback page.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Route of the popup callback page that relays results to the opener.
pub const POPUP_CALLBACK_PATH: &str = "/auth/popup-callback";

/// Auth0 and backend configuration.
///
/// # Fields
///
/// - `domain`: Auth0 tenant domain (e.g., "your-tenant.auth0.com")
/// - `client_id`: Auth0 application client ID
/// - `audience`: Auth0 API audience/identifier
/// - `api_base_url`: base URL of the backend REST API (`/api/v1/...` lives below it)
/// - `realm`: database connection used for email/password login and sign-up
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Auth0Config {
    /// Auth0 tenant domain (e.g., "your-tenant.auth0.com")
    pub domain: String,

    /// Auth0 application client ID (public identifier)
    pub client_id: String,

    /// Auth0 API audience/identifier
    pub audience: String,

    /// Backend REST API base URL, without trailing slash
    pub api_base_url: String,

    /// Database connection name for credentials login and sign-up
    pub realm: String,

    /// Scope requested on every authorize call
    pub scope: String,
}

impl Auth0Config {
    /// Creates a new Auth0Config.
    ///
    /// # Example
    ///
    /// ```
    /// # use dxsession::Auth0Config;
    /// let config = Auth0Config::new(
    ///     "your-tenant.auth0.com".to_string(),
    ///     "your_client_id".to_string(),
    ///     "https://api.example.com".to_string(),
    ///     "https://backend.example.com/".to_string(),
    /// );
    /// assert_eq!(config.api_base_url, "https://backend.example.com");
    /// ```
    pub fn new(domain: String, client_id: String, audience: String, api_base_url: String) -> Self {
        Self {
            domain,
            client_id,
            audience,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            realm: "Username-Password-Authentication".to_string(),
            scope: "openid profile email".to_string(),
        }
    }

    /// Overrides the database connection used for credentials login.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Loads the configuration from compile-time environment variables.
    ///
    /// Expected environment variables:
    /// - `AUTH0_DOMAIN` - Auth0 tenant domain
    /// - `AUTH0_CLIENT_ID` - Auth0 application client ID
    /// - `AUTH0_AUDIENCE` - Auth0 API audience
    /// - `API_BASE_URL` - backend REST API base URL
    /// - `AUTH0_REALM` - optional database connection name
    ///
    /// Returns `None` if any of them was not set at compile time.
    pub fn from_env() -> Option<Self> {
        let domain = option_env!("AUTH0_DOMAIN")?;
        let client_id = option_env!("AUTH0_CLIENT_ID")?;
        let audience = option_env!("AUTH0_AUDIENCE")?;
        let api_base_url = option_env!("API_BASE_URL")?;

        let config = Self::new(
            domain.to_string(),
            client_id.to_string(),
            audience.to_string(),
            api_base_url.to_string(),
        );
        Some(match option_env!("AUTH0_REALM") {
            Some(realm) => config.with_realm(realm),
            None => config,
        })
    }

    /// Loads the configuration from compile-time environment variables or panics.
    ///
    /// # Panics
    ///
    /// Panics with a clear error message if any required environment variable
    /// was not set at compile time.
    pub fn from_env_or_panic() -> Self {
        Self::from_env().expect(
            "Auth0 configuration not found. Please set the following environment variables at compile time:\n\
             - AUTH0_DOMAIN\n\
             - AUTH0_CLIENT_ID\n\
             - AUTH0_AUDIENCE\n\
             - API_BASE_URL\n\n\
             For local development, use Auth0Config::new() with test values.",
        )
    }

    /// Returns the base URL for Auth0 endpoints.
    ///
    /// ```
    /// # use dxsession::Auth0Config;
    /// let config = Auth0Config::new(
    ///     "test.auth0.com".to_string(),
    ///     "cid".to_string(),
    ///     "https://api.test.com".to_string(),
    ///     "http://localhost:8000".to_string(),
    /// );
    /// assert_eq!(config.base_url(), "https://test.auth0.com");
    /// ```
    pub fn base_url(&self) -> String {
        format!("https://{}", self.domain)
    }

    /// Returns the authorization endpoint URL.
    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.base_url())
    }

    /// Returns the token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url())
    }

    /// Returns the database sign-up endpoint URL.
    pub fn signup_url(&self) -> String {
        format!("{}/dbconnections/signup", self.base_url())
    }

    /// Returns the logout endpoint URL.
    pub fn logout_url(&self) -> String {
        format!("{}/v2/logout", self.base_url())
    }

    /// Redirect URI for the full-page redirect flow.
    pub fn callback_uri(&self, origin: &str) -> String {
        format!("{}{}", origin.trim_end_matches('/'), CALLBACK_PATH)
    }

    /// Redirect URI for the popup flow.
    pub fn popup_callback_uri(&self, origin: &str) -> String {
        format!("{}{}", origin.trim_end_matches('/'), POPUP_CALLBACK_PATH)
    }

    /// Absolute URL of a backend endpoint.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }
}

/// Timing constants of the popup protocol, the login dialog and the monitors.
///
/// All values are milliseconds except `expiry_buffer_minutes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimings {
    /// Delay before the popup callback page closes itself after posting.
    pub popup_close_delay_ms: u64,
    /// Lifetime of the opener's `message` listener.
    pub listener_timeout_ms: u64,
    /// Timeout of the silent `checkSession` pre-flight.
    pub preflight_timeout_ms: u64,
    /// Grace period before accumulated popup errors are shown.
    pub error_grace_ms: u64,
    /// Age after which an advisory lock is considered stale.
    pub lock_duration_ms: u64,
    /// Window during which a refreshing tab ignores storage events.
    pub ignore_storage_events_ms: u64,
    /// Interval of the local token presence check.
    pub local_check_interval_ms: u64,
    /// Interval of the remote token refresh check.
    pub remote_check_interval_ms: u64,
    /// Interval of the background profile refresh.
    pub profile_refresh_interval_ms: u64,
    /// How close to expiry (in minutes) a token must be before it is refreshed.
    pub expiry_buffer_minutes: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            popup_close_delay_ms: 100,
            listener_timeout_ms: 60_000,
            preflight_timeout_ms: 2_500,
            error_grace_ms: 30_000,
            lock_duration_ms: 30_000,
            ignore_storage_events_ms: 500,
            local_check_interval_ms: 60_000,
            remote_check_interval_ms: 3_600_000,
            profile_refresh_interval_ms: 600_000,
            expiry_buffer_minutes: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Auth0Config {
        Auth0Config::new(
            "test.auth0.com".to_string(),
            "test_client_id".to_string(),
            "https://api.test.com".to_string(),
            "http://localhost:8000/".to_string(),
        )
    }

    #[test]
    fn test_new_trims_api_base_url() {
        let config = test_config();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.realm, "Username-Password-Authentication");
    }

    #[test]
    fn test_auth0_urls() {
        let config = test_config();
        assert_eq!(config.authorize_url(), "https://test.auth0.com/authorize");
        assert_eq!(config.token_url(), "https://test.auth0.com/oauth/token");
        assert_eq!(
            config.signup_url(),
            "https://test.auth0.com/dbconnections/signup"
        );
        assert_eq!(config.logout_url(), "https://test.auth0.com/v2/logout");
    }

    #[test]
    fn test_callback_uris() {
        let config = test_config();
        assert_eq!(
            config.callback_uri("https://app.example.com/"),
            "https://app.example.com/auth/callback"
        );
        assert_eq!(
            config.popup_callback_uri("https://app.example.com"),
            "https://app.example.com/auth/popup-callback"
        );
    }

    #[test]
    fn test_api_url() {
        let config = test_config();
        assert_eq!(
            config.api_url("/api/v1/users/me/profile"),
            "http://localhost:8000/api/v1/users/me/profile"
        );
        assert_eq!(
            config.api_url("api/v1/posts/like"),
            "http://localhost:8000/api/v1/posts/like"
        );
    }

    #[test]
    fn test_with_realm() {
        let config = test_config().with_realm("email-db");
        assert_eq!(config.realm, "email-db");
    }

    #[test]
    fn test_default_timings() {
        let timings = SessionTimings::default();
        assert_eq!(timings.popup_close_delay_ms, 100);
        assert_eq!(timings.listener_timeout_ms, 60_000);
        assert_eq!(timings.preflight_timeout_ms, 2_500);
        assert_eq!(timings.lock_duration_ms, 30_000);
        assert_eq!(timings.ignore_storage_events_ms, 500);
        assert_eq!(timings.remote_check_interval_ms, 3_600_000);
        assert_eq!(timings.profile_refresh_interval_ms, 600_000);
    }

    #[test]
    fn test_serialization() {
        let config = test_config();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Auth0Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_from_env() {
        // Populated only when build.rs found values
        if let Some(cfg) = Auth0Config::from_env() {
            assert!(!cfg.domain.is_empty());
            assert!(!cfg.client_id.is_empty());
        }
    }
}
