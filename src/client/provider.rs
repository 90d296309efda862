//! Identity provider seam.
//!
//! [`IdentityProvider`] is everything the login dialog and the token monitor
//! need from Auth0: popup authorization, credentials login, silent session
//! checks, sign-up, and the redirect flow. [`crate::client::auth0::Auth0Client`]
//! implements it against the real tenant; tests substitute their own.

use crate::client::authorization::{AuthorizationError, AuthorizationResponse, TokenFragment};

/// Parameters of an authorize call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizeOptions {
    /// Identity connection (e.g. "google-oauth2"); `None` shows Universal Login.
    pub connection: Option<String>,
    /// `prompt` parameter ("none", "consent", "login").
    pub prompt: Option<String>,
    /// Pre-filled email on Universal Login.
    pub login_hint: Option<String>,
    /// "signup" opens Universal Login on the sign-up tab.
    pub screen_hint: Option<String>,
    /// How long to wait for an answer before failing with `timeout`.
    pub timeout_ms: Option<u64>,
}

impl AuthorizeOptions {
    pub fn social(connection: impl Into<String>) -> Self {
        Self {
            connection: Some(connection.into()),
            ..Self::default()
        }
    }

    /// Silent check used by `checkSession`.
    pub fn silent() -> Self {
        Self {
            prompt: Some("none".to_string()),
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_login_hint(mut self, hint: impl Into<String>) -> Self {
        self.login_hint = Some(hint.into());
        self
    }

    pub fn with_screen_hint(mut self, hint: impl Into<String>) -> Self {
        self.screen_hint = Some(hint.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Database sign-up request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

/// Classification of provider errors by remediation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Retry the popup with `prompt=consent`.
    ConsentRequired,
    /// No provider session; silent checks cannot succeed.
    LoginRequired,
    /// The provider needs user interaction.
    InteractionRequired,
    /// `invalid_token` complaining about `state`.
    StateMismatch,
    /// The browser blocks cross-window communication (`web_message`, timeouts).
    ChannelBlocked,
    Other,
}

/// Error reported by the identity provider or by the transport to it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {}", .description.as_deref().unwrap_or("no description"))]
pub struct ProviderError {
    pub code: String,
    pub description: Option<String>,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: Some(description.into()),
        }
    }

    /// A fixed timeout elapsed without an answer.
    pub fn timeout(what: &str) -> Self {
        Self::new("timeout", format!("Timeout during {}", what))
    }

    /// The platform cannot run this flow (e.g. popups outside a browser).
    pub fn unsupported(what: &str) -> Self {
        Self::new("unsupported", format!("{} is not supported on this platform", what))
    }

    pub fn kind(&self) -> ProviderErrorKind {
        let description = self.description.as_deref().unwrap_or("");
        match self.code.as_str() {
            "consent_required" => ProviderErrorKind::ConsentRequired,
            "login_required" => ProviderErrorKind::LoginRequired,
            "interaction_required" => ProviderErrorKind::InteractionRequired,
            "invalid_token" if description.contains("state") => ProviderErrorKind::StateMismatch,
            code if is_channel_failure(code) || is_channel_failure(description) => {
                ProviderErrorKind::ChannelBlocked
            }
            _ => ProviderErrorKind::Other,
        }
    }

    /// Human-readable message for the dialog's error list.
    pub fn user_message(&self) -> String {
        match self.description.as_deref() {
            Some(description) if !description.is_empty() => description.to_string(),
            _ => self.code.replace('_', " "),
        }
    }
}

fn is_channel_failure(text: &str) -> bool {
    text.contains("web_message") || text.contains("timeout")
}

impl From<AuthorizationError> for ProviderError {
    fn from(err: AuthorizationError) -> Self {
        Self {
            code: err.error,
            description: err.error_description,
        }
    }
}

impl AuthorizationResponse {
    /// Splits the response into tokens or a provider error.
    pub fn into_result(self) -> Result<TokenFragment, ProviderError> {
        match self {
            AuthorizationResponse::Success(tokens) => Ok(tokens),
            AuthorizationResponse::Error(err) => Err(err.into()),
        }
    }
}

/// Operations the session layer needs from the identity provider.
#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    /// Runs an authorize request in a popup window.
    async fn popup_authorize(&self, options: &AuthorizeOptions)
    -> Result<TokenFragment, ProviderError>;

    /// Signs in with email and password without leaving the page.
    async fn popup_login_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenFragment, ProviderError>;

    /// Silent authorize (`prompt=none`) to renew tokens from the provider session.
    async fn check_session(&self, options: &AuthorizeOptions)
    -> Result<TokenFragment, ProviderError>;

    /// Creates a database user.
    async fn signup(&self, request: &SignupRequest) -> Result<(), ProviderError>;

    /// Navigates the whole window to the provider.
    fn authorize_redirect(&self, options: &AuthorizeOptions) -> Result<(), ProviderError>;

    /// Provider logout URL returning to `return_to`.
    fn logout_url(&self, return_to: &str) -> String;
}

macro_rules! forward_identity_provider {
    ($($ptr:ident)::+) => {
        impl<T: IdentityProvider> IdentityProvider for $($ptr)::+<T> {
            async fn popup_authorize(
                &self,
                options: &AuthorizeOptions,
            ) -> Result<TokenFragment, ProviderError> {
                (**self).popup_authorize(options).await
            }

            async fn popup_login_with_credentials(
                &self,
                username: &str,
                password: &str,
            ) -> Result<TokenFragment, ProviderError> {
                (**self).popup_login_with_credentials(username, password).await
            }

            async fn check_session(
                &self,
                options: &AuthorizeOptions,
            ) -> Result<TokenFragment, ProviderError> {
                (**self).check_session(options).await
            }

            async fn signup(&self, request: &SignupRequest) -> Result<(), ProviderError> {
                (**self).signup(request).await
            }

            fn authorize_redirect(&self, options: &AuthorizeOptions) -> Result<(), ProviderError> {
                (**self).authorize_redirect(options)
            }

            fn logout_url(&self, return_to: &str) -> String {
                (**self).logout_url(return_to)
            }
        }
    };
}

forward_identity_provider!(std::sync::Arc);
forward_identity_provider!(std::rc::Rc);
