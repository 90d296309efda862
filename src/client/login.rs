//! Login and registration flows on top of an [`IdentityProvider`].
//!
//! Social logins always use the popup. Email logins run inline against the
//! password-realm grant unless the browser blocks cross-window messages, in
//! which case the dialog forces Universal Login in a popup instead.

use crate::client::authorization::TokenFragment;
use crate::client::provider::{
    AuthorizeOptions, IdentityProvider, ProviderError, ProviderErrorKind, SignupRequest,
};
use crate::config::SessionTimings;

/// Whether silent authentication (`prompt=none` in an iframe) works in this browser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SilentAuthSupport {
    Available,
    /// Third-party cookies or `web_message` are blocked.
    Blocked,
}

/// Result of one login attempt, classified for the dialog.
#[derive(Clone, Debug, PartialEq)]
pub enum LoginOutcome {
    Authenticated(TokenFragment),
    /// The browser blocked the channel; the user should click again.
    ChannelBlocked(ProviderError),
    Failed(ProviderError),
}

impl LoginOutcome {
    pub fn from_result(result: Result<TokenFragment, ProviderError>) -> Self {
        match result {
            Ok(tokens) => LoginOutcome::Authenticated(tokens),
            Err(err) if err.kind() == ProviderErrorKind::ChannelBlocked => {
                LoginOutcome::ChannelBlocked(err)
            }
            Err(err) => LoginOutcome::Failed(err),
        }
    }
}

/// Login entry points used by the login dialog.
pub struct LoginClient<P> {
    provider: P,
    timings: SessionTimings,
}

impl<P: IdentityProvider> LoginClient<P> {
    pub fn new(provider: P, timings: SessionTimings) -> Self {
        Self { provider, timings }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Popup login with a social connection. A `consent_required` answer is
    /// retried once with `prompt=consent`.
    pub async fn login_with_social_popup(&self, connection: &str) -> LoginOutcome {
        let options = AuthorizeOptions::social(connection);
        let first = self.provider.popup_authorize(&options).await;
        let result = match first {
            Err(err) if err.kind() == ProviderErrorKind::ConsentRequired => {
                tracing::trace!("Consent required for {}, retrying with prompt=consent", connection);
                self.provider
                    .popup_authorize(&options.with_prompt("consent"))
                    .await
            }
            other => other,
        };
        LoginOutcome::from_result(result)
    }

    /// Universal Login in a popup, optionally pre-filling the email.
    pub async fn login_with_universal_popup(&self, login_hint: Option<&str>) -> LoginOutcome {
        let mut options = AuthorizeOptions::default();
        if let Some(hint) = login_hint {
            options = options.with_login_hint(hint);
        }
        LoginOutcome::from_result(self.provider.popup_authorize(&options).await)
    }

    /// Email and password login. With `force_universal`, the credentials
    /// are not sent inline and Universal Login opens with the email pre-filled.
    pub async fn login_with_email(
        &self,
        email: &str,
        password: &str,
        force_universal: bool,
    ) -> LoginOutcome {
        if force_universal {
            tracing::trace!("Inline login disabled, using Universal Login popup");
            return self.login_with_universal_popup(Some(email)).await;
        }
        LoginOutcome::from_result(
            self.provider
                .popup_login_with_credentials(email, password)
                .await,
        )
    }

    /// Creates the database user and signs them in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        force_universal: bool,
    ) -> LoginOutcome {
        let request = SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.map(str::to_string),
        };
        if let Err(err) = self.provider.signup(&request).await {
            tracing::warn!("Sign-up failed: {}", err);
            return LoginOutcome::Failed(err);
        }
        self.login_with_email(email, password, force_universal).await
    }

    /// Full-page redirect to the provider. Completes on `/auth/callback`.
    pub fn login_with_redirect(&self, connection: Option<&str>) -> Result<(), ProviderError> {
        let options = match connection {
            Some(connection) => AuthorizeOptions::social(connection),
            None => AuthorizeOptions::default(),
        };
        self.provider.authorize_redirect(&options)
    }

    /// Tries silent authentication with a short timeout.
    pub async fn preflight(&self) -> SilentAuthSupport {
        let options = AuthorizeOptions::silent().with_timeout(self.timings.preflight_timeout_ms);
        match self.provider.check_session(&options).await {
            Ok(_) => SilentAuthSupport::Available,
            Err(err) => match err.kind() {
                ProviderErrorKind::LoginRequired
                | ProviderErrorKind::InteractionRequired
                | ProviderErrorKind::ConsentRequired => SilentAuthSupport::Available,
                ProviderErrorKind::ChannelBlocked => {
                    tracing::warn!("Silent authentication blocked: {}", err);
                    SilentAuthSupport::Blocked
                }
                _ => {
                    tracing::trace!("Preflight answered with {}, treating as available", err);
                    SilentAuthSupport::Available
                }
            },
        }
    }
}
