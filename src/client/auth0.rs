//! Long-lived Auth0 client.
//!
//! Builds implicit-flow authorize URLs (`response_type=token id_token`) and
//! drives them in a popup, a hidden iframe, or a full-page redirect. Email and
//! password sign-in uses the password-realm grant of `/oauth/token`, sign-up
//! uses `/dbconnections/signup`; both are plain HTTP calls through `reqwest`.

use crate::Auth0Config;
use crate::client::authorization::TokenFragment;
use crate::client::provider::{AuthorizeOptions, IdentityProvider, ProviderError, SignupRequest};
use crate::config::SessionTimings;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Grant type of Auth0's realm-aware resource owner password flow.
const PASSWORD_REALM_GRANT: &str = "http://auth0.com/oauth/grant-type/password-realm";

/// Token response from the Auth0 token endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl From<TokenResponse> for TokenFragment {
    fn from(response: TokenResponse) -> Self {
        TokenFragment {
            access_token: Some(response.access_token),
            id_token: response.id_token,
            expires_in: response.expires_in,
            state: None,
            token_type: response.token_type,
        }
    }
}

/// Error body from Auth0. The token endpoint uses `error`/`error_description`,
/// the sign-up endpoint `code`/`description`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorResponse {
    fn into_provider_error(self, fallback_code: &str) -> ProviderError {
        let description = self
            .error_description
            .or_else(|| match self.description {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Object(map)) => map
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .or(self.message);

        ProviderError {
            code: self
                .error
                .or(self.code)
                .unwrap_or_else(|| fallback_code.to_string()),
            description,
        }
    }
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout("request to Auth0")
    } else {
        ProviderError::new("request_error", e.to_string())
    }
}

/// Generates a random value for the `state` parameter.
pub fn generate_state() -> String {
    random_token(16)
}

/// Generates a random value for the `nonce` parameter.
pub fn generate_nonce() -> String {
    random_token(16)
}

fn random_token(len: usize) -> String {
    use rand::Rng;

    let random_bytes: Vec<u8> = rand::thread_rng()
        .sample_iter(rand::distributions::Standard)
        .take(len)
        .collect();

    URL_SAFE_NO_PAD.encode(&random_bytes)
}

/// Error for a popup that ended without tokens or a reported error.
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
fn popup_fallback_error(timed_out: bool) -> ProviderError {
    if timed_out {
        ProviderError::timeout("popup")
    } else {
        ProviderError::new(
            "popup_closed",
            "The sign-in window was closed before completing",
        )
    }
}

/// The application's single Auth0 client.
#[derive(Clone)]
pub struct Auth0Client {
    config: Auth0Config,
    timings: SessionTimings,
    origin: String,
    http: reqwest::Client,
}

impl Auth0Client {
    /// Creates a client for an app served from `origin` (e.g. `https://app.example.com`).
    pub fn new(config: Auth0Config, timings: SessionTimings, origin: impl Into<String>) -> Self {
        Self {
            config,
            timings,
            origin: origin.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Creates a client for the current window's origin.
    #[cfg(target_arch = "wasm32")]
    pub fn for_current_window(
        config: Auth0Config,
        timings: SessionTimings,
    ) -> Result<Self, ProviderError> {
        let origin = web_sys::window()
            .and_then(|w| w.location().origin().ok())
            .ok_or_else(|| ProviderError::unsupported("Auth0 client without window"))?;
        Ok(Self::new(config, timings, origin))
    }

    pub fn config(&self) -> &Auth0Config {
        &self.config
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Builds an implicit-flow authorize URL.
    ///
    /// `response_mode` is `None` for fragment responses and `Some("web_message")`
    /// for iframe session checks.
    pub fn build_authorize_url(
        &self,
        options: &AuthorizeOptions,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        response_mode: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}?response_type={}&client_id={}&redirect_uri={}&scope={}&audience={}&state={}&nonce={}",
            self.config.authorize_url(),
            urlencoding::encode("token id_token"),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.config.scope),
            urlencoding::encode(&self.config.audience),
            urlencoding::encode(state),
            urlencoding::encode(nonce),
        );

        let optional = [
            ("connection", options.connection.as_deref()),
            ("prompt", options.prompt.as_deref()),
            ("login_hint", options.login_hint.as_deref()),
            ("screen_hint", options.screen_hint.as_deref()),
            ("response_mode", response_mode),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                url.push('&');
                url.push_str(name);
                url.push('=');
                url.push_str(&urlencoding::encode(value));
            }
        }
        url
    }

    async fn credentials_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenFragment, ProviderError> {
        tracing::trace!("Requesting tokens with password-realm grant");

        let body = serde_json::json!({
            "grant_type": PASSWORD_REALM_GRANT,
            "client_id": self.config.client_id,
            "username": username,
            "password": password,
            "realm": self.config.realm,
            "audience": self.config.audience,
            "scope": self.config.scope,
        });

        let response = self
            .http
            .post(self.config.token_url())
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if response.status().is_success() {
            let tokens: TokenResponse = response.json().await.map_err(|e| {
                ProviderError::new("invalid_response", format!("Failed to parse token response: {}", e))
            })?;
            Ok(tokens.into())
        } else {
            let error: ErrorResponse = response.json().await.unwrap_or_default();
            let error = error.into_provider_error("access_denied");
            tracing::warn!("Credentials login rejected: {}", error);
            Err(error)
        }
    }

    async fn database_signup(&self, request: &SignupRequest) -> Result<(), ProviderError> {
        tracing::trace!("Creating database user");

        let mut body = serde_json::json!({
            "client_id": self.config.client_id,
            "email": request.email,
            "password": request.password,
            "connection": self.config.realm,
        });
        if let Some(name) = &request.name {
            body["name"] = serde_json::Value::String(name.clone());
        }

        let response = self
            .http
            .post(self.config.signup_url())
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            let error: ErrorResponse = response.json().await.unwrap_or_default();
            Err(error.into_provider_error("invalid_signup"))
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl Auth0Client {
    /// Opens the authorize URL in a popup and waits for either channel.
    async fn run_popup(&self, options: &AuthorizeOptions) -> Result<TokenFragment, ProviderError> {
        use crate::client::authorization::parse_hash;
        use crate::client::clock::{Clock, SystemClock};
        use crate::client::popup::{MessageGuard, PopupAttempt, PopupBridge};

        let window = web_sys::window().ok_or_else(|| ProviderError::unsupported("popup"))?;
        let redirect_uri = self.config.popup_callback_uri(&self.origin);
        let state = generate_state();
        let url = self.build_authorize_url(options, &redirect_uri, &state, &generate_nonce(), None);
        let timeout_ms = options.timeout_ms.unwrap_or(self.timings.listener_timeout_ms);

        // Listen before opening so an instant answer is not lost
        let mut bridge = PopupBridge::listen(timeout_ms)?;
        let popup = window
            .open_with_url_and_target_and_features(
                &url,
                "auth0:authorize:popup",
                "width=500,height=640,menubar=no,toolbar=no",
            )
            .map_err(|e| ProviderError::new("popup_error", format!("{:?}", e)))?
            .ok_or_else(|| ProviderError::new("popup_blocked", "The sign-in popup was blocked"))?;
        tracing::trace!("Popup opened for {:?}", options.connection);

        let mut attempt = PopupAttempt::new(MessageGuard::new(
            self.origin.clone(),
            SystemClock.now_ms(),
            timeout_ms,
        ));
        let mut native_read = false;
        let mut closed_ticks = 0;
        let mut timed_out = false;

        loop {
            while let Some((origin, payload)) = bridge.try_next() {
                if let Some(tokens) = attempt.on_message(&origin, &payload) {
                    let _ = popup.close();
                    return Ok(tokens);
                }
            }

            // Reading the popup location throws until it is same-origin again
            if !native_read
                && let Ok(href) = popup.location().href()
                && href.starts_with(&redirect_uri)
            {
                native_read = true;
                let hash = popup.location().hash().unwrap_or_default();
                let result = parse_hash(&hash).into_result().and_then(|tokens| {
                    if tokens.state.as_deref() == Some(state.as_str()) {
                        Ok(tokens)
                    } else {
                        Err(ProviderError::new("invalid_token", "`state` does not match."))
                    }
                });
                if let Some(tokens) = attempt.on_native_result(result) {
                    let _ = popup.close();
                    return Ok(tokens);
                }
            }

            if popup.closed().unwrap_or(true) {
                // Give an in-flight message one more tick to arrive
                closed_ticks += 1;
                if closed_ticks > 2 {
                    break;
                }
            }
            if attempt.is_expired(SystemClock.now_ms()) {
                tracing::warn!("Popup listener timed out");
                let _ = popup.close();
                timed_out = true;
                break;
            }

            gloo_timers::future::TimeoutFuture::new(100).await;
        }

        Err(attempt.into_error(popup_fallback_error(timed_out)))
    }

    /// Runs a `prompt=none` authorize in a hidden iframe (`web_message` mode).
    async fn run_silent(&self, options: &AuthorizeOptions) -> Result<TokenFragment, ProviderError> {
        use crate::client::clock::{Clock, SystemClock};
        use crate::client::popup::{MessageGuard, PopupAttempt, PopupBridge};
        use wasm_bindgen::JsCast;

        let js_error = |e: wasm_bindgen::JsValue| ProviderError::new("iframe_error", format!("{:?}", e));

        let window = web_sys::window().ok_or_else(|| ProviderError::unsupported("checkSession"))?;
        let document = window
            .document()
            .ok_or_else(|| ProviderError::unsupported("checkSession"))?;
        let body = document
            .body()
            .ok_or_else(|| ProviderError::unsupported("checkSession"))?;

        let state = generate_state();
        let url = self.build_authorize_url(
            options,
            &self.origin,
            &state,
            &generate_nonce(),
            Some("web_message"),
        );
        let timeout_ms = options.timeout_ms.unwrap_or(self.timings.listener_timeout_ms);

        let mut bridge = PopupBridge::listen(timeout_ms)?;
        let iframe: web_sys::HtmlIFrameElement = document
            .create_element("iframe")
            .map_err(js_error)?
            .dyn_into()
            .map_err(|_| ProviderError::new("iframe_error", "not an iframe"))?;
        iframe.set_src(&url);
        let _ = iframe.style().set_property("display", "none");
        body.append_child(&iframe).map_err(js_error)?;

        let mut attempt = PopupAttempt::new(MessageGuard::new(
            self.config.base_url(),
            SystemClock.now_ms(),
            timeout_ms,
        ));

        let result = loop {
            let mut completed = None;
            while let Some((origin, payload)) = bridge.try_next() {
                if let Some(tokens) = attempt.on_message(&origin, &payload) {
                    completed = Some(tokens);
                    break;
                }
            }
            if let Some(tokens) = completed {
                break Some(tokens);
            }
            // Silent errors (login_required, ...) are final
            if !attempt.errors().is_empty() || attempt.is_expired(SystemClock.now_ms()) {
                break None;
            }
            gloo_timers::future::TimeoutFuture::new(50).await;
        };
        iframe.remove();
        drop(bridge);

        match result {
            Some(tokens) if tokens.state.as_deref() == Some(state.as_str()) => Ok(tokens),
            Some(_) => Err(ProviderError::new("invalid_token", "`state` does not match.")),
            None => Err(attempt.into_error(ProviderError::timeout("checkSession"))),
        }
    }
}

impl IdentityProvider for Auth0Client {
    async fn popup_authorize(
        &self,
        options: &AuthorizeOptions,
    ) -> Result<TokenFragment, ProviderError> {
        #[cfg(target_arch = "wasm32")]
        {
            self.run_popup(options).await
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            tracing::warn!("Popup login not supported in non-WASM builds: {:?}", options);
            Err(ProviderError::unsupported("popup login"))
        }
    }

    async fn popup_login_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenFragment, ProviderError> {
        self.credentials_grant(username, password).await
    }

    async fn check_session(
        &self,
        options: &AuthorizeOptions,
    ) -> Result<TokenFragment, ProviderError> {
        #[cfg(target_arch = "wasm32")]
        {
            self.run_silent(options).await
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            tracing::warn!("checkSession not supported in non-WASM builds: {:?}", options);
            Err(ProviderError::unsupported("checkSession"))
        }
    }

    async fn signup(&self, request: &SignupRequest) -> Result<(), ProviderError> {
        self.database_signup(request).await
    }

    fn authorize_redirect(&self, options: &AuthorizeOptions) -> Result<(), ProviderError> {
        let url = self.build_authorize_url(
            options,
            &self.config.callback_uri(&self.origin),
            &generate_state(),
            &generate_nonce(),
            None,
        );

        #[cfg(target_arch = "wasm32")]
        {
            tracing::trace!("Redirecting to Auth0: {}", url);
            let window = web_sys::window().ok_or_else(|| ProviderError::unsupported("redirect"))?;
            window
                .location()
                .set_href(&url)
                .map_err(|e| ProviderError::new("redirect_error", format!("{:?}", e)))
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            tracing::warn!("Redirect login not supported in non-WASM builds: {}", url);
            Err(ProviderError::unsupported("redirect login"))
        }
    }

    fn logout_url(&self, return_to: &str) -> String {
        format!(
            "{}?client_id={}&returnTo={}",
            self.config.logout_url(),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(return_to)
        )
    }
}
