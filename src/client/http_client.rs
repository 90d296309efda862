//! Authentication-aware client for the backend REST API.
//!
//! Every request gets an `Authorization: Bearer` header with the stored access
//! token, a persistent `Device-ID` and the browser's `User-Timezone`. A request
//! that must go out unauthenticated carries the [`SKIP_AUTHORIZATION`] marker
//! header, which is stripped before transmission.
//!
//! Responses use the `{ code, message, data }` envelope; `code == 200` is the
//! success discriminator, not the HTTP status.

use crate::Auth0Config;
use crate::UserProfile;
use crate::client::storage::{KeyValueStore, keys};
use crate::client::token_storage::SessionStore;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Marker header: send this request without the bearer token.
pub const SKIP_AUTHORIZATION: &str = "Skip-Authorization";
pub const DEVICE_ID_HEADER: &str = "Device-ID";
pub const TIMEZONE_HEADER: &str = "User-Timezone";

/// Envelope code of a successful call.
pub const SUCCESS_CODE: i64 = 200;

/// Errors from backend calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(String),

    /// The envelope carried a code other than 200
    #[error("API error {code}: {message}")]
    Status { code: i64, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("No access token available")]
    MissingToken,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { code: 404, .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// `{ code, message, data? }` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// The payload of a successful envelope, or the envelope's error.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(ApiError::Status {
                code: self.code,
                message: self.message.unwrap_or_default(),
            })
        }
    }
}

/// Applies the standard headers to `headers`.
///
/// The bearer token is added unless `headers` carries [`SKIP_AUTHORIZATION`];
/// the marker itself is always removed.
pub fn inject_headers(
    mut headers: HeaderMap,
    access_token: Option<&str>,
    device_id: &str,
    timezone: &str,
) -> HeaderMap {
    let skip_authorization = headers.remove(SKIP_AUTHORIZATION).is_some();

    if skip_authorization {
        tracing::trace!("Skipping Authorization header");
    } else if let Some(token) = access_token {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("Failed to create Authorization header from token"),
        }
    } else {
        tracing::trace!("No access token available - request is unauthenticated");
    }

    if let Ok(value) = HeaderValue::from_str(device_id) {
        headers.insert(DEVICE_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(timezone) {
        headers.insert(TIMEZONE_HEADER, value);
    }
    headers
}

/// Returns the persisted device id, creating it on first use.
pub fn device_id<S: KeyValueStore>(storage: &S) -> String {
    if let Ok(Some(id)) = storage.get(keys::DEVICE_ID)
        && !id.is_empty()
    {
        return id;
    }

    let id = generate_device_id();
    if let Err(e) = storage.set(keys::DEVICE_ID, &id) {
        tracing::warn!("Failed to persist device id: {}", e);
    }
    id
}

fn generate_device_id() -> String {
    use rand::Rng;

    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// IANA time zone of the browser.
#[cfg(target_arch = "wasm32")]
pub fn timezone() -> String {
    let options = js_sys::Intl::DateTimeFormat::new(&js_sys::Array::new(), &js_sys::Object::new())
        .resolved_options();
    js_sys::Reflect::get(&options, &wasm_bindgen::JsValue::from_str("timeZone"))
        .ok()
        .and_then(|v| v.as_string())
        .unwrap_or_else(|| "UTC".to_string())
}

/// Non-WASM stub for timezone.
#[cfg(not(target_arch = "wasm32"))]
pub fn timezone() -> String {
    "UTC".to_string()
}

/// Avatar upload attached to a profile update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Avatar {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Fields of `PUT /api/v1/users/update`. `None` fields are not sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub status: Option<String>,
    pub avatar: Option<Avatar>,
}

impl ProfileUpdate {
    fn into_form(self) -> Result<reqwest::multipart::Form, ApiError> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in [("name", self.name), ("bio", self.bio), ("status", self.status)] {
            if let Some(value) = value {
                form = form.text(name, value);
            }
        }
        if let Some(avatar) = self.avatar {
            let part = reqwest::multipart::Part::bytes(avatar.bytes)
                .file_name(avatar.file_name)
                .mime_str(&avatar.mime_type)
                .map_err(|e| ApiError::Transport(e.to_string()))?;
            form = form.part("picture", part);
        }
        Ok(form)
    }
}

/// Body of `POST /api/v1/report/create`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportRequest {
    pub target_id: String,
    pub target_type: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Serialize)]
struct PostAction<'a> {
    post_id: &'a str,
    value: bool,
}

/// Backend calls made by the session layer and the interaction buttons.
#[allow(async_fn_in_trait)]
pub trait BackendApi {
    /// Creates or updates the backend user for the current token.
    async fn sync_user(&self) -> Result<(), ApiError>;

    async fn fetch_profile(&self) -> Result<UserProfile, ApiError>;

    async fn update_profile(&self, update: ProfileUpdate) -> Result<Option<UserProfile>, ApiError>;

    async fn like_post(&self, post_id: &str, liked: bool) -> Result<(), ApiError>;

    async fn favorite_post(&self, post_id: &str, favorited: bool) -> Result<(), ApiError>;

    async fn create_report(&self, report: &ReportRequest) -> Result<(), ApiError>;
}

macro_rules! forward_backend_api {
    ($($ptr:ident)::+) => {
        impl<T: BackendApi> BackendApi for $($ptr)::+<T> {
            async fn sync_user(&self) -> Result<(), ApiError> {
                (**self).sync_user().await
            }

            async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
                (**self).fetch_profile().await
            }

            async fn update_profile(
                &self,
                update: ProfileUpdate,
            ) -> Result<Option<UserProfile>, ApiError> {
                (**self).update_profile(update).await
            }

            async fn like_post(&self, post_id: &str, liked: bool) -> Result<(), ApiError> {
                (**self).like_post(post_id, liked).await
            }

            async fn favorite_post(&self, post_id: &str, favorited: bool) -> Result<(), ApiError> {
                (**self).favorite_post(post_id, favorited).await
            }

            async fn create_report(&self, report: &ReportRequest) -> Result<(), ApiError> {
                (**self).create_report(report).await
            }
        }
    };
}

forward_backend_api!(std::sync::Arc);
forward_backend_api!(std::rc::Rc);

/// [`BackendApi`] over HTTP, authenticated from the stored session.
#[derive(Clone)]
pub struct HttpBackend<S> {
    config: Auth0Config,
    session: SessionStore<S>,
    http: reqwest::Client,
}

impl<S: KeyValueStore> HttpBackend<S> {
    pub fn new(config: Auth0Config, storage: S) -> Self {
        Self {
            config,
            session: SessionStore::new(storage),
            http: reqwest::Client::new(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let token = self.session.access_token();
        inject_headers(
            HeaderMap::new(),
            token.as_deref(),
            &device_id(self.session.storage()),
            &timezone(),
        )
    }

    fn require_token(&self) -> Result<(), ApiError> {
        match self.session.access_token() {
            Some(_) => Ok(()),
            None => Err(ApiError::MissingToken),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let response = request.headers(self.headers()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_response(status, &body)
    }
}

/// Unwraps the envelope in `body`. A non-2xx status without an envelope
/// becomes a `Status` error carrying the HTTP code.
fn decode_response<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<Option<T>, ApiError> {
    match serde_json::from_str::<ApiEnvelope<T>>(body) {
        Ok(envelope) => envelope.into_result(),
        Err(_) if !status.is_success() => Err(ApiError::Status {
            code: i64::from(status.as_u16()),
            message: status.canonical_reason().unwrap_or("").to_string(),
        }),
        Err(e) => Err(ApiError::Decode(e.to_string())),
    }
}

impl<S: KeyValueStore> BackendApi for HttpBackend<S> {
    async fn sync_user(&self) -> Result<(), ApiError> {
        self.require_token()?;
        tracing::trace!("Syncing user with backend");
        let request = self.http.post(self.config.api_url("/api/v1/users/sync_user"));
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let request = self.http.get(self.config.api_url("/api/v1/users/me/profile"));
        self.send::<UserProfile>(request)
            .await?
            .ok_or_else(|| ApiError::Decode("profile response has no data".to_string()))
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<Option<UserProfile>, ApiError> {
        self.require_token()?;
        let request = self
            .http
            .put(self.config.api_url("/api/v1/users/update"))
            .multipart(update.into_form()?);
        self.send::<UserProfile>(request).await
    }

    async fn like_post(&self, post_id: &str, liked: bool) -> Result<(), ApiError> {
        self.require_token()?;
        let request = self
            .http
            .post(self.config.api_url("/api/v1/posts/like"))
            .json(&PostAction { post_id, value: liked });
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn favorite_post(&self, post_id: &str, favorited: bool) -> Result<(), ApiError> {
        self.require_token()?;
        let request = self
            .http
            .post(self.config.api_url("/api/v1/posts/favorite"))
            .json(&PostAction {
                post_id,
                value: favorited,
            });
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn create_report(&self, report: &ReportRequest) -> Result<(), ApiError> {
        self.require_token()?;
        let request = self
            .http
            .post(self.config.api_url("/api/v1/report/create"))
            .json(report);
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }
}
