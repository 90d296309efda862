//! Authorization results carried in URL hash fragments and relayed between
//! windows with `postMessage`.
//!
//! The identity provider returns its result in the *hash* of the redirect URI:
//!
//! ```text
//! #access_token=...&id_token=...&expires_in=7200&state=...&token_type=Bearer
//! #error=access_denied&error_description=User%20cancelled
//! ```
//!
//! The popup callback page turns that into a [`PopupMessage`]:
//!
//! ```text
//! { "type": "authorization_response",
//!   "response": { "access_token": ..., "expires_in": ..., ... } }
//! { "type": "authorization_response",
//!   "response": { "error": ..., "errorDescription": ... } }
//! ```

use crate::client::token_storage::SessionCredentials;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Message `type` used for relayed authorization results.
pub const AUTHORIZATION_RESPONSE: &str = "authorization_response";

/// Token fields of a successful authorization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Lifetime in seconds. Accepts the string form posted by browser pages.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_u64"
    )]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl TokenFragment {
    /// Converts the fragment into credentials received at `now_ms`.
    ///
    /// Without `expires_in`, the ID token's `exp` claim is used instead.
    /// Returns `None` when there is no access token or no way to date it.
    pub fn credentials(&self, now_ms: u64) -> Option<SessionCredentials> {
        let access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        let id_token = self.id_token.clone().unwrap_or_default();

        if let Some(expires_in) = self.expires_in {
            return Some(SessionCredentials::from_expires_in(
                access_token,
                id_token,
                expires_in,
                now_ms,
            ));
        }

        let exp = crate::client::jwt::decode_id_token(&id_token).ok()?.exp?;
        Some(SessionCredentials {
            access_token,
            id_token,
            expires_at: exp.saturating_mul(1000),
        })
    }
}

/// Error fields of a failed authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationError {
    pub error: String,
    #[serde(
        rename = "errorDescription",
        alias = "error_description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_description: Option<String>,
}

/// Outcome of an authorization round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorizationResponse {
    Error(AuthorizationError),
    Success(TokenFragment),
}

impl AuthorizationResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Parses a redirect hash fragment (leading `#` optional).
///
/// A fragment with an `error` field is an error regardless of other fields.
pub fn parse_hash(hash: &str) -> AuthorizationResponse {
    let raw = hash.strip_prefix('#').unwrap_or(hash);
    let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(raw) {
        Ok(pairs) => pairs,
        Err(e) => {
            tracing::warn!("Unparsable authorization fragment: {}", e);
            return AuthorizationResponse::Error(AuthorizationError {
                error: "invalid_hash".to_string(),
                error_description: Some(e.to_string()),
            });
        }
    };
    let mut fields: HashMap<String, String> = pairs.into_iter().collect();

    if let Some(error) = fields.remove("error") {
        return AuthorizationResponse::Error(AuthorizationError {
            error,
            error_description: fields.remove("error_description"),
        });
    }

    AuthorizationResponse::Success(TokenFragment {
        access_token: fields.remove("access_token"),
        id_token: fields.remove("id_token"),
        expires_in: fields
            .remove("expires_in")
            .and_then(|v| v.trim().parse().ok()),
        state: fields.remove("state"),
        token_type: fields.remove("token_type"),
    })
}

/// The cross-window message carrying an [`AuthorizationResponse`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub response: AuthorizationResponse,
}

impl PopupMessage {
    pub fn authorization(response: AuthorizationResponse) -> Self {
        Self {
            kind: AUTHORIZATION_RESPONSE.to_string(),
            response,
        }
    }

    pub fn is_authorization_response(&self) -> bool {
        self.kind == AUTHORIZATION_RESPONSE
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
    }
}
