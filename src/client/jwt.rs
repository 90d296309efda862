//! JWT decoding utilities for extracting claims from ID tokens.
//!
//! Only the payload is decoded; no signature verification happens here. The
//! claims are used locally (expiry fallback, subject for logging) and the
//! backend validates tokens on its own.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Errors from decoding a JWT payload.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Invalid JWT format: expected 3 parts, got {0}")]
    Format(usize),

    #[error("Failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to parse JWT claims: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Standard OpenID Connect claims from an Auth0 ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Subject - unique user identifier
    pub sub: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Issued at, seconds since epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Expiration, seconds since epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Decodes the payload of a JWT ID token.
pub fn decode_id_token(token: &str) -> Result<IdTokenClaims, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(JwtError::Format(parts.len()));
    }

    let decoded_bytes = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('='))?;
    let claims: IdTokenClaims = serde_json::from_slice(&decoded_bytes)?;

    tracing::trace!("Decoded ID token for sub={}", claims.sub);
    Ok(claims)
}
