//! Logic of the callback pages the identity provider redirects to.
//!
//! - `/auth/popup-callback` runs inside the popup: it parses the hash,
//!   posts the result to `window.opener` pinned to its own origin, and closes
//!   itself after a short delay so the message dispatch completes first.
//! - `/auth/callback` runs in the main window after a redirect login: the
//!   page parses its own hash and hands the tokens to the login dialog.

use crate::client::authorization::{AuthorizationResponse, PopupMessage, parse_hash};

/// Message the popup callback page sends for `hash`.
pub fn relay_message(hash: &str) -> PopupMessage {
    PopupMessage::authorization(parse_hash(hash))
}

/// Posts the current hash to the opener and schedules `window.close()`.
#[cfg(target_arch = "wasm32")]
pub fn relay_to_opener(close_delay_ms: u64) -> Result<(), crate::client::provider::ProviderError> {
    use crate::client::provider::ProviderError;
    use wasm_bindgen::JsCast;

    let window = web_sys::window().ok_or_else(|| ProviderError::unsupported("popup callback"))?;
    let location = window.location();
    let hash = location.hash().unwrap_or_default();
    let origin = location
        .origin()
        .map_err(|e| ProviderError::new("callback_error", format!("{:?}", e)))?;

    let message = relay_message(&hash);
    if !message.response.is_success() {
        tracing::warn!("Popup callback received an error response");
    }

    let opener = window
        .opener()
        .ok()
        .filter(|opener| !opener.is_null() && !opener.is_undefined())
        .and_then(|opener| opener.dyn_into::<web_sys::Window>().ok())
        .ok_or_else(|| ProviderError::new("callback_error", "Popup has no opener window"))?;

    let json = serde_json::to_string(&message)
        .map_err(|e| ProviderError::new("callback_error", e.to_string()))?;
    let payload = js_sys::JSON::parse(&json)
        .map_err(|e| ProviderError::new("callback_error", format!("{:?}", e)))?;
    opener
        .post_message(&payload, &origin)
        .map_err(|e| ProviderError::new("callback_error", format!("{:?}", e)))?;
    tracing::trace!("Authorization response relayed to opener");

    let closing = window.clone();
    gloo_timers::callback::Timeout::new(close_delay_ms as u32, move || {
        let _ = closing.close();
    })
    .forget();

    Ok(())
}

/// Reads and clears the main window's hash after a redirect login.
#[cfg(target_arch = "wasm32")]
pub fn take_redirect_response() -> Option<AuthorizationResponse> {
    let window = web_sys::window()?;
    let location = window.location();
    let hash = location.hash().ok().filter(|h| h.len() > 1)?;

    // Keep tokens out of the history entry
    if let Ok(history) = window.history() {
        let path = location.pathname().unwrap_or_default();
        let _ = history.replace_state_with_url(&wasm_bindgen::JsValue::NULL, "", Some(&path));
    }

    Some(parse_hash(&hash))
}

/// Non-WASM stub for take_redirect_response.
#[cfg(not(target_arch = "wasm32"))]
pub fn take_redirect_response() -> Option<AuthorizationResponse> {
    tracing::warn!("Redirect callback not supported in non-WASM builds");
    None
}
