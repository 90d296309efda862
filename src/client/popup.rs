//! Popup authentication protocol, opener side.
//!
//! A popup authorization can report back through two channels: the
//! provider-native channel (the opener reading the popup's callback URL once
//! it is same-origin again) and the `postMessage` relay sent by the popup
//! callback page. Both feed one [`PopupAttempt`]:
//!
//! - messages are accepted only from the expected origin and only with
//!   `type == "authorization_response"`;
//! - a success latches the attempt and is delivered exactly once;
//! - errors are delivered but do not latch, so a later success still wins;
//! - a provider-native `invalid_token` error about `state` is dropped, since
//!   that check gives false negatives in some browsers while the relay
//!   carries the valid result;
//! - after the listener timeout the attempt is abandoned.

use crate::client::authorization::{PopupMessage, TokenFragment};
use crate::client::provider::{ProviderError, ProviderErrorKind};

/// Channel a popup result arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Read by the opener from the popup window itself.
    Native,
    /// Relayed by the callback page through `postMessage`.
    Message,
}

/// One-shot completion latch shared by both channels.
#[derive(Debug, Default)]
pub struct PopupLatch {
    invoked: bool,
}

impl PopupLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.invoked
    }

    /// Offers a result; returns what should reach the caller, if anything.
    pub fn offer(
        &mut self,
        channel: Channel,
        result: Result<TokenFragment, ProviderError>,
    ) -> Option<Result<TokenFragment, ProviderError>> {
        if self.invoked {
            tracing::trace!("Popup already completed, dropping {:?} result", channel);
            return None;
        }

        match result {
            Ok(tokens) => {
                self.invoked = true;
                Some(Ok(tokens))
            }
            Err(err)
                if channel == Channel::Native
                    && err.kind() == ProviderErrorKind::StateMismatch =>
            {
                tracing::warn!("Ignoring provider state mismatch, waiting for relay: {}", err);
                None
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Filters incoming window messages for one attempt.
#[derive(Clone, Debug)]
pub struct MessageGuard {
    expected_origin: String,
    registered_at: u64,
    timeout_ms: u64,
}

impl MessageGuard {
    pub fn new(expected_origin: impl Into<String>, registered_at: u64, timeout_ms: u64) -> Self {
        Self {
            expected_origin: expected_origin.into(),
            registered_at,
            timeout_ms,
        }
    }

    pub fn expected_origin(&self) -> &str {
        &self.expected_origin
    }

    /// Parses `payload` if it came from the expected origin and is an
    /// authorization response. Anything else is a no-op.
    pub fn accept(&self, origin: &str, payload: &str) -> Option<PopupMessage> {
        if origin != self.expected_origin {
            tracing::trace!("Ignoring message from foreign origin {}", origin);
            return None;
        }

        let message: PopupMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(_) => {
                tracing::trace!("Ignoring unrelated message");
                return None;
            }
        };

        message.is_authorization_response().then_some(message)
    }

    /// True once the listener has outlived its timeout.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.registered_at) >= self.timeout_ms
    }
}

/// State of one popup authorization across both channels.
#[derive(Debug)]
pub struct PopupAttempt {
    latch: PopupLatch,
    guard: MessageGuard,
    errors: Vec<ProviderError>,
}

impl PopupAttempt {
    pub fn new(guard: MessageGuard) -> Self {
        Self {
            latch: PopupLatch::new(),
            guard,
            errors: Vec::new(),
        }
    }

    /// Handles a raw window message. Returns the tokens if this completed the attempt.
    pub fn on_message(&mut self, origin: &str, payload: &str) -> Option<TokenFragment> {
        let message = self.guard.accept(origin, payload)?;
        self.deliver(Channel::Message, message.response.into_result())
    }

    /// Handles a result read from the popup window itself.
    pub fn on_native_result(
        &mut self,
        result: Result<TokenFragment, ProviderError>,
    ) -> Option<TokenFragment> {
        self.deliver(Channel::Native, result)
    }

    fn deliver(
        &mut self,
        channel: Channel,
        result: Result<TokenFragment, ProviderError>,
    ) -> Option<TokenFragment> {
        match self.latch.offer(channel, result)? {
            Ok(tokens) => Some(tokens),
            Err(err) => {
                tracing::trace!("Popup reported error over {:?}: {}", channel, err);
                self.errors.push(err);
                None
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.latch.is_complete()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.guard.is_expired(now_ms)
    }

    /// Errors delivered so far, oldest first.
    pub fn errors(&self) -> &[ProviderError] {
        &self.errors
    }

    /// Final error for an attempt that never succeeded.
    pub fn into_error(mut self, fallback: ProviderError) -> ProviderError {
        self.errors.pop().unwrap_or(fallback)
    }
}

/// Window `message` listener feeding a channel; removed on drop or after
/// the listener timeout, whichever comes first.
#[cfg(target_arch = "wasm32")]
pub struct PopupBridge {
    listener: std::rc::Rc<BridgeListener>,
    _timeout: gloo_timers::callback::Timeout,
    rx: tokio::sync::mpsc::UnboundedReceiver<(String, String)>,
}

#[cfg(target_arch = "wasm32")]
struct BridgeListener {
    window: web_sys::Window,
    closure: std::cell::RefCell<
        Option<wasm_bindgen::closure::Closure<dyn FnMut(web_sys::MessageEvent)>>,
    >,
}

#[cfg(target_arch = "wasm32")]
impl BridgeListener {
    fn detach(&self) {
        use wasm_bindgen::JsCast;

        if let Some(closure) = self.closure.borrow_mut().take() {
            let _ = self
                .window
                .remove_event_listener_with_callback("message", closure.as_ref().unchecked_ref());
            tracing::trace!("Popup message listener removed");
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl PopupBridge {
    /// Starts listening for window messages for at most `timeout_ms`.
    pub fn listen(timeout_ms: u64) -> Result<Self, ProviderError> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen::closure::Closure;

        let window = web_sys::window().ok_or_else(|| ProviderError::unsupported("popup"))?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let closure = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
            move |event: web_sys::MessageEvent| {
                let payload = js_sys::JSON::stringify(&event.data())
                    .ok()
                    .and_then(|s| s.as_string());
                if let Some(payload) = payload {
                    let _ = tx.send((event.origin(), payload));
                }
            },
        );
        window
            .add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
            .map_err(|e| ProviderError::new("listener_error", format!("{:?}", e)))?;

        let listener = std::rc::Rc::new(BridgeListener {
            window,
            closure: std::cell::RefCell::new(Some(closure)),
        });
        let on_timeout = std::rc::Rc::clone(&listener);
        let timeout = gloo_timers::callback::Timeout::new(timeout_ms as u32, move || {
            tracing::trace!("Popup listener timed out");
            on_timeout.detach();
        });

        Ok(Self {
            listener,
            _timeout: timeout,
            rx,
        })
    }

    /// Next `(origin, json payload)` received since the last call.
    pub fn try_next(&mut self) -> Option<(String, String)> {
        self.rx.try_recv().ok()
    }
}

#[cfg(target_arch = "wasm32")]
impl Drop for PopupBridge {
    fn drop(&mut self) {
        self.listener.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://app.example.com";

    fn success_payload(token: &str) -> String {
        format!(
            r#"{{"type":"authorization_response","response":{{"access_token":"{}","expires_in":"3600"}}}}"#,
            token
        )
    }

    fn error_payload() -> String {
        r#"{"type":"authorization_response","response":{"error":"access_denied","errorDescription":"User cancelled"}}"#
            .to_string()
    }

    fn attempt() -> PopupAttempt {
        PopupAttempt::new(MessageGuard::new(ORIGIN, 0, 60_000))
    }

    fn tokens(token: &str) -> TokenFragment {
        TokenFragment {
            access_token: Some(token.to_string()),
            ..TokenFragment::default()
        }
    }

    #[test]
    fn test_success_on_both_channels_completes_once() {
        let mut attempt = attempt();
        let mut completions = 0;

        if attempt.on_message(ORIGIN, &success_payload("abc")).is_some() {
            completions += 1;
        }
        if attempt.on_native_result(Ok(tokens("abc"))).is_some() {
            completions += 1;
        }

        assert_eq!(completions, 1);
        assert!(attempt.is_complete());
    }

    #[test]
    fn test_native_success_then_message_completes_once() {
        let mut attempt = attempt();
        assert!(attempt.on_native_result(Ok(tokens("abc"))).is_some());
        assert!(attempt.on_message(ORIGIN, &success_payload("abc")).is_none());
    }

    #[test]
    fn test_foreign_origin_is_ignored() {
        let mut attempt = attempt();
        assert!(
            attempt
                .on_message("https://evil.example.com", &success_payload("stolen"))
                .is_none()
        );
        assert!(!attempt.is_complete());
        assert!(attempt.errors().is_empty());
    }

    #[test]
    fn test_unrelated_messages_are_ignored() {
        let mut attempt = attempt();
        assert!(attempt.on_message(ORIGIN, r#"{"type":"webpackOk"}"#).is_none());
        assert!(attempt.on_message(ORIGIN, "\"hello\"").is_none());
        assert!(attempt.errors().is_empty());
    }

    #[test]
    fn test_error_then_late_success_wins() {
        let mut attempt = attempt();
        assert!(attempt.on_message(ORIGIN, &error_payload()).is_none());
        assert_eq!(attempt.errors().len(), 1);

        let tokens = attempt.on_message(ORIGIN, &success_payload("late")).unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("late"));
    }

    #[test]
    fn test_errors_after_success_are_dropped() {
        let mut attempt = attempt();
        attempt.on_message(ORIGIN, &success_payload("abc")).unwrap();
        attempt.on_message(ORIGIN, &error_payload());
        assert!(attempt.errors().is_empty());
    }

    #[test]
    fn test_native_state_mismatch_is_suppressed() {
        let mut attempt = attempt();
        let mismatch = ProviderError::new("invalid_token", "`state` does not match.");
        assert!(attempt.on_native_result(Err(mismatch.clone())).is_none());
        assert!(attempt.errors().is_empty());

        // The same error over the relay is reported
        let mut latch = PopupLatch::new();
        assert_eq!(
            latch.offer(Channel::Message, Err(mismatch.clone())),
            Some(Err(mismatch))
        );
    }

    #[test]
    fn test_error_relay_never_yields_success() {
        let mut attempt = attempt();
        assert!(attempt.on_message(ORIGIN, &error_payload()).is_none());
        assert!(!attempt.is_complete());

        let err = attempt.into_error(ProviderError::timeout("popup"));
        assert_eq!(err.code, "access_denied");
        assert_eq!(err.description.as_deref(), Some("User cancelled"));
    }

    #[test]
    fn test_into_error_falls_back() {
        let err = attempt().into_error(ProviderError::timeout("popup"));
        assert_eq!(err.code, "timeout");
    }

    #[test]
    fn test_listener_expiry() {
        let guard = MessageGuard::new(ORIGIN, 1_000, 60_000);
        assert!(!guard.is_expired(60_999));
        assert!(guard.is_expired(61_000));
    }
}
