//! # dxsession
//!
//! Client-side authentication session layer for Dioxus web apps backed by Auth0.
//!
//! ## Overview
//!
//! - **Login dialog**: social, email and sign-up flows in a popup window, with
//!   a silent-auth preflight that falls back to Universal Login when the
//!   browser blocks cross-window messages
//! - **Popup protocol**: origin-pinned `postMessage` relay from the callback
//!   page, with a latch so a late success is never lost to an earlier error
//! - **Session monitors**: token expiry checks with silent renewal and
//!   periodic profile refresh, coordinated across tabs by an advisory lock in
//!   `localStorage`
//! - **Auth store**: observable `is_logged_in` / `user_profile` state mirrored
//!   into Dioxus signals
//! - **Backend client**: header injection and the `{ code, message, data }`
//!   envelope of the application API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dioxus::prelude::*;
//! use dxsession::client::{use_session_provider, use_session, PopupCallbackPage};
//!
//! #[component]
//! fn App() -> Element {
//!     use_session_provider();
//!     rsx! { Router::<Route> {} }
//! }
//!
//! #[component]
//! fn SignIn() -> Element {
//!     let session = use_session();
//!     let view = session.dialog_view();
//!     rsx! {
//!         button {
//!             disabled: view.read().leave_warning.is_some(),
//!             onclick: move |_| session.sign_in_with_social("google-oauth2".to_string()),
//!             "Continue with Google"
//!         }
//!     }
//! }
//! ```
//!
//! Mount [`client::PopupCallbackPage`] at [`config::POPUP_CALLBACK_PATH`] and
//! [`client::AuthCallbackPage`] at [`config::CALLBACK_PATH`].
//!
//! ## Platform Compatibility
//!
//! Browser APIs (windows, storage, timers) are compiled for `wasm32` only.
//! Native builds keep every state machine and the backend client, with
//! in-memory storage and stubs for the browser flows.
//!
//! ## Configuration
//!
//! [`Auth0Config::from_env`] reads `AUTH0_DOMAIN`, `AUTH0_CLIENT_ID`,
//! `AUTH0_AUDIENCE`, `API_BASE_URL` and optionally `AUTH0_REALM` at compile
//! time (see `.env.example`).

pub mod config;
pub mod profile;

pub mod client;

pub use config::{Auth0Config, SessionTimings};
pub use profile::UserProfile;
