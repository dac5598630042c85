//! # Hosted Login (session orchestration)
//!
//! `hosted-login` decides which single verification step a user must complete
//! next when signing in through the hosted login pages of the identity platform.
//!
//! ## Session references
//!
//! The browser keeps a list of session references (`id` + opaque `token`) in the
//! `sessions` cookie. Every request resolves those references against the identity
//! backend; references the backend no longer recognises are dropped instead of
//! surfacing an error, so a user with a stale tab simply starts again at the
//! identifier step.
//!
//! ## Step routing
//!
//! Login policy, the user's registered authentication methods and the factors
//! already verified in the session feed a pure state machine that returns one
//! [`login::Step`]. A factor verified in a session is never asked for again.
//!
//! ## Hand-off
//!
//! Once authenticated, requests tagged as device-code requests (`device_` prefix)
//! end on a consent step that links the session to the device authorization. All
//! other requests end with a redirect to the application continuation or the
//! policy's default redirect.

pub mod api;
pub mod cli;
pub mod login;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
