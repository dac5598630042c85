//! Cookie-backed [`SessionCookieStore`] for one HTTP request/response.
//!
//! The `sessions` cookie holds base64url(JSON list of references). The encoded
//! value never exceeds [`MAX_COOKIE_SIZE`]; the oldest references are evicted
//! first when it would.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::{
    store::{recency, InMemorySessionStore, SessionCookieStore},
    types::SessionReference,
};

pub const SESSION_COOKIE_NAME: &str = "sessions";
pub const MAX_COOKIE_SIZE: usize = 2048;

/// Attributes of the `Set-Cookie` header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CookieOptions {
    secure: bool,
    iframe: bool,
    max_age_seconds: Option<u64>,
}

impl CookieOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Embedding in an iframe needs `SameSite=None`, which browsers only accept with `Secure`.
    #[must_use]
    pub fn with_iframe(mut self, iframe: bool) -> Self {
        self.iframe = iframe;
        self
    }

    #[must_use]
    pub fn with_max_age_seconds(mut self, max_age_seconds: u64) -> Self {
        self.max_age_seconds = Some(max_age_seconds);
        self
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure || self.iframe
    }

    #[must_use]
    pub fn iframe(&self) -> bool {
        self.iframe
    }
}

#[derive(Debug, Default)]
pub struct CookieSessionStore {
    inner: InMemorySessionStore,
    dirty: AtomicBool,
}

impl CookieSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the references carried by the request's `Cookie` headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .find_map(find_sessions_cookie);
        Self::from_cookie_value(value)
    }

    /// Malformed values are treated as an empty store.
    #[must_use]
    pub fn from_cookie_value(value: Option<&str>) -> Self {
        let references = value.map(decode).unwrap_or_default();
        Self {
            inner: InMemorySessionStore::with_references(references),
            dirty: AtomicBool::new(false),
        }
    }

    /// Whether the response has to rewrite the cookie.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Encoded cookie value, evicting the oldest references until it fits.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut references = self.inner.all();
        loop {
            let encoded = encode(&references);
            if encoded.len() <= MAX_COOKIE_SIZE || references.is_empty() {
                return encoded;
            }
            let Some(oldest) = oldest_index(&references) else {
                return encoded;
            };
            let evicted = references.remove(oldest);
            warn!(
                session_id = %evicted.id,
                "sessions cookie overflow, evicting oldest session reference"
            );
            self.inner.remove(&evicted.id);
        }
    }

    /// `Set-Cookie` value for the current contents; clears the cookie when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the value contains bytes not allowed in a header.
    pub fn set_cookie_header(
        &self,
        options: &CookieOptions,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let value = self.encode();
        let mut cookie = if self.inner.all().is_empty() {
            format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; Max-Age=0")
        } else {
            let mut cookie = format!("{SESSION_COOKIE_NAME}={value}; Path=/; HttpOnly");
            if let Some(max_age) = options.max_age_seconds {
                cookie.push_str(&format!("; Max-Age={max_age}"));
            }
            cookie
        };
        if options.iframe() {
            cookie.push_str("; SameSite=None");
        } else {
            cookie.push_str("; SameSite=Lax");
        }
        if options.secure() {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }
}

impl SessionCookieStore for CookieSessionStore {
    fn all(&self) -> Vec<SessionReference> {
        self.inner.all()
    }

    fn add(&self, reference: SessionReference) {
        self.inner.add(reference);
        self.mark_dirty();
    }

    fn remove(&self, id: &str) {
        if self.inner.get_by_id(id).is_some() {
            self.inner.remove(id);
            self.mark_dirty();
        }
    }
}

fn find_sessions_cookie(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name.trim() == SESSION_COOKIE_NAME).then(|| value.trim())
    })
}

fn decode(value: &str) -> Vec<SessionReference> {
    let value = value.trim_matches('"');
    if value.is_empty() {
        return Vec::new();
    }
    let Ok(bytes) = Base64UrlUnpadded::decode_vec(value) else {
        debug!("ignoring sessions cookie that is not base64url");
        return Vec::new();
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|err| {
        debug!("ignoring malformed sessions cookie: {err}");
        Vec::new()
    })
}

fn encode(references: &[SessionReference]) -> String {
    // Serializing plain strings and timestamps cannot fail.
    let json = serde_json::to_vec(references).unwrap_or_default();
    Base64UrlUnpadded::encode_string(&json)
}

fn oldest_index(references: &[SessionReference]) -> Option<usize> {
    references
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| recency(a, b))
        .map(|(index, _)| index)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::login::{store::SessionFilter, types::SessionToken};
    use chrono::{Duration, TimeZone, Utc};

    fn reference(id: &str, day: u32) -> SessionReference {
        SessionReference::new(
            id,
            SessionToken::new(format!("token-{id}")),
            format!("{id}@example.com"),
            "org1",
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn cookie_value_round_trips_references() {
        let store = CookieSessionStore::new();
        store.add(reference("s1", 1));
        store.add(reference("s2", 2));
        let encoded = store.encode();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; sessions={encoded}; lang=en")).unwrap(),
        );
        let loaded = CookieSessionStore::from_headers(&headers);
        assert_eq!(loaded.all(), store.all());
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn malformed_cookie_is_empty() {
        let store = CookieSessionStore::from_cookie_value(Some("%%%not-base64"));
        assert!(store.all().is_empty());

        let not_json = Base64UrlUnpadded::encode_string(b"{oops");
        let store = CookieSessionStore::from_cookie_value(Some(&not_json));
        assert!(store.all().is_empty());
    }

    #[test]
    fn missing_cookie_is_empty() {
        let store = CookieSessionStore::from_headers(&HeaderMap::new());
        assert!(store.get_most_recent(&SessionFilter::new()).is_none());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let store = CookieSessionStore::new();
        for day in 1..=28 {
            store.add(reference(&format!("session-{day:02}"), day));
        }
        let encoded = store.encode();
        assert!(encoded.len() <= MAX_COOKIE_SIZE);

        let ids = store.get_all_ids();
        assert!(ids.contains(&"session-28".to_string()));
        assert!(!ids.contains(&"session-01".to_string()));
        let kept = CookieSessionStore::from_cookie_value(Some(&encoded));
        assert_eq!(kept.get_all_ids(), ids);
    }

    #[test]
    fn mutations_mark_store_dirty() {
        let store = CookieSessionStore::new();
        store.remove("missing");
        assert!(!store.is_dirty());
        store.add(reference("s1", 1));
        assert!(store.is_dirty());
    }

    #[test]
    fn set_cookie_header_attributes() {
        let store = CookieSessionStore::new();
        store.add(reference("s1", 1));

        let lax = store
            .set_cookie_header(&CookieOptions::new().with_max_age_seconds(3600))
            .unwrap();
        let lax = lax.to_str().unwrap();
        assert!(lax.starts_with("sessions="));
        assert!(lax.contains("HttpOnly"));
        assert!(lax.contains("SameSite=Lax"));
        assert!(lax.contains("Max-Age=3600"));
        assert!(!lax.contains("Secure"));

        let embedded = store
            .set_cookie_header(&CookieOptions::new().with_iframe(true))
            .unwrap();
        let embedded = embedded.to_str().unwrap();
        assert!(embedded.contains("SameSite=None"));
        assert!(embedded.contains("Secure"));
    }

    #[test]
    fn empty_store_clears_cookie() {
        let store = CookieSessionStore::new();
        store.add(reference("s1", 1));
        store.remove("s1");
        let header = store
            .set_cookie_header(&CookieOptions::new().with_secure(true))
            .unwrap();
        let header = header.to_str().unwrap();
        assert!(header.starts_with("sessions=;"));
        assert!(header.contains("Max-Age=0"));
        assert!(header.contains("Secure"));
    }

    #[test]
    fn expired_references_are_not_special_in_encoding() {
        let store = CookieSessionStore::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        store.add(reference("s1", 1).with_expiration_date(now - Duration::days(1)));
        store.add(reference("s2", 2));
        assert_eq!(store.cleanup_expired(now), 1);
        assert_eq!(store.get_all_ids(), vec!["s2".to_string()]);
    }
}
