//! Device identity tokens and the cookie that carries them.
//!
//! The cookie holds a random token; only its SHA-256 digest is stored as
//! the session's `device_id`, so a database read never yields a usable
//! cookie value.

use axum::http::{HeaderMap, header};
use base64::Engine;
use cookie::{Cookie, SameSite};
use sha2::{Digest, Sha256};

use crate::config::DeviceConfig;

/// Random bytes per token.
const TOKEN_BYTES: usize = 32;

/// Encoded length of a token (32 bytes, URL-safe base64, no padding).
pub const TOKEN_LENGTH: usize = 43;

/// Opaque per-browser device identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceToken(String);

impl DeviceToken {
    /// Generate a fresh, unguessable token.
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().r#gen();
        Self(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept a presented value only if it has the shape of a generated token.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = value.len() == TOKEN_LENGTH
            && base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(value)
                .is_ok_and(|bytes| bytes.len() == TOKEN_BYTES);
        well_formed.then(|| Self(value.to_string()))
    }

    /// Reuse the presented token, or mint a new one if it is missing or malformed.
    ///
    /// The flag is `true` when a new token was generated.
    #[must_use]
    pub fn resolve(presented: Option<&str>) -> (Self, bool) {
        match presented.and_then(Self::parse) {
            Some(token) => (token, false),
            None => (Self::generate(), true),
        }
    }

    /// Stored identifier for this device: hex SHA-256 of the token.
    #[must_use]
    pub fn device_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceToken").field(&"[redacted]").finish()
    }
}

/// Find the device cookie among the request's `Cookie` headers.
#[must_use]
pub fn read_device_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|parsed| parsed.ok())
        .find(|c| c.name() == cookie_name)
        .map(|c| c.value().to_string())
}

/// Build the long-lived cookie that pins the token to the browser.
#[must_use]
pub fn device_cookie(config: &DeviceConfig, token: &DeviceToken) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token.as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::days(i64::from(
            config.cookie_max_age_days,
        )))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generated_token_shape() {
        let token = DeviceToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_LENGTH);
        assert!(DeviceToken::parse(token.as_str()).is_some());
        assert_ne!(token, DeviceToken::generate());
    }

    #[test]
    fn test_parse_rejects_malformed_values() {
        assert!(DeviceToken::parse("").is_none());
        assert!(DeviceToken::parse("short").is_none());
        assert!(DeviceToken::parse(&"!".repeat(TOKEN_LENGTH)).is_none());
        // standard base64 alphabet is not accepted
        assert!(DeviceToken::parse(&format!("{}+", "a".repeat(TOKEN_LENGTH - 1))).is_none());
    }

    #[test]
    fn test_resolve_reuses_valid_token() {
        let token = DeviceToken::generate();
        let (resolved, fresh) = DeviceToken::resolve(Some(token.as_str()));
        assert_eq!(resolved, token);
        assert!(!fresh);

        let (_, fresh) = DeviceToken::resolve(Some("tampered"));
        assert!(fresh);
        let (_, fresh) = DeviceToken::resolve(None);
        assert!(fresh);
    }

    #[test]
    fn test_device_id_is_stable_digest() {
        let token = DeviceToken::generate();
        let id = token.device_id();
        assert_eq!(id.len(), 64);
        assert_eq!(id, token.device_id());
        assert!(!id.contains(token.as_str()));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = DeviceToken::generate();
        assert!(!format!("{:?}", token).contains(token.as_str()));
    }

    #[test]
    fn test_read_device_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; consign_device=abc123"),
        );
        assert_eq!(
            read_device_cookie(&headers, "consign_device"),
            Some("abc123".to_string())
        );
        assert_eq!(read_device_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_device_cookie_attributes() {
        let config = DeviceConfig {
            cookie_name: "dev".to_string(),
            cookie_max_age_days: 30,
            cookie_secure: true,
        };
        let token = DeviceToken::generate();
        let cookie = device_cookie(&config, &token);

        assert_eq!(cookie.name(), "dev");
        assert_eq!(cookie.value(), token.as_str());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::days(30)));
    }
}
