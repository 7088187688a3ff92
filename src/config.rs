//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

/// Endpoint bases, frontend identification and retry timing.
///
/// Deserializable so it can be embedded in an application's config file;
/// every missing field falls back to [`ClientConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the key-issuance API used by the unified protocol and for
    /// reaction keys.
    pub nvapi_base: String,
    /// Base URL of the legacy key-issuance API.
    pub flapi_base: String,
    /// Value of the `X-Frontend-Id` header.
    pub frontend_id: String,
    /// Value of the `X-Frontend-Version` header.
    pub frontend_version: String,
    /// Fixed wait before the single retry of a load or post, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Session cookie forwarded verbatim to key endpoints.
    pub cookie: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nvapi_base: "https://nvapi.nicovideo.jp".to_string(),
            flapi_base: "https://flapi.nicovideo.jp/api".to_string(),
            frontend_id: "6".to_string(),
            frontend_version: "0".to_string(),
            retry_backoff_ms: 3_000,
            cookie: None,
        }
    }
}

impl ClientConfig {
    /// Backoff interval as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Override the key API base URL.
    pub fn with_nvapi_base(mut self, base: impl Into<String>) -> Self {
        self.nvapi_base = base.into();
        self
    }

    /// Override the legacy key API base URL.
    pub fn with_flapi_base(mut self, base: impl Into<String>) -> Self {
        self.flapi_base = base.into();
        self
    }

    /// Override the retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Forward this cookie to key endpoints.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Headers every request carries.
    pub(crate) fn frontend_headers(&self) -> Vec<(String, String)> {
        vec![
            ("X-Frontend-Id".to_string(), self.frontend_id.clone()),
            ("X-Frontend-Version".to_string(), self.frontend_version.clone()),
        ]
    }

    /// Headers for key endpoints: frontend headers plus the cookie.
    pub(crate) fn key_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.frontend_headers();
        if let Some(cookie) = &self.cookie {
            headers.push(("Cookie".to_string(), cookie.clone()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_is_three_seconds() {
        assert_eq!(ClientConfig::default().retry_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"retry_backoff_ms": 10, "cookie": "user_session=x"}"#)
                .unwrap();
        assert_eq!(config.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.frontend_id, "6");
        assert!(config
            .key_headers()
            .contains(&("Cookie".to_string(), "user_session=x".to_string())));
    }

    #[test]
    fn test_frontend_headers_have_no_cookie() {
        let config = ClientConfig::default().with_cookie("a=b");
        assert_eq!(config.frontend_headers().len(), 2);
        assert_eq!(config.key_headers().len(), 3);
    }
}
