use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::ApiError;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Construction-time configuration for the API client. Fixed for the lifetime
/// of the client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme + host (+ optional port) of the API, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout, applied to every call including the refresh call.
    pub timeout: Duration,
    /// Headers attached to every outbound request.
    pub default_headers: HashMap<String, String>,
    /// Path of the token refresh endpoint, relative to `base_url`.
    pub refresh_path: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            default_headers: HashMap::new(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
        }
    }

    /// Build the configuration from `API_BASE_URL`, `API_TIMEOUT_MS` and
    /// `API_REFRESH_PATH`. Only the base URL is required.
    pub fn from_env() -> Result<Self, ApiError> {
        let base_url = env::var("API_BASE_URL")
            .map_err(|_| ApiError::Config("API_BASE_URL environment variable not set".into()))?;

        let mut config = Self::new(base_url);

        if let Ok(raw) = env::var("API_TIMEOUT_MS") {
            let millis: u64 = raw
                .parse()
                .map_err(|_| ApiError::Config(format!("invalid API_TIMEOUT_MS: {raw:?}")))?;
            config.timeout = Duration::from_millis(millis);
        }

        if let Ok(path) = env::var("API_REFRESH_PATH") {
            config.refresh_path = path;
        }

        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped_from_base_url() {
        let config = ClientConfig::new("https://api.agromart.test/");
        assert_eq!(config.base_url, "https://api.agromart.test");
    }

    #[test]
    fn defaults_are_applied() {
        let config = ClientConfig::new("https://api.agromart.test");
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert!(config.default_headers.is_empty());
    }

    #[test]
    fn builder_setters_override_defaults() {
        let config = ClientConfig::new("https://api.agromart.test")
            .with_timeout(Duration::from_secs(3))
            .with_header("X-App-Version", "1.4.2")
            .with_refresh_path("/api/token/refresh");

        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(
            config.default_headers.get("X-App-Version").map(String::as_str),
            Some("1.4.2")
        );
        assert_eq!(config.refresh_path, "/api/token/refresh");
    }

    #[test]
    fn from_env_requires_a_base_url() {
        std::env::remove_var("API_BASE_URL");
        let result = ClientConfig::from_env();
        assert!(matches!(result, Err(ApiError::Config(_))));
    }
}
