//! The HTTP transport seam.
//!
//! `Transport` performs one request/response cycle and nothing else: it does
//! not look at tokens, does not interpret statuses, and never retries. All of
//! that belongs to [`crate::client::ApiClient`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::ClientConfig;
use crate::error::ApiError;

pub use reqwest::Method;

/// One outbound request, in the shape the feature modules hand to the client.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL, e.g. `/lots/123`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// One-shot marker stamped the first time the client retries this request
    /// after a 401. A marked request is never retried again.
    pub(crate) retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            retried: false,
        }
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// One raw response. Status interpretation is left to the client.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError>;
}

/// The shipped transport: a `reqwest` client with the configured timeout,
/// rustls, and the configured default headers baked in.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::Config(format!("invalid header name: {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ApiError::Config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::ClientBuilder::new()
            .timeout(config.timeout)
            .use_rustls_tls()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut request = ApiRequest::new(Method::GET, "/lots/123");
        request.set_header("authorization", "Bearer A1");
        request.set_header("Authorization", "Bearer A2");

        let values: Vec<_> = request
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1, "Bearer A2");
    }

    #[test]
    fn new_requests_are_unmarked() {
        let request = ApiRequest::new(Method::POST, "/bids");
        assert!(!request.retried);
        assert!(request.body.is_none());
    }

    #[test]
    fn success_covers_the_2xx_range_only() {
        let mut response = RawResponse {
            status: 204,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(response.is_success());
        response.status = 301;
        assert!(!response.is_success());
        response.status = 401;
        assert!(!response.is_success());
    }

    #[test]
    fn invalid_default_header_is_a_config_error() {
        let config = ClientConfig::new("https://api.agromart.test")
            .with_header("bad header name", "value");
        assert!(matches!(
            HttpTransport::new(&config),
            Err(ApiError::Config(_))
        ));
    }
}
