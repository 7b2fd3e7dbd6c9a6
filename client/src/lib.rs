//! Authenticated HTTP client for the Agromart marketplace API.
//!
//! Wraps an HTTP transport so callers never have to think about tokens: every
//! request carries the current access token, a 401 triggers one single-flight
//! token refresh shared by all concurrent callers, the original requests are
//! retried transparently, and an unrecoverable refresh wipes stored
//! credentials before the error surfaces.
//!
//! ```no_run
//! use std::sync::Arc;
//! use agromart_client::{ApiClient, ClientConfig, MemoryTokenStore};
//!
//! # async fn run() -> Result<(), agromart_client::ApiError> {
//! let config = ClientConfig::new("https://api.agromart.example");
//! let client = ApiClient::new(config, Arc::new(MemoryTokenStore::new()))?;
//!
//! let lot: serde_json::Value = client.get("/lots/123").send().await?.json()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod token_store;
pub mod transport;

pub use client::{ApiClient, ApiResponse, RequestBuilder};
pub use config::ClientConfig;
pub use error::{ApiError, RefreshError};
pub use token_store::{Credentials, FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};
