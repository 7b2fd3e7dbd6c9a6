//! The authenticated API client.
//!
//! Behaves like the underlying transport, plus two things the callers never
//! have to know about: every outbound request carries the current access
//! token, and an expired access token is recovered once per request through a
//! single-flight refresh. Any other failure passes through unchanged.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::oneshot;

use crate::config::ClientConfig;
use crate::error::{ApiError, RefreshError};
use crate::token_store::TokenStore;
use crate::transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};

const AUTHORIZATION: &str = "Authorization";

/// Waiters queued behind the in-flight refresh, plus the flag that makes the
/// refresh single-flight. Owned exclusively by the client.
struct RefreshState {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<Result<String, RefreshError>>>,
}

/// Shape of a successful refresh-endpoint response. The server may rotate the
/// refresh token; when it does not, the stored one stays valid.
#[derive(Debug, serde::Deserialize)]
struct RefreshResponse {
    access: String,
    refresh: Option<String>,
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Authenticated HTTP client for the marketplace API. Cheap to clone; all
/// clones share the same token store and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    refresh: Arc<Mutex<RefreshState>>,
}

impl ApiClient {
    /// Build a client over the shipped reqwest transport.
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, store, transport))
    }

    /// Build a client over a caller-supplied transport.
    pub fn with_transport(
        config: ClientConfig,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            transport,
            refresh: Arc::new(Mutex::new(RefreshState {
                refreshing: false,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            request: ApiRequest::new(method, path),
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    /// Store a freshly issued credential pair (after login/registration).
    pub async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), ApiError> {
        self.store.set_tokens(access, refresh).await
    }

    /// Wipe stored credentials and the cached profile. Safe to call when
    /// nothing is stored.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.store.clear().await
    }

    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.store)
    }

    /// Send a request through the authenticated pipeline.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.stamp_access_token(&mut request).await;

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            query = ?request.query,
            body = ?request.body,
            "sending request"
        );

        let response = self.transport.send(&request).await?;

        tracing::debug!(
            status = response.status,
            path = %request.path,
            body_len = response.body.len(),
            "received response"
        );

        if response.status == 401 && !request.retried {
            return self.recover_unauthorized(request, response).await;
        }

        into_result(response)
    }

    /// Read the current access token and stamp the bearer header. A store
    /// read failure fails open: the request goes out without credentials and
    /// the server's 401 drives recovery.
    async fn stamp_access_token(&self, request: &mut ApiRequest) {
        match self.store.get_access_token().await {
            Ok(Some(token)) => request.set_header(AUTHORIZATION, format!("Bearer {token}")),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "token store read failed, sending request without credentials");
            }
        }
    }

    /// 401 on a not-yet-retried request: join the in-flight refresh or start
    /// one, then resubmit the original request once with the new token.
    async fn recover_unauthorized(
        &self,
        mut request: ApiRequest,
        response: RawResponse,
    ) -> Result<ApiResponse, ApiError> {
        // Check-and-set in one critical section so two refreshes can never
        // race: either we observe an in-flight refresh and enqueue, or we
        // claim the flag ourselves.
        let waiter = {
            let mut state = lock(&self.refresh);
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        request.retried = true;

        let access = match waiter {
            Some(rx) => match rx.await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    return Err(RefreshError::Network("refresh interrupted".to_string()).into())
                }
            },
            None => {
                let guard = RefreshGuard::new(Arc::clone(&self.refresh));
                match self.run_refresh().await {
                    Ok(access) => {
                        guard.settle(Ok(access.clone()));
                        access
                    }
                    Err(err) => {
                        guard.settle(Err(err.clone()));
                        // With no refresh token there was nothing to try, so
                        // the caller gets the original 401 back verbatim.
                        return Err(match err {
                            RefreshError::MissingRefreshToken => ApiError::Status {
                                status: response.status,
                                body: String::from_utf8_lossy(&response.body).into_owned(),
                            },
                            other => ApiError::Refresh(other),
                        });
                    }
                }
            }
        };

        request.set_header(AUTHORIZATION, format!("Bearer {access}"));
        tracing::debug!(path = %request.path, "retrying request with refreshed credentials");

        let retried = self.transport.send(&request).await?;
        tracing::debug!(
            status = retried.status,
            path = %request.path,
            "received response for retried request"
        );

        into_result(retried)
    }

    /// Perform the dedicated refresh call. Every failure path wipes stored
    /// credentials before returning, so the application can keep treating
    /// "credentials present" as "logged in".
    async fn run_refresh(&self) -> Result<String, RefreshError> {
        let refresh_token = match self.store.get_refresh_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.wipe_credentials().await;
                return Err(RefreshError::MissingRefreshToken);
            }
            Err(err) => {
                self.wipe_credentials().await;
                return Err(RefreshError::Network(format!(
                    "token store read failed: {err}"
                )));
            }
        };

        tracing::debug!("access token rejected, refreshing session");

        // A dedicated, non-intercepted call: straight to the transport, no
        // Authorization header, marked so it can never re-enter recovery.
        let mut request = ApiRequest::new(Method::POST, &self.config.refresh_path);
        request.body = Some(json!({ "refresh": refresh_token }));
        request.retried = true;

        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.wipe_credentials().await;
                return Err(RefreshError::Network(err.to_string()));
            }
        };

        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            tracing::warn!(status = response.status, "token refresh rejected");
            self.wipe_credentials().await;
            return Err(RefreshError::Rejected {
                status: response.status,
                body,
            });
        }

        let issued: RefreshResponse = match serde_json::from_slice(&response.body) {
            Ok(issued) => issued,
            Err(err) => {
                self.wipe_credentials().await;
                return Err(RefreshError::Network(format!(
                    "malformed refresh response: {err}"
                )));
            }
        };

        // No rotated refresh token in the response means the old one stays
        // valid for the next cycle.
        let rotated = issued.refresh.clone().unwrap_or(refresh_token);
        if let Err(err) = self.store.set_tokens(&issued.access, &rotated).await {
            self.wipe_credentials().await;
            return Err(RefreshError::Network(format!(
                "failed to persist refreshed tokens: {err}"
            )));
        }

        tracing::debug!("session refreshed");
        Ok(issued.access)
    }

    async fn wipe_credentials(&self) {
        if let Err(err) = self.store.clear().await {
            tracing::error!(error = %err, "failed to wipe stored credentials");
        }
    }
}

/// Builder for one request, mirroring the transport's calling convention so
/// feature modules can swap the raw transport for the client unchanged.
pub struct RequestBuilder<'a> {
    client: &'a ApiClient,
    request: ApiRequest,
}

impl<'a> RequestBuilder<'a> {
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.request.query.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request.set_header(name, value);
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.request.body = Some(body);
        self
    }

    pub async fn send(self) -> Result<ApiResponse, ApiError> {
        self.client.send(self.request).await
    }
}

fn into_result(response: RawResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(ApiResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    } else {
        Err(ApiError::Status {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Settles the refresh state exactly once. If the refreshing task is dropped
/// mid-refresh, the drop path still resets the flag and rejects the queue so
/// no waiter hangs.
struct RefreshGuard {
    state: Arc<Mutex<RefreshState>>,
    armed: bool,
}

impl RefreshGuard {
    fn new(state: Arc<Mutex<RefreshState>>) -> Self {
        Self { state, armed: true }
    }

    fn settle(mut self, outcome: Result<String, RefreshError>) {
        self.armed = false;
        drain(&self.state, outcome);
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if self.armed {
            drain(
                &self.state,
                Err(RefreshError::Network("refresh interrupted".to_string())),
            );
        }
    }
}

/// Reset the flag and hand every queued waiter the same outcome, in one
/// critical section, before any retry runs.
fn drain(state: &Mutex<RefreshState>, outcome: Result<String, RefreshError>) {
    let waiters = {
        let mut state = lock(state);
        state.refreshing = false;
        std::mem::take(&mut state.waiters)
    };
    for waiter in waiters {
        // A waiter whose caller went away is fine to skip.
        let _ = waiter.send(outcome.clone());
    }
}
