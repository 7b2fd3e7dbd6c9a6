use thiserror::Error;

/// Errors surfaced by the API client.
///
/// The client recovers exactly one failure class on its own (an expired access
/// token, first occurrence per request). Everything else is propagated to the
/// caller unchanged.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure: connect, DNS, TLS, timeout. Never interpreted by
    /// the client and never triggers the refresh protocol.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A non-2xx response the client passes through, including a 401 on a
    /// request that has already been retried once.
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Terminal refresh failure. Stored credentials are wiped before this is
    /// returned, so "credentials present" still implies "logged in".
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// A token store write failed. Reads fail open instead (see `ApiClient`).
    #[error("token store error: {0}")]
    TokenStore(String),

    /// Response body could not be deserialized into the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid construction-time configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// The HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Why a token refresh failed. Cloneable so the same outcome can be fanned out
/// to every caller queued behind the in-flight refresh.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// No refresh token was stored when a 401 arrived. No network call is made
    /// on this path.
    #[error("no refresh token stored")]
    MissingRefreshToken,

    /// The refresh endpoint answered with a non-2xx status (expired or revoked
    /// refresh token, typically).
    #[error("token refresh rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The refresh call itself failed below HTTP, or its response could not be
    /// used (malformed body, persist failure, interrupted refresh).
    #[error("token refresh failed: {0}")]
    Network(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_extracted_from_passthrough_errors() {
        let err = ApiError::Status {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn unauthorized_is_recognized() {
        let err = ApiError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(err.is_unauthorized());
    }

    #[test]
    fn refresh_rejection_carries_its_status() {
        let err = ApiError::Refresh(RefreshError::Rejected {
            status: 403,
            body: "revoked".to_string(),
        });
        assert_eq!(err.status(), Some(403));
    }
}
