//! Credential persistence.
//!
//! The client never interprets tokens; it only reads them before a request,
//! replaces them wholesale after a refresh, and wipes them on unrecoverable
//! refresh failure. The cached profile record lives next to the tokens so a
//! wipe leaves no stale identity behind.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::ApiError;

/// An access/refresh token pair. Created at login, replaced wholesale at
/// refresh, deleted at logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    profile: Option<serde_json::Value>,
}

/// Where tokens live between requests.
///
/// Reads happen on every outbound request, so implementations should be cheap
/// to read. The client treats reads and writes as atomic units: it always
/// reads or writes the full credential pair, never half of it.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_access_token(&self) -> Result<Option<String>, ApiError>;

    async fn get_refresh_token(&self) -> Result<Option<String>, ApiError>;

    /// Replace both tokens at once.
    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), ApiError>;

    /// The cached user/profile record stored alongside the tokens.
    async fn get_profile(&self) -> Result<Option<serde_json::Value>, ApiError>;

    async fn set_profile(&self, profile: serde_json::Value) -> Result<(), ApiError>;

    /// Wipe tokens and the cached profile. Must succeed (and be a no-op) when
    /// nothing is stored.
    async fn clear(&self) -> Result<(), ApiError>;
}

/// In-process store. The default for tests and for apps that keep sessions
/// only as long as the process lives.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<StoredSession>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_access_token(&self) -> Result<Option<String>, ApiError> {
        let session = self.session.read().await;
        Ok(session
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone()))
    }

    async fn get_refresh_token(&self) -> Result<Option<String>, ApiError> {
        let session = self.session.read().await;
        Ok(session
            .credentials
            .as_ref()
            .map(|c| c.refresh_token.clone()))
    }

    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), ApiError> {
        let mut session = self.session.write().await;
        session.credentials = Some(Credentials {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        });
        Ok(())
    }

    async fn get_profile(&self) -> Result<Option<serde_json::Value>, ApiError> {
        let session = self.session.read().await;
        Ok(session.profile.clone())
    }

    async fn set_profile(&self, profile: serde_json::Value) -> Result<(), ApiError> {
        let mut session = self.session.write().await;
        session.profile = Some(profile);
        Ok(())
    }

    async fn clear(&self) -> Result<(), ApiError> {
        let mut session = self.session.write().await;
        *session = StoredSession::default();
        Ok(())
    }
}

/// JSON-file-backed store, the "local storage" analogue for desktop and CLI
/// consumers. A missing file reads as an empty session.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles against the file.
    guard: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<StoredSession, ApiError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::TokenStore(format!("corrupt session file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredSession::default()),
            Err(e) => Err(ApiError::TokenStore(format!(
                "failed to read session file: {e}"
            ))),
        }
    }

    async fn save(&self, session: &StoredSession) -> Result<(), ApiError> {
        let bytes = serde_json::to_vec_pretty(session)
            .map_err(|e| ApiError::TokenStore(format!("failed to encode session: {e}")))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| ApiError::TokenStore(format!("failed to write session file: {e}")))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get_access_token(&self) -> Result<Option<String>, ApiError> {
        let _guard = self.guard.lock().await;
        let session = self.load().await?;
        Ok(session.credentials.map(|c| c.access_token))
    }

    async fn get_refresh_token(&self) -> Result<Option<String>, ApiError> {
        let _guard = self.guard.lock().await;
        let session = self.load().await?;
        Ok(session.credentials.map(|c| c.refresh_token))
    }

    async fn set_tokens(&self, access: &str, refresh: &str) -> Result<(), ApiError> {
        let _guard = self.guard.lock().await;
        let mut session = self.load().await?;
        session.credentials = Some(Credentials {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        });
        self.save(&session).await
    }

    async fn get_profile(&self) -> Result<Option<serde_json::Value>, ApiError> {
        let _guard = self.guard.lock().await;
        let session = self.load().await?;
        Ok(session.profile)
    }

    async fn set_profile(&self, profile: serde_json::Value) -> Result<(), ApiError> {
        let _guard = self.guard.lock().await;
        let mut session = self.load().await?;
        session.profile = Some(profile);
        self.save(&session).await
    }

    async fn clear(&self) -> Result<(), ApiError> {
        let _guard = self.guard.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::TokenStore(format!(
                "failed to remove session file: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_tokens() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get_access_token().await.unwrap(), None);

        store.set_tokens("A1", "R1").await.unwrap();
        assert_eq!(store.get_access_token().await.unwrap().as_deref(), Some("A1"));
        assert_eq!(store.get_refresh_token().await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn tokens_are_replaced_wholesale() {
        let store = MemoryTokenStore::new();
        store.set_tokens("A1", "R1").await.unwrap();
        store.set_tokens("A2", "R2").await.unwrap();

        assert_eq!(store.get_access_token().await.unwrap().as_deref(), Some("A2"));
        assert_eq!(store.get_refresh_token().await.unwrap().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn clear_wipes_tokens_and_profile() {
        let store = MemoryTokenStore::new();
        store.set_tokens("A1", "R1").await.unwrap();
        store
            .set_profile(json!({"name": "Asha", "role": "farmer"}))
            .await
            .unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.get_access_token().await.unwrap(), None);
        assert_eq!(store.get_refresh_token().await.unwrap(), None);
        assert_eq!(store.get_profile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_is_idempotent_on_an_empty_store() {
        let store = MemoryTokenStore::new();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get_access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let store = FileTokenStore::new(&path);
            store.set_tokens("A1", "R1").await.unwrap();
            store.set_profile(json!({"name": "Asha"})).await.unwrap();
        }

        let store = FileTokenStore::new(&path);
        assert_eq!(store.get_access_token().await.unwrap().as_deref(), Some("A1"));
        assert_eq!(store.get_refresh_token().await.unwrap().as_deref(), Some("R1"));
        assert_eq!(
            store.get_profile().await.unwrap(),
            Some(json!({"name": "Asha"}))
        );
    }

    #[tokio::test]
    async fn file_store_clear_removes_the_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileTokenStore::new(&path);
        store.set_tokens("A1", "R1").await.unwrap();
        store.clear().await.unwrap();

        assert!(!path.exists());
        store.clear().await.unwrap();
        assert_eq!(store.get_access_token().await.unwrap(), None);
    }
}
