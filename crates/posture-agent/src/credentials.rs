// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Credential storage
//!
//! The access/refresh token pair is shared by the REST pipeline and the
//! realtime session. Both depend on the [`CredentialStore`] capability rather
//! than on a concrete location, so tests can inject [`MemoryCredentialStore`].

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PostureAgentError, Result};

/// Access/refresh token pair issued by login
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub access: String,
    pub refresh: String,
}

impl Credentials {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Authentication status published to interested parties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
}

/// Durable holder of the token pair
///
/// Implementations must make `store` and `clear` replace both tokens together.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    /// Replace both tokens
    fn store(&self, credentials: Credentials) -> Result<()>;

    /// Store a renewed access token, rotating the refresh token when one is supplied
    fn update_access(&self, access: String, refresh: Option<String>) -> Result<()>;

    /// Remove both tokens
    fn clear(&self) -> Result<()>;

    fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            access: self.access_token()?,
            refresh: self.refresh_token()?,
        })
    }

    fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

/// On-disk and in-memory representation of the token pair
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TokenDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl TokenDocument {
    fn with_access(&self, access: String, refresh: Option<String>) -> Self {
        TokenDocument {
            access_token: Some(access),
            refresh_token: refresh.or_else(|| self.refresh_token.clone()),
        }
    }
}

impl From<Credentials> for TokenDocument {
    fn from(credentials: Credentials) -> Self {
        TokenDocument {
            access_token: Some(credentials.access),
            refresh_token: Some(credentials.refresh),
        }
    }
}

/// Process-local credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<TokenDocument>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            tokens: RwLock::new(credentials.into()),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.tokens.read().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh_token.clone()
    }

    fn store(&self, credentials: Credentials) -> Result<()> {
        *self.tokens.write() = credentials.into();
        Ok(())
    }

    fn update_access(&self, access: String, refresh: Option<String>) -> Result<()> {
        let mut tokens = self.tokens.write();
        *tokens = tokens.with_access(access, refresh);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens.write() = TokenDocument::default();
        Ok(())
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// JSON file credential store
///
/// Every mutation rewrites the whole document through a temporary file and an
/// atomic rename; clearing removes the file. The cache is only updated after
/// the disk write succeeds.
pub struct FileCredentialStore {
    path: PathBuf,
    tokens: RwLock<TokenDocument>,
}

impl FileCredentialStore {
    /// Open the store at `path`; a missing file means no credentials
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tokens = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<TokenDocument>(&content) {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(
                        "[CREDENTIALS] Ignoring unreadable credential file {}: {}",
                        path.display(),
                        e
                    );
                    TokenDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TokenDocument::default(),
            Err(e) => {
                return Err(PostureAgentError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        debug!(
            "[CREDENTIALS] Opened {} (authenticated: {})",
            path.display(),
            tokens.access_token.is_some()
        );

        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, tokens: &TokenDocument) -> Result<()> {
        let storage_err = |action: &str, e: std::io::Error| {
            PostureAgentError::Storage(format!("failed to {} {}: {}", action, self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| storage_err("create directory for", e))?;
            }
        }

        let content = serde_json::to_vec_pretty(tokens)?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| storage_err("write", e))?;
            file.write_all(&content).map_err(|e| storage_err("write", e))?;
            file.sync_all().map_err(|e| storage_err("sync", e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| storage_err("replace", e))
    }

    fn replace(&self, next: TokenDocument) -> Result<()> {
        let mut tokens = self.tokens.write();
        self.persist(&next)?;
        *tokens = next;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.tokens.read().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh_token.clone()
    }

    fn store(&self, credentials: Credentials) -> Result<()> {
        self.replace(credentials.into())
    }

    fn update_access(&self, access: String, refresh: Option<String>) -> Result<()> {
        let next = self.tokens.read().with_access(access, refresh);
        self.replace(next)
    }

    fn clear(&self) -> Result<()> {
        let mut tokens = self.tokens.write();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PostureAgentError::Storage(format!(
                    "failed to remove {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }
        *tokens = TokenDocument::default();
        Ok(())
    }
}

impl fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCredentialStore")
            .field("path", &self.path)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryCredentialStore::new();
        assert!(!store.is_authenticated());
        assert!(store.credentials().is_none());

        store.store(Credentials::new("a1", "r1")).unwrap();
        assert_eq!(store.credentials(), Some(Credentials::new("a1", "r1")));

        store.update_access("a2".to_string(), None).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));

        store.update_access("a3".to_string(), Some("r2".to_string())).unwrap();
        assert_eq!(store.refresh_token().as_deref(), Some("r2"));

        store.clear().unwrap();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileCredentialStore::open(&path).unwrap();
        assert!(!store.is_authenticated());
        store.store(Credentials::new("access-1", "refresh-1")).unwrap();
        store.update_access("access-2".to_string(), None).unwrap();

        let reopened = FileCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.access_token().as_deref(), Some("access-2"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("refresh-1"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_clear_removes_both_tokens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).unwrap();
        store.store(Credentials::new("a", "r")).unwrap();
        store.clear().unwrap();
        // Clearing twice is fine
        store.clear().unwrap();

        assert!(!path.exists());
        let reopened = FileCredentialStore::open(&path).unwrap();
        assert!(reopened.credentials().is_none());
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::open(&path).unwrap();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let rendered = format!("{:?}", Credentials::new("secret-access", "secret-refresh"));
        assert!(!rendered.contains("secret"));
    }
}
