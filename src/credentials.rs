//! File-backed credential store.
//!
//! The store is a JSON object mapping an identity key to a username/password
//! pair:
//!
//! ```json
//! { "plant-a": { "username": "user@example.com", "password": "secret" } }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Username/password pair for the client-credentials exchange
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub username: String,
    pub password: String,
}

impl StoredCredentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields are non-empty
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity -> credentials mapping loaded from disk
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    path: PathBuf,
    entries: HashMap<String, StoredCredentials>,
}

impl CredentialStore {
    /// Load the store at `path`.
    ///
    /// A missing file is reported as `CredentialStoreUnavailable` so callers
    /// can decide whether that is fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::credential_store_unavailable(path.display().to_string()));
        }

        let json = fs::read_to_string(path)?;
        let entries: HashMap<String, StoredCredentials> = serde_json::from_str(&json)
            .map_err(|e| Error::from(e).with_context(format!("Reading {}", path.display())))?;

        log::debug!("Loaded {} credential entries from {:?}", entries.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Build an in-memory store
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, StoredCredentials)>,
        K: Into<String>,
    {
        Self {
            path: PathBuf::new(),
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, identity: &str) -> Option<&StoredCredentials> {
        self.entries.get(identity)
    }

    /// Look up `identity`, failing with `CredentialNotFound`
    pub fn require(&self, identity: &str) -> Result<&StoredCredentials> {
        self.get(identity)
            .ok_or_else(|| Error::credential_not_found(identity))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_load_and_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"plant-a": {{"username": "a@x.io", "password": "pw"}}}}"#
        )
        .unwrap();

        let store = CredentialStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("plant-a").unwrap().username, "a@x.io");
        assert!(store.get("plant-b").is_none());
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = CredentialStore::load(dir.path().join("credentials.json")).unwrap_err();
        assert_matches!(err.kind, ErrorKind::CredentialStoreUnavailable { .. });
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = CredentialStore::load(file.path()).unwrap_err();
        assert_matches!(err.kind, ErrorKind::Serialization { .. });
    }

    #[test]
    fn test_require_missing_identity() {
        let store = CredentialStore::from_entries([(
            "plant-a",
            StoredCredentials::new("a", "b"),
        )]);
        let err = store.require("plant-z").unwrap_err();
        assert_matches!(err.kind, ErrorKind::CredentialNotFound { ref identity } if identity == "plant-z");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = StoredCredentials::new("user", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
