//! Credential cache
//!
//! Persists login results to disk so `refresh` and `tenants` work across CLI
//! invocations. One file per provider issuer.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::client::Tokens;
use crate::{Error, Result};

/// Token cache rooted at a state directory
#[derive(Debug, Clone)]
pub struct CredentialCache {
    /// Base directory for token files
    base_dir: PathBuf,
}

impl CredentialCache {
    /// Create a cache in `base_dir`, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Internal(format!("Failed to create token cache dir: {e}")))?;
        }

        Ok(Self { base_dir })
    }

    /// Create the cache in the default location (`~/.fabric-auth/tokens`)
    pub fn default_location() -> Result<Self> {
        Self::new(default_dir()?)
    }

    /// Directory holding the token files
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn token_path(&self, issuer: &str) -> PathBuf {
        let digest = Sha256::digest(issuer.trim_end_matches('/').as_bytes());
        self.base_dir.join(format!("{}_tokens.json", hex::encode(&digest[..8])))
    }

    /// Load tokens for `issuer`, if any were saved and are readable
    #[must_use]
    pub fn load(&self, issuer: &str) -> Option<Tokens> {
        let path = self.token_path(issuer);

        if !path.exists() {
            debug!(issuer, "No stored tokens found");
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Tokens>(&content) {
                Ok(tokens) => {
                    debug!(issuer, "Loaded stored tokens");
                    Some(tokens)
                }
                Err(e) => {
                    warn!(issuer, error = %e, "Failed to parse stored tokens");
                    None
                }
            },
            Err(e) => {
                warn!(issuer, error = %e, "Failed to read token file");
                None
            }
        }
    }

    /// Save tokens for `issuer` (owner read/write only)
    pub fn save(&self, issuer: &str, tokens: &Tokens) -> Result<()> {
        let path = self.token_path(issuer);

        let content = serde_json::to_string_pretty(tokens)?;
        fs::write(&path, content).map_err(|e| Error::Internal(format!("Failed to write token file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        info!(issuer, "Saved tokens");
        Ok(())
    }

    /// Delete tokens for `issuer`; returns whether a file was removed
    pub fn delete(&self, issuer: &str) -> Result<bool> {
        let path = self.token_path(issuer);

        if path.exists() {
            fs::remove_file(&path).map_err(|e| Error::Internal(format!("Failed to delete token file: {e}")))?;
            info!(issuer, "Deleted tokens");
            return Ok(true);
        }

        Ok(false)
    }
}

/// `~/.fabric-auth/tokens`
pub fn default_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".fabric-auth").join("tokens"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tokens() -> Tokens {
        Tokens {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CredentialCache::new(dir.path()).unwrap();

        cache.save("https://auth.example", &tokens()).unwrap();

        assert_eq!(cache.load("https://auth.example"), Some(tokens()));
        // Trailing slash addresses the same file
        assert_eq!(cache.load("https://auth.example/"), Some(tokens()));
        assert_eq!(cache.load("https://other.example"), None);
    }

    #[test]
    fn file_named_by_issuer_digest() {
        let cache = CredentialCache::new(tempfile::tempdir().unwrap().path()).unwrap();

        let path = cache.token_path("https://auth.example/");

        assert_eq!(path.file_name().unwrap(), "644d89f1ac9a1487_tokens.json");
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CredentialCache::new(dir.path()).unwrap();
        cache.save("https://auth.example", &tokens()).unwrap();

        assert!(cache.delete("https://auth.example").unwrap());
        assert!(!cache.delete("https://auth.example").unwrap());
        assert_eq!(cache.load("https://auth.example"), None);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let cache = CredentialCache::new(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(cache.base_dir(), nested.as_path());
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CredentialCache::new(dir.path()).unwrap();
        fs::write(cache.token_path("https://auth.example"), "{not json").unwrap();

        assert_eq!(cache.load("https://auth.example"), None);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = CredentialCache::new(dir.path()).unwrap();
        cache.save("https://auth.example", &tokens()).unwrap();

        let mode = fs::metadata(cache.token_path("https://auth.example")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
