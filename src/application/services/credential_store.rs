//! Shared bearer-token pair for the feed collector.
//!
//! The API process writes it (`PUT /credentials`), the poller process reads
//! it back from the same JSON file on every cycle. Resolution at load time is
//! file first, then `X_AUTH_TOKEN` / `X_CT0`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::secrets::{mask, optional_secret};

const PREVIEW_CHARS: usize = 4;
const VERSION_CHARS: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid credentials: {0}")]
    Invalid(String),

    #[error("Credential file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file format error: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialPair {
    pub auth_token: String,
    pub ct0: String,
}

impl CredentialPair {
    pub fn new(auth_token: &str, ct0: &str) -> Result<Self, CredentialError> {
        let pair = Self {
            auth_token: auth_token.trim().to_string(),
            ct0: ct0.trim().to_string(),
        };
        if pair.auth_token.is_empty() || pair.ct0.is_empty() {
            return Err(CredentialError::Invalid(
                "auth_token and ct0 must both be non-empty".to_string(),
            ));
        }
        Ok(pair)
    }

    fn is_complete(&self) -> bool {
        !self.auth_token.is_empty() && !self.ct0.is_empty()
    }

    /// First 12 hex chars of SHA-256 over the pair
    pub fn version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.auth_token.as_bytes());
        hasher.update(b":");
        hasher.update(self.ct0.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(VERSION_CHARS);
        digest
    }

    pub fn preview(&self) -> String {
        mask(&self.auth_token, PREVIEW_CHARS)
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("auth_token", &self.preview())
            .field("version", &self.version())
            .finish()
    }
}

/// What the credentials endpoints report. Never contains the secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub configured: bool,
    pub preview: Option<String>,
    pub version: Option<String>,
}

impl CredentialStatus {
    fn of(pair: Option<&CredentialPair>) -> Self {
        Self {
            configured: pair.is_some(),
            preview: pair.map(CredentialPair::preview),
            version: pair.map(CredentialPair::version),
        }
    }
}

pub struct CredentialStore {
    path: PathBuf,
    current: Mutex<Option<CredentialPair>>,
}

impl CredentialStore {
    /// Load once: file, then environment.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let pair = match read_file(&path).await {
            Ok(Some(pair)) => {
                info!("✓ Credentials loaded from {} (version {})", path.display(), pair.version());
                Some(pair)
            }
            Ok(None) => from_env(),
            Err(e) => {
                warn!("Ignoring unreadable credential file {}: {}", path.display(), e);
                from_env()
            }
        };

        if pair.is_none() {
            warn!("No collector credentials configured");
        }

        Self {
            path,
            current: Mutex::new(pair),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn current(&self) -> Option<CredentialPair> {
        self.current.lock().await.clone()
    }

    pub async fn version(&self) -> Option<String> {
        self.current.lock().await.as_ref().map(CredentialPair::version)
    }

    pub async fn preview(&self) -> Option<String> {
        self.current.lock().await.as_ref().map(CredentialPair::preview)
    }

    pub async fn status(&self) -> CredentialStatus {
        CredentialStatus::of(self.current.lock().await.as_ref())
    }

    /// Persist `pair` and swap it in. Either both happen or neither.
    pub async fn refresh(&self, pair: CredentialPair) -> Result<CredentialStatus, CredentialError> {
        if !pair.is_complete() {
            return Err(CredentialError::Invalid(
                "auth_token and ct0 must both be non-empty".to_string(),
            ));
        }

        let mut current = self.current.lock().await;
        write_file(&self.path, &pair).await?;
        info!("✓ Credentials refreshed (version {})", pair.version());
        *current = Some(pair);
        Ok(CredentialStatus::of(current.as_ref()))
    }

    /// Pick up a pair written by another process.
    ///
    /// # Returns
    /// `true` when the in-memory pair changed
    pub async fn reload_from_disk(&self) -> Result<bool, CredentialError> {
        let Some(pair) = read_file(&self.path).await? else {
            return Ok(false);
        };

        let mut current = self.current.lock().await;
        if current.as_ref() == Some(&pair) {
            return Ok(false);
        }
        info!("Credentials changed on disk (version {})", pair.version());
        *current = Some(pair);
        Ok(true)
    }
}

fn from_env() -> Option<CredentialPair> {
    let auth_token = optional_secret("X_AUTH_TOKEN")?;
    let ct0 = optional_secret("X_CT0")?;
    let pair = CredentialPair::new(&auth_token, &ct0).ok()?;
    info!("✓ Credentials loaded from environment (version {})", pair.version());
    Some(pair)
}

async fn read_file(path: &Path) -> Result<Option<CredentialPair>, CredentialError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let pair: CredentialPair = serde_json::from_str(&raw)?;
    Ok(pair.is_complete().then_some(pair))
}

/// Write to a sibling temp file then rename over the target.
async fn write_file(path: &Path, pair: &CredentialPair) -> Result<(), CredentialError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(pair)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "signal_trader_{}_{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_version_and_preview() {
        let pair = CredentialPair::new("abcdef123456", "ct0value").unwrap();
        assert_eq!(pair.version().len(), 12);
        assert_eq!(pair.version(), CredentialPair::new("abcdef123456", "ct0value").unwrap().version());
        assert_ne!(pair.version(), CredentialPair::new("abcdef123456", "other").unwrap().version());
        assert_eq!(pair.preview(), "abcd********");
        assert!(!format!("{:?}", pair).contains("abcdef123456"));
    }

    #[test]
    fn test_empty_pair_rejected() {
        assert!(matches!(
            CredentialPair::new("token", "  "),
            Err(CredentialError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_persists_and_reloads() {
        let path = temp_path("refresh");
        let _ = tokio::fs::remove_file(&path).await;

        let store = CredentialStore::load(&path).await;
        let pair = CredentialPair::new("token-one", "ct0-one").unwrap();
        let status = store.refresh(pair.clone()).await.unwrap();
        assert!(status.configured);
        assert_eq!(status.version, Some(pair.version()));

        // A second process sees the same pair
        let other = CredentialStore::load(&path).await;
        assert_eq!(other.current().await, Some(pair));

        // Rotation by the first store is picked up by the second
        let rotated = CredentialPair::new("token-two", "ct0-two").unwrap();
        store.refresh(rotated.clone()).await.unwrap();
        assert!(other.reload_from_disk().await.unwrap());
        assert_eq!(other.version().await, Some(rotated.version()));
        assert!(!other.reload_from_disk().await.unwrap());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_missing_file_reload_is_noop() {
        let path = temp_path("missing");
        let _ = tokio::fs::remove_file(&path).await;
        let store = CredentialStore::load(&path).await;
        assert!(!store.reload_from_disk().await.unwrap());
    }
}
