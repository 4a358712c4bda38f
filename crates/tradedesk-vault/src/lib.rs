//! On-disk store for broker credentials and OAuth tokens.
//!
//! One JSON file per broker under the vault directory:
//! `{broker}.credentials.json` and `{broker}.token.json`. Writes go to a
//! temp file and rename into place, so readers never observe a partial
//! record. Encryption at rest is handled by the surrounding deployment,
//! not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use tradedesk_core::error::VaultError;
use tradedesk_core::traits::{Credentials, UserProfile};
use tradedesk_core::types::BrokerId;

/// A stored OAuth token with its hard expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub broker: BrokerId,
    pub api_key: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub profile: UserProfile,
}

impl TokenRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// File-backed credential store.
pub struct CredentialVault {
    dir: PathBuf,
}

impl CredentialVault {
    /// Open a vault rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn credentials_path(&self, broker: BrokerId) -> PathBuf {
        self.dir.join(format!("{}.credentials.json", broker))
    }

    fn token_path(&self, broker: BrokerId) -> PathBuf {
        self.dir.join(format!("{}.token.json", broker))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Persist login credentials for a broker, replacing any previous set.
    pub fn save(&self, broker: BrokerId, credentials: &Credentials) -> Result<(), VaultError> {
        let bytes = serde_json::to_vec_pretty(credentials)
            .map_err(|e| VaultError::Corrupt(e.to_string()))?;
        self.write_atomic(&self.credentials_path(broker), &bytes)?;
        info!(%broker, "credentials saved");
        Ok(())
    }

    /// Load stored credentials; `None` when nothing was ever saved.
    pub fn load(&self, broker: BrokerId) -> Result<Option<Credentials>, VaultError> {
        let path = self.credentials_path(broker);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let credentials = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::Corrupt(format!("{}: {}", path.display(), e)))?;
        Ok(Some(credentials))
    }

    /// Remove stored credentials and token for a broker.
    pub fn forget(&self, broker: BrokerId) -> Result<(), VaultError> {
        for path in [self.credentials_path(broker), self.token_path(broker)] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        debug!(%broker, "vault records removed");
        Ok(())
    }

    pub fn save_token(&self, record: &TokenRecord) -> Result<(), VaultError> {
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| VaultError::Corrupt(e.to_string()))?;
        self.write_atomic(&self.token_path(record.broker), &bytes)?;
        info!(broker = %record.broker, expires_at = %record.expires_at, "token saved");
        Ok(())
    }

    /// Load a stored token. `None` when absent; an error when present but
    /// past its expiry, so callers re-login instead of silently failing
    /// API calls later.
    pub fn load_token(&self, broker: BrokerId) -> Result<Option<TokenRecord>, VaultError> {
        let path = self.token_path(broker);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let record: TokenRecord = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::Corrupt(format!("{}: {}", path.display(), e)))?;
        if record.is_expired() {
            return Err(VaultError::TokenExpired {
                broker: broker.to_string(),
                expired_at: record.expires_at.to_rfc3339(),
            });
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn vault() -> (tempfile::TempDir, CredentialVault) {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        (dir, vault)
    }

    fn profile() -> UserProfile {
        UserProfile {
            user_id: "AB1234".into(),
            user_name: "Test User".into(),
            email: None,
        }
    }

    #[test]
    fn test_save_and_load_credentials() {
        let (_dir, vault) = vault();
        let credentials = Credentials::ApiKey {
            api_key: "key".into(),
            api_secret: "secret".into(),
        };
        vault.save(BrokerId::AliceBlue, &credentials).unwrap();

        let loaded = vault.load(BrokerId::AliceBlue).unwrap().unwrap();
        assert!(matches!(loaded, Credentials::ApiKey { api_key, .. } if api_key == "key"));
    }

    #[test]
    fn test_load_absent_is_none() {
        let (_dir, vault) = vault();
        assert!(vault.load(BrokerId::Kite).unwrap().is_none());
        assert!(vault.load_token(BrokerId::Kite).unwrap().is_none());
    }

    #[test]
    fn test_token_round_trip() {
        let (_dir, vault) = vault();
        let record = TokenRecord {
            broker: BrokerId::Kite,
            api_key: "key".into(),
            access_token: "tok".into(),
            expires_at: Utc::now() + Duration::hours(8),
            profile: profile(),
        };
        vault.save_token(&record).unwrap();

        let loaded = vault.load_token(BrokerId::Kite).unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok");
        assert_eq!(loaded.profile.user_id, "AB1234");
    }

    #[test]
    fn test_expired_token_is_an_error() {
        let (_dir, vault) = vault();
        let record = TokenRecord {
            broker: BrokerId::Kite,
            api_key: "key".into(),
            access_token: "stale".into(),
            expires_at: Utc::now() - Duration::hours(1),
            profile: profile(),
        };
        vault.save_token(&record).unwrap();

        let err = vault.load_token(BrokerId::Kite).unwrap_err();
        assert!(matches!(err, VaultError::TokenExpired { .. }));
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let (_dir, vault) = vault();
        std::fs::write(vault.dir().join("kite.token.json"), b"not json").unwrap();
        let err = vault.load_token(BrokerId::Kite).unwrap_err();
        assert!(matches!(err, VaultError::Corrupt(_)));
    }

    #[test]
    fn test_forget_removes_both_records() {
        let (_dir, vault) = vault();
        vault.save(BrokerId::Kite, &Credentials::None).unwrap();
        vault
            .save_token(&TokenRecord {
                broker: BrokerId::Kite,
                api_key: "k".into(),
                access_token: "t".into(),
                expires_at: Utc::now() + Duration::hours(1),
                profile: profile(),
            })
            .unwrap();

        vault.forget(BrokerId::Kite).unwrap();
        assert!(vault.load(BrokerId::Kite).unwrap().is_none());
        assert!(vault.load_token(BrokerId::Kite).unwrap().is_none());
    }
}
