//! Plain JSON session file.
//!
//! [`FileTokenStore`] keeps the token and user record in a single JSON
//! document. The file is not encrypted; on Unix it is restricted to the
//! owner (mode 0600). Writes go to a sibling temp file and are renamed into
//! place so a crash never leaves a half-written session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_auth::{StoreResult, TokenStore, UserRecord};

use crate::error::{Result, VaultError};

const BACKEND: &str = "file";

/// On-disk layout of the session file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl SessionFile {
    fn is_empty(&self) -> bool {
        self.token.is_none() && self.user.is_none()
    }
}

/// Token store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/session.json`.
    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join("session.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<SessionFile> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SessionFile::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| VaultError::MalformedFile {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, mut session: SessionFile) -> Result<()> {
        if session.is_empty() {
            return match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        session.updated_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(&session)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;

        // Restrict file permissions on Unix (owner read/write only).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "session file written");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self) -> StoreResult<Option<String>> {
        Ok(self.load().await.map_err(store_err)?.token)
    }

    async fn set(&self, token: &str) -> StoreResult<()> {
        let mut session = self.load().await.map_err(store_err)?;
        session.token = Some(token.to_string());
        self.save(session).await.map_err(store_err)
    }

    async fn delete(&self) -> StoreResult<()> {
        let mut session = self.load().await.map_err(store_err)?;
        if session.token.take().is_none() {
            return Ok(());
        }
        self.save(session).await.map_err(store_err)
    }

    async fn set_user(&self, user: &UserRecord) -> StoreResult<()> {
        let mut session = self.load().await.map_err(store_err)?;
        session.user = Some(user.clone());
        self.save(session).await.map_err(store_err)
    }

    async fn get_user(&self) -> StoreResult<Option<UserRecord>> {
        Ok(self.load().await.map_err(store_err)?.user)
    }

    async fn delete_user(&self) -> StoreResult<()> {
        let mut session = self.load().await.map_err(store_err)?;
        if session.user.take().is_none() {
            return Ok(());
        }
        self.save(session).await.map_err(store_err)
    }

    async fn clear(&self) -> StoreResult<()> {
        self.save(SessionFile::default()).await.map_err(store_err)
    }
}

fn store_err(err: VaultError) -> tether_auth::StoreError {
    err.into_store_error(BACKEND)
}
