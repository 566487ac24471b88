//! Session Token Stores
//!
//! Two [`TokenStore`] variants:
//!
//! - [`FileTokenStore`]: the shell-cooperative layout. The token payload
//!   lives in a user-chosen directory and a one-line index file under
//!   `<install_dir>/cookie/<ppid>` (or `cookiefile`) points at it.
//! - [`MemoryTokenStore`]: process-local, for library callers.

use crate::domain::ports::TokenStore;
use crate::domain::types::SessionToken;
use crate::error::{Error, Result};
use crate::host::lineage::LineageKey;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Directory under the install dir holding index files
pub const INDEX_DIR_NAME: &str = "cookie";

// =============================================================================
// File Token Store
// =============================================================================

/// Configuration for the file-backed token store
#[derive(Debug, Clone)]
pub struct FileTokenStoreConfig {
    /// Root under which `cookie/<lineage>` index files live
    pub install_dir: PathBuf,
    /// Directory receiving the token payload file
    pub token_dir: PathBuf,
    /// Payload file name; defaults to `<user>cookie<ppid>`
    pub token_file_name: Option<String>,
    /// Explicit index file, taking precedence over the lineage-derived one
    pub index_file: Option<PathBuf>,
    pub lineage: LineageKey,
}

impl FileTokenStoreConfig {
    pub fn new(install_dir: impl Into<PathBuf>, token_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            token_dir: token_dir.into(),
            token_file_name: None,
            index_file: None,
            lineage: LineageKey::current(),
        }
    }
}

/// Token store using the index-file layout shared with shell sessions
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    config: FileTokenStoreConfig,
}

impl FileTokenStore {
    pub fn new(config: FileTokenStoreConfig) -> Self {
        Self { config }
    }

    /// Index file consulted by `load`
    pub fn index_path(&self) -> PathBuf {
        match &self.config.index_file {
            Some(path) => path.clone(),
            None => self
                .config
                .install_dir
                .join(INDEX_DIR_NAME)
                .join(self.config.lineage.index_file_name()),
        }
    }

    /// Payload file written by `save` for `username`
    pub fn token_path(&self, username: &str) -> Result<PathBuf> {
        let name = match &self.config.token_file_name {
            Some(name) => name.clone(),
            None => self.config.lineage.default_token_file_name(username),
        };
        absolute(&self.config.token_dir.join(name))
    }

    async fn read_index(&self) -> Result<PathBuf> {
        let index = self.index_path();
        let contents = fs::read_to_string(&index).await.map_err(|e| {
            Error::TokenNotFound(format!("cannot read token index {}: {}", index.display(), e))
        })?;

        let line = contents.lines().next().map(str::trim).unwrap_or_default();
        if line.is_empty() {
            return Err(Error::TokenNotFound(format!(
                "token index {} is empty",
                index.display()
            )));
        }
        Ok(PathBuf::from(line))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<SessionToken> {
        let payload = self.read_index().await?;
        let contents = fs::read_to_string(&payload).await.map_err(|e| {
            Error::TokenNotFound(format!("cannot read token file {}: {}", payload.display(), e))
        })?;

        let token = contents.lines().next().map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Err(Error::TokenNotFound(format!(
                "token file {} is empty",
                payload.display()
            )));
        }

        debug!("Loaded session token from {}", payload.display());
        Ok(SessionToken::new(token))
    }

    async fn save(&self, username: &str, token: &SessionToken) -> Result<()> {
        let payload = self.token_path(username)?;
        if let Some(parent) = payload.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_shared_file(&payload, token.as_str()).await?;

        let index = self.index_path();
        if let Some(parent) = index.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_shared_file(&index, &payload.to_string_lossy()).await?;

        info!(
            "Session token saved to {} (index {})",
            payload.display(),
            index.display()
        );
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if let Ok(payload) = self.read_index().await {
            remove_if_present(&payload).await?;
        }
        remove_if_present(&self.index_path()).await?;
        Ok(())
    }
}

/// Write `contents` as the whole file, owner rw and group/other r
async fn write_shared_file(path: &Path, contents: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o644);

    let mut file = options.open(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// =============================================================================
// Memory Token Store
// =============================================================================

/// Token store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<SessionToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: SessionToken) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<SessionToken> {
        self.token
            .read()
            .clone()
            .ok_or_else(|| Error::TokenNotFound("no token held in memory".into()))
    }

    async fn save(&self, _username: &str, token: &SessionToken) -> Result<()> {
        *self.token.write() = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.write() = None;
        Ok(())
    }
}
