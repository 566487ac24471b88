//! By-id Device Scanner
//!
//! After a successful map the kernel presents the volume under
//! `/dev/disk/by-id` as `<prefix>...<volume id>`. The scanner polls that
//! directory at a fixed interval until the entry appears or the attempt
//! budget runs out.

use crate::error::{Error, Result};
use glob::{glob, Pattern};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_BY_ID_DIR: &str = "/dev/disk/by-id";
pub const DEFAULT_DEVICE_PREFIX: &str = "emc-vol";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for device discovery
#[derive(Debug, Clone)]
pub struct DeviceScannerConfig {
    /// Directory holding stable device links
    pub by_id_dir: PathBuf,
    /// Vendor prefix of the link basename
    pub prefix: String,
    /// Number of checks before giving up
    pub max_attempts: u32,
    /// Sleep between checks
    pub poll_interval: Duration,
}

impl Default for DeviceScannerConfig {
    fn default() -> Self {
        Self {
            by_id_dir: PathBuf::from(DEFAULT_BY_ID_DIR),
            prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// =============================================================================
// Device Scanner
// =============================================================================

/// Watches the by-id directory for mapped volumes
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    config: DeviceScannerConfig,
}

impl DeviceScanner {
    pub fn new(config: DeviceScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeviceScannerConfig {
        &self.config
    }

    /// Glob pattern matching `<prefix>*<volume_id>` inside the by-id directory
    fn pattern(&self, volume_id: &str) -> String {
        let dir = Pattern::escape(&self.config.by_id_dir.to_string_lossy());
        format!(
            "{}/{}*{}",
            dir.trim_end_matches('/'),
            Pattern::escape(&self.config.prefix),
            Pattern::escape(volume_id)
        )
    }

    /// Single look at the directory; first match in lexical order wins
    pub fn find(&self, volume_id: &str) -> Result<Option<PathBuf>> {
        let pattern = self.pattern(volume_id);
        let entries = glob(&pattern)
            .map_err(|e| Error::BadInput(format!("invalid device pattern '{}': {}", pattern, e)))?;

        for entry in entries {
            match entry {
                Ok(path) if self.matches(&path, volume_id) => return Ok(Some(path)),
                Ok(_) => continue,
                Err(e) => warn!("Skipping unreadable by-id entry: {}", e),
            }
        }
        Ok(None)
    }

    fn matches(&self, path: &Path, volume_id: &str) -> bool {
        path.file_name()
            .map(|name| {
                let name = name.to_string_lossy();
                name.starts_with(&self.config.prefix) && name.ends_with(volume_id)
            })
            .unwrap_or(false)
    }

    /// `find` on the blocking pool; globbing touches the filesystem
    async fn scan(&self, volume_id: &str) -> Result<Option<PathBuf>> {
        let scanner = self.clone();
        let volume_id = volume_id.to_string();
        tokio::task::spawn_blocking(move || scanner.find(&volume_id))
            .await
            .map_err(|e| Error::Internal(format!("device scan task failed: {}", e)))?
    }

    /// Poll until the device for `volume_id` appears.
    ///
    /// Performs at most `max_attempts` checks, sleeping `poll_interval`
    /// after each miss, and fails with `Error::DeviceNotFound` once the
    /// budget is spent.
    pub async fn wait_for_device(&self, volume_id: &str) -> Result<PathBuf> {
        for attempt in 1..=self.config.max_attempts {
            if let Some(path) = self.scan(volume_id).await? {
                info!(
                    "Volume {} present at {} (attempt {})",
                    volume_id,
                    path.display(),
                    attempt
                );
                return Ok(path);
            }

            debug!(
                "Device for volume {} not present yet ({}/{})",
                volume_id, attempt, self.config.max_attempts
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(Error::DeviceNotFound {
            volume_id: volume_id.to_string(),
            directory: self.config.by_id_dir.display().to_string(),
            prefix: self.config.prefix.clone(),
            attempts: self.config.max_attempts,
        })
    }
}

impl Default for DeviceScanner {
    fn default() -> Self {
        Self::new(DeviceScannerConfig::default())
    }
}
