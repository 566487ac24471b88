//! Agent Configuration
//!
//! YAML configuration for the agent binary. Every field has a default so an
//! empty document is valid; command-line flags override file values.
//!
//! ```yaml
//! endpoint:
//!   hostname: ctrl.example.com
//!   port: 4443
//!   verify_tls: true
//! credentials:
//!   username: root
//!   password: secret
//! install_dir: /opt/sds-volume-agent
//! qos:
//!   iops_limit: 1000
//!   bandwidth_limit_kbps: 102400
//! discovery:
//!   max_attempts: 15
//!   interval_ms: 1000
//! ```

use crate::controlplane::token_store::FileTokenStoreConfig;
use crate::controlplane::transport::TransportConfig;
use crate::domain::types::{Credentials, Endpoint, HostIdentitySource, QosPolicy, DEFAULT_PORT};
use crate::error::{Error, Result};
use crate::host::devices::{
    DeviceScannerConfig, DEFAULT_BY_ID_DIR, DEFAULT_DEVICE_PREFIX, DEFAULT_MAX_ATTEMPTS,
};
use crate::host::guid::DEFAULT_GUID_HELPER;
use crate::host::lineage::LineageKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INSTALL_DIR: &str = "/opt/sds-volume-agent";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

// =============================================================================
// Sections
// =============================================================================

/// Controller address and TLS settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub hostname: String,
    pub port: u16,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            verify_tls: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Defaults for the resolver when a name omits its scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDefaults {
    pub tenant: Option<String>,
    pub project: Option<String>,
    pub virtual_array: Option<String>,
}

/// How this host identifies itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub guid_helper: PathBuf,
    /// Prefix for commands needing root, e.g. `sudo -n`
    pub root_helper: Option<String>,
    /// Use the client registered under this IP instead of the GUID helper
    pub sdc_ip: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            guid_helper: PathBuf::from(DEFAULT_GUID_HELPER),
            root_helper: None,
            sdc_ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub by_id_dir: PathBuf,
    pub prefix: String,
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            by_id_dir: PathBuf::from(DEFAULT_BY_ID_DIR),
            prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub endpoint: EndpointConfig,
    pub credentials: CredentialsConfig,
    /// Root of the `cookie/` index directory
    pub install_dir: PathBuf,
    /// Directory for the token payload; the install dir when unset
    pub token_dir: Option<PathBuf>,
    pub token_filename: Option<String>,
    pub defaults: ResourceDefaults,
    pub qos: QosPolicy,
    pub host: HostConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            credentials: CredentialsConfig::default(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            token_dir: None,
            token_filename: None,
            defaults: ResourceDefaults::default(),
            qos: QosPolicy::default(),
            host: HostConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults when `path` is `None`; otherwise the file must exist and parse
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let data = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&data)
                    .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
            }
        }
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.hostname.trim().is_empty() {
            return Err(Error::Configuration("endpoint.hostname must not be empty".into()));
        }
        if self.endpoint.port == 0 {
            return Err(Error::Configuration("endpoint.port must not be 0".into()));
        }
        if self.endpoint.timeout_secs == 0 {
            return Err(Error::Configuration("endpoint.timeout_secs must not be 0".into()));
        }
        if self.discovery.max_attempts == 0 {
            return Err(Error::Configuration("discovery.max_attempts must not be 0".into()));
        }
        if self.discovery.prefix.is_empty() {
            return Err(Error::Configuration("discovery.prefix must not be empty".into()));
        }
        match (&self.credentials.username, &self.credentials.password) {
            (Some(_), None) | (None, Some(_)) => Err(Error::Configuration(
                "credentials need both username and password".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.endpoint.hostname.clone(), self.endpoint.port)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.credentials.username, &self.credentials.password) {
            (Some(user), Some(password)) => Some(Credentials::new(user.clone(), password.clone())),
            _ => None,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            verify_tls: self.endpoint.verify_tls,
            timeout: Duration::from_secs(self.endpoint.timeout_secs),
        }
    }

    pub fn token_store_config(&self) -> FileTokenStoreConfig {
        FileTokenStoreConfig {
            install_dir: self.install_dir.clone(),
            token_dir: self
                .token_dir
                .clone()
                .unwrap_or_else(|| self.install_dir.clone()),
            token_file_name: self.token_filename.clone(),
            index_file: None,
            lineage: LineageKey::current(),
        }
    }

    pub fn scanner_config(&self) -> DeviceScannerConfig {
        DeviceScannerConfig {
            by_id_dir: self.discovery.by_id_dir.clone(),
            prefix: self.discovery.prefix.clone(),
            max_attempts: self.discovery.max_attempts,
            poll_interval: Duration::from_millis(self.discovery.interval_ms),
        }
    }

    pub fn host_identity(&self) -> HostIdentitySource {
        match &self.host.sdc_ip {
            Some(ip) => HostIdentitySource::SdcIp(ip.clone()),
            None => HostIdentitySource::DataPlaneGuid,
        }
    }
}
