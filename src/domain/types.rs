//! Domain Types
//!
//! Value types exchanged between the session, resolver and orchestrators.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default Controller HTTPS port
pub const DEFAULT_PORT: u16 = 4443;

// =============================================================================
// Endpoint
// =============================================================================

/// Host and port of the Controller. Always spoken to over TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Parse `host`, `host:port` or `https://host:port`
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_end_matches('/');
        let rest = match trimmed.split_once("://") {
            Some(("https", rest)) => rest,
            Some((scheme, _)) => {
                return Err(Error::BadInput(format!(
                    "unsupported scheme '{}' in endpoint '{}', only https is allowed",
                    scheme, input
                )))
            }
            None => trimmed,
        };

        let (hostname, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::BadInput(format!("invalid port in endpoint '{}'", input))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if hostname.is_empty() {
            return Err(Error::BadInput(format!("missing hostname in endpoint '{}'", input)));
        }

        Ok(Self::new(hostname, port))
    }

    /// Base URL all request paths are joined onto
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.hostname, self.port)
    }

    /// Absolute URL for a server-relative path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

// =============================================================================
// Credentials & Token
// =============================================================================

/// Username and password, held only for the duration of a login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque server-issued session token
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} bytes>)", self.0.len())
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// True when `value` already has the Controller identifier shape
/// `urn:<product>:<rest>`
pub fn is_urn(value: &str) -> bool {
    let mut parts = value.splitn(3, ':');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some("urn"), Some(product), Some(rest)) if !product.is_empty() && !rest.is_empty()
    )
}

/// Hierarchical `tenant/project/volume` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePath {
    /// `None` selects the caller's root tenant
    pub tenant: Option<String>,
    pub project: String,
    pub volume: String,
}

impl VolumePath {
    /// Accepts `tenant/project/volume` or `project/volume`
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::BadInput(format!("malformed volume name '{}'", input)));
        }

        match parts.as_slice() {
            [tenant, project, volume] => Ok(Self {
                tenant: Some(tenant.to_string()),
                project: project.to_string(),
                volume: volume.to_string(),
            }),
            [project, volume] => Ok(Self {
                tenant: None,
                project: project.to_string(),
                volume: volume.to_string(),
            }),
            _ => Err(Error::BadInput(format!(
                "volume name '{}' must be tenant/project/volume or project/volume",
                input
            ))),
        }
    }
}

impl fmt::Display for VolumePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{}/{}/{}", tenant, self.project, self.volume),
            None => write!(f, "{}/{}", self.project, self.volume),
        }
    }
}

// =============================================================================
// Host Identity
// =============================================================================

/// How this host identifies itself to the Controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostIdentitySource {
    /// Query the local data-plane helper for the client GUID
    DataPlaneGuid,
    /// Look up the client record by its IP address
    SdcIp(String),
}

impl Default for HostIdentitySource {
    fn default() -> Self {
        HostIdentitySource::DataPlaneGuid
    }
}

/// Resolved identity used in map/unmap/QoS bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostIdentity {
    Guid(String),
    SdcId(String),
}

impl HostIdentity {
    /// JSON key and value identifying this host in an action body
    pub fn body_field(&self) -> (&'static str, &str) {
        match self {
            HostIdentity::Guid(guid) => ("guid", guid),
            HostIdentity::SdcId(id) => ("sdcId", id),
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (key, value) = self.body_field();
        write!(f, "{}={}", key, value)
    }
}

// =============================================================================
// QoS
// =============================================================================

/// Per-client limits applied after mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosPolicy {
    pub iops_limit: Option<u64>,
    pub bandwidth_limit_kbps: Option<u64>,
}

impl QosPolicy {
    /// Limits are applied only when both are present
    pub fn limits(&self) -> Option<(u64, u64)> {
        match (self.iops_limit, self.bandwidth_limit_kbps) {
            (Some(iops), Some(bw)) => Some((iops, bw)),
            _ => None,
        }
    }
}

// =============================================================================
// Connection Descriptor & Device Handle
// =============================================================================

/// Everything an attach or detach needs beyond the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Controller form of the volume name
    pub volume_name: String,
    pub host: HostIdentitySource,
    pub qos: QosPolicy,
}

impl ConnectionDescriptor {
    pub fn new(volume_name: impl Into<String>, host: HostIdentitySource) -> Self {
        Self {
            volume_name: volume_name.into(),
            host,
            qos: QosPolicy::default(),
        }
    }

    pub fn with_qos(mut self, qos: QosPolicy) -> Self {
        self.qos = qos;
        self
    }
}

/// Kind of local disk presented to the hypervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Block,
}

/// A volume that appeared as a local block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDevice {
    /// Path under the by-id directory
    pub path: PathBuf,
    pub volume_id: String,
    pub disk_type: DiskType,
    pub attached_at: DateTime<Utc>,
}
