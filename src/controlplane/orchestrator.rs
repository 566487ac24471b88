//! Volume Orchestrator
//!
//! Shared plumbing for attach and detach: host identity resolution and the
//! volume action endpoints. The flows themselves live in `attach` and
//! `detach`.

use crate::controlplane::resolver::NameResolver;
use crate::controlplane::session::{ControllerResponse, ControllerSession};
use crate::domain::types::{HostIdentity, HostIdentitySource};
use crate::error::{Error, Result};
use crate::host::devices::DeviceScanner;
use crate::host::guid::GuidProbe;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Server `errorCode` for a map of an already mapped volume
pub const ERROR_CODE_ALREADY_MAPPED: i64 = 81;
/// Server `errorCode` for an unmap of a volume that is not mapped
pub const ERROR_CODE_NOT_MAPPED: i64 = 84;

// =============================================================================
// Volume Actions
// =============================================================================

/// Mapping actions exposed under `/api/instances/Volume::<id>/action/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAction {
    AddMappedSdc,
    SetMappedSdcLimits,
    RemoveMappedSdc,
}

impl VolumeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeAction::AddMappedSdc => "addMappedSdc",
            VolumeAction::SetMappedSdcLimits => "setMappedSdcLimits",
            VolumeAction::RemoveMappedSdc => "removeMappedSdc",
        }
    }

    pub fn path(&self, volume_id: &str) -> String {
        format!("/api/instances/Volume::{}/action/{}", volume_id, self.as_str())
    }
}

impl fmt::Display for VolumeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON object carrying the host identity plus `extra` fields
pub(crate) fn identity_body(identity: &HostIdentity, extra: &[(&str, Value)]) -> Value {
    let (key, value) = identity.body_field();
    let mut body = Map::new();
    body.insert(key.to_string(), Value::String(value.to_string()));
    for (name, value) in extra {
        body.insert((*name).to_string(), value.clone());
    }
    Value::Object(body)
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Makes Controller volumes appear and disappear as local block devices
pub struct VolumeOrchestrator {
    session: Arc<ControllerSession>,
    guid_probe: GuidProbe,
    scanner: DeviceScanner,
}

impl VolumeOrchestrator {
    pub fn new(session: Arc<ControllerSession>, guid_probe: GuidProbe, scanner: DeviceScanner) -> Self {
        Self {
            session,
            guid_probe,
            scanner,
        }
    }

    pub fn session(&self) -> &Arc<ControllerSession> {
        &self.session
    }

    pub fn scanner(&self) -> &DeviceScanner {
        &self.scanner
    }

    /// Resolver scoped to a single attach or detach
    pub(crate) fn resolver(&self) -> NameResolver {
        NameResolver::new(self.session.clone())
    }

    /// Turn the configured identity source into the identity sent in bodies
    pub async fn resolve_host_identity(
        &self,
        source: &HostIdentitySource,
        resolver: &NameResolver,
    ) -> Result<HostIdentity> {
        let identity = match source {
            HostIdentitySource::DataPlaneGuid => HostIdentity::Guid(self.guid_probe.query_guid().await?),
            HostIdentitySource::SdcIp(ip) => HostIdentity::SdcId(resolver.resolve_client_by_ip(ip).await?),
        };
        debug!("Host identity resolved to {}", identity);
        Ok(identity)
    }

    pub(crate) async fn volume_action(
        &self,
        volume_id: &str,
        action: VolumeAction,
        body: &Value,
    ) -> Result<ControllerResponse> {
        debug!("Volume {} action {}", volume_id, action);
        self.session
            .post(&action.path(volume_id), body)
            .await
            .map_err(|e| mapping_error(e, volume_id))
    }
}

/// Lift the mapping state codes out of a generic HTTP failure
fn mapping_error(err: Error, volume_id: &str) -> Error {
    match err.error_code() {
        Some(ERROR_CODE_ALREADY_MAPPED) => Error::AlreadyExists {
            kind: "mapping".into(),
            name: volume_id.into(),
        },
        Some(ERROR_CODE_NOT_MAPPED) => Error::NotMapped {
            volume_id: volume_id.into(),
        },
        _ => err,
    }
}

impl fmt::Debug for VolumeOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeOrchestrator")
            .field("session", &self.session)
            .field("guid_probe", &self.guid_probe)
            .field("scanner", &self.scanner)
            .finish()
    }
}
