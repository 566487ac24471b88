//! Attach
//!
//! Resolve the volume, map it to this host, optionally cap its QoS, then
//! wait for the kernel to present it under the by-id directory.
//!
//! An "already mapped" answer on the map call counts as success. A QoS
//! failure is reported as [`Error::QosFailed`] after the mapping exists and
//! discovery is skipped. A discovery timeout leaves the mapping in place.

use crate::controlplane::orchestrator::{identity_body, VolumeAction, VolumeOrchestrator};
use crate::domain::types::{AttachedDevice, ConnectionDescriptor, DiskType, HostIdentity};
use crate::error::{Error, ErrorKind, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Progress of a single attach call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachState {
    Resolving,
    Mapping,
    Qos,
    Discovering,
    Attached,
    Failed,
}

impl AttachState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttachState::Attached | AttachState::Failed)
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttachState::Resolving => "Resolving",
            AttachState::Mapping => "Mapping",
            AttachState::Qos => "QoS",
            AttachState::Discovering => "Discovering",
            AttachState::Attached => "Attached",
            AttachState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Logs each transition of one attach
struct AttachProgress<'a> {
    volume: &'a str,
    state: AttachState,
}

impl<'a> AttachProgress<'a> {
    fn start(volume: &'a str) -> Self {
        info!("Attach {}: {}", volume, AttachState::Resolving);
        Self {
            volume,
            state: AttachState::Resolving,
        }
    }

    fn advance(&mut self, next: AttachState) {
        debug!("Attach {}: {} -> {}", self.volume, self.state, next);
        if next == AttachState::Failed {
            error!("Attach {}: {} failed", self.volume, self.state);
        } else {
            info!("Attach {}: {}", self.volume, next);
        }
        self.state = next;
    }
}

impl VolumeOrchestrator {
    /// Make the described volume appear as a local block device
    pub async fn attach(&self, descriptor: &ConnectionDescriptor) -> Result<AttachedDevice> {
        let mut progress = AttachProgress::start(&descriptor.volume_name);

        match self.run_attach(descriptor, &mut progress).await {
            Ok(device) => {
                progress.advance(AttachState::Attached);
                Ok(device)
            }
            Err(e) => {
                progress.advance(AttachState::Failed);
                Err(e.context(format!("attach volume {}", descriptor.volume_name)))
            }
        }
    }

    async fn run_attach(
        &self,
        descriptor: &ConnectionDescriptor,
        progress: &mut AttachProgress<'_>,
    ) -> Result<AttachedDevice> {
        let resolver = self.resolver();
        let volume_id = resolver.resolve_volume_by_name(&descriptor.volume_name).await?;
        let identity = self.resolve_host_identity(&descriptor.host, &resolver).await?;

        progress.advance(AttachState::Mapping);
        self.map_volume(&volume_id, &identity).await?;

        if let Some((iops, bandwidth)) = descriptor.qos.limits() {
            progress.advance(AttachState::Qos);
            self.apply_qos(&volume_id, &identity, iops, bandwidth)
                .await
                .map_err(|e| Error::QosFailed {
                    volume_id: volume_id.clone(),
                    source: Box::new(e),
                })?;
        }

        progress.advance(AttachState::Discovering);
        let path = self.scanner().wait_for_device(&volume_id).await?;

        Ok(AttachedDevice {
            path,
            volume_id,
            disk_type: DiskType::Block,
            attached_at: Utc::now(),
        })
    }

    async fn map_volume(&self, volume_id: &str, identity: &HostIdentity) -> Result<()> {
        let body = identity_body(identity, &[("allowMultipleMappings", json!("TRUE"))]);

        match self.volume_action(volume_id, VolumeAction::AddMappedSdc, &body).await {
            Ok(_) => {
                info!("Mapped volume {} to {}", volume_id, identity);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("{} for {}, continuing", e, identity);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_qos(
        &self,
        volume_id: &str,
        identity: &HostIdentity,
        iops: u64,
        bandwidth_kbps: u64,
    ) -> Result<()> {
        let body = identity_body(
            identity,
            &[
                ("iopsLimit", json!(iops)),
                ("bandwidthLimitInKbps", json!(bandwidth_kbps)),
            ],
        );

        if let Err(e) = self
            .volume_action(volume_id, VolumeAction::SetMappedSdcLimits, &body)
            .await
        {
            error!("Setting QoS limits on volume {} failed: {}", volume_id, e);
            return Err(e);
        }

        info!(
            "Applied QoS to volume {}: {} IOPS, {} KB/s",
            volume_id, iops, bandwidth_kbps
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{HostIdentitySource, QosPolicy};
    use crate::testing::{AttachHarness, TEST_GUID, TEST_USER};
    use assert_matches::assert_matches;
    use reqwest::Method;

    const VOLUME: &str = "acme/proj1/vol1";
    const VOLUME_ID: &str = "5e4a0a1b00000001";

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new(VOLUME, HostIdentitySource::DataPlaneGuid)
    }

    fn action_path(action: VolumeAction) -> String {
        action.path(VOLUME_ID)
    }

    #[tokio::test]
    async fn test_happy_path_attach() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);

        let device = harness.orchestrator.attach(&descriptor()).await.unwrap();

        assert_eq!(device.volume_id, VOLUME_ID);
        assert_eq!(device.disk_type, DiskType::Block);
        let name = device.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("emc-vol"));
        assert!(name.ends_with(VOLUME_ID));

        let controller = &harness.controller;
        assert_eq!(
            controller.count_requests(
                &Method::GET,
                "/api/types/Volume/instances/getByName::acme%252Fproj1%252Fvol1"
            ),
            1
        );
        let maps = controller.requests_to(&action_path(VolumeAction::AddMappedSdc));
        assert_eq!(maps.len(), 1);
        let body = maps[0].json_body().unwrap();
        assert_eq!(body["guid"], TEST_GUID);
        assert_eq!(body["allowMultipleMappings"], "TRUE");
        assert!(controller
            .requests_to(&action_path(VolumeAction::SetMappedSdcLimits))
            .is_empty());
    }

    #[tokio::test]
    async fn test_attach_with_qos() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        let descriptor = descriptor().with_qos(QosPolicy {
            iops_limit: Some(1000),
            bandwidth_limit_kbps: Some(102400),
        });

        harness.orchestrator.attach(&descriptor).await.unwrap();

        let requests = harness.controller.requests();
        let map_at = requests
            .iter()
            .position(|r| r.path == action_path(VolumeAction::AddMappedSdc))
            .unwrap();
        let qos_at = requests
            .iter()
            .position(|r| r.path == action_path(VolumeAction::SetMappedSdcLimits))
            .unwrap();
        assert!(map_at < qos_at);

        let body = requests[qos_at].json_body().unwrap();
        assert_eq!(body["iopsLimit"], 1000);
        assert_eq!(body["bandwidthLimitInKbps"], 102400);
        assert!(body["iopsLimit"].is_u64());
        assert_eq!(body["guid"], TEST_GUID);
    }

    #[tokio::test]
    async fn test_partial_qos_is_ignored() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        let descriptor = descriptor().with_qos(QosPolicy {
            iops_limit: Some(1000),
            bandwidth_limit_kbps: None,
        });

        harness.orchestrator.attach(&descriptor).await.unwrap();
        assert!(harness
            .controller
            .requests_to(&action_path(VolumeAction::SetMappedSdcLimits))
            .is_empty());
    }

    #[tokio::test]
    async fn test_qos_failure_is_distinct() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        harness.controller.fail_qos();
        let descriptor = descriptor().with_qos(QosPolicy {
            iops_limit: Some(1000),
            bandwidth_limit_kbps: Some(102400),
        });

        let err = harness.orchestrator.attach(&descriptor).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Qos);
        assert!(err.to_string().starts_with("attach volume acme/proj1/vol1"));

        // The mapping stays for the caller to decide on
        assert!(harness.controller.is_mapped(VOLUME_ID, TEST_GUID));
    }

    #[tokio::test]
    async fn test_already_mapped_attach() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        harness.controller.premap(VOLUME_ID, TEST_GUID);

        let device = harness.orchestrator.attach(&descriptor()).await.unwrap();
        assert!(device.path.exists());

        let maps = harness
            .controller
            .requests_to(&action_path(VolumeAction::AddMappedSdc));
        assert_eq!(maps.len(), 1);
    }

    #[tokio::test]
    async fn test_other_map_error_code_fails() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        harness.controller.route(
            Method::POST,
            &action_path(VolumeAction::AddMappedSdc),
            400,
            serde_json::json!({"errorCode": 7, "message": "volume is being deleted"}),
        );

        let err = harness.orchestrator.attach(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenericHttp);
        assert_eq!(err.error_code(), Some(7));
    }

    #[tokio::test]
    async fn test_discovery_timeout() {
        let harness = AttachHarness::builder()
            .materialize_devices(false)
            .max_attempts(3)
            .build();
        harness.controller.add_volume(VOLUME, VOLUME_ID);

        let err = harness.orchestrator.attach(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("Device not found at expected path"));
        assert_matches!(err, Error::Context { ref source, .. } => {
            assert_matches!(**source, Error::DeviceNotFound { attempts: 3, .. });
        });

        assert!(harness
            .controller
            .requests_to(&action_path(VolumeAction::RemoveMappedSdc))
            .is_empty());
        assert!(harness.controller.is_mapped(VOLUME_ID, TEST_GUID));
    }

    #[tokio::test]
    async fn test_unknown_volume() {
        let harness = AttachHarness::new();

        let err = harness.orchestrator.attach(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(harness.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_guid_helper_failure() {
        let harness = AttachHarness::builder().guid_helper_fails().build();
        harness.controller.add_volume(VOLUME, VOLUME_ID);

        let err = harness.orchestrator.attach(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Command);
        assert!(harness
            .controller
            .requests_to(&action_path(VolumeAction::AddMappedSdc))
            .is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_attach() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);

        let first = harness.orchestrator.attach(&descriptor()).await.unwrap();
        let second = harness.orchestrator.attach(&descriptor()).await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.volume_id, second.volume_id);
    }

    #[tokio::test]
    async fn test_attach_by_sdc_ip() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        harness.controller.add_client("10.0.0.21", "7d8a5c1f00000003");
        let descriptor = ConnectionDescriptor::new(VOLUME, HostIdentitySource::SdcIp("10.0.0.21".into()))
            .with_qos(QosPolicy {
                iops_limit: Some(500),
                bandwidth_limit_kbps: Some(2048),
            });

        harness.orchestrator.attach(&descriptor).await.unwrap();

        let maps = harness
            .controller
            .requests_to(&action_path(VolumeAction::AddMappedSdc));
        let body = maps[0].json_body().unwrap();
        assert_eq!(body["sdcId"], "7d8a5c1f00000003");
        assert!(body.get("guid").is_none());

        let qos = harness
            .controller
            .requests_to(&action_path(VolumeAction::SetMappedSdcLimits));
        assert_eq!(qos[0].json_body().unwrap()["sdcId"], "7d8a5c1f00000003");
    }

    #[tokio::test]
    async fn test_expired_token_during_attach() {
        let harness = AttachHarness::new();
        harness.controller.add_volume(VOLUME, VOLUME_ID);
        harness.controller.expire_token(1);

        harness.orchestrator.attach(&descriptor()).await.unwrap();

        assert_eq!(harness.controller.login_count(), 1);
        assert_eq!(
            harness.controller.count_requests(
                &Method::GET,
                "/api/types/Volume/instances/getByName::acme%252Fproj1%252Fvol1"
            ),
            2
        );
        let last_login = harness
            .controller
            .requests()
            .into_iter()
            .filter(|r| r.path == "/login?using-cookies")
            .last()
            .unwrap();
        assert_eq!(last_login.basic_user.as_deref(), Some(TEST_USER));
    }

    #[tokio::test]
    async fn test_concurrent_attaches() {
        let harness = AttachHarness::new();
        harness.controller.add_volume("acme/proj1/vol1", "5e4a0a1b00000001");
        harness.controller.add_volume("acme/proj1/vol2", "5e4a0a1b00000002");

        let a = ConnectionDescriptor::new("acme/proj1/vol1", HostIdentitySource::DataPlaneGuid);
        let b = ConnectionDescriptor::new("acme/proj1/vol2", HostIdentitySource::DataPlaneGuid);
        let (first, second) = tokio::join!(
            harness.orchestrator.attach(&a),
            harness.orchestrator.attach(&b)
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first.path, second.path);
        assert!(first.path.to_string_lossy().ends_with("5e4a0a1b00000001"));
        assert!(second.path.to_string_lossy().ends_with("5e4a0a1b00000002"));
    }

    #[test]
    fn test_attach_state_display() {
        assert_eq!(AttachState::Qos.to_string(), "QoS");
        assert!(AttachState::Attached.is_terminal());
        assert!(AttachState::Failed.is_terminal());
        assert!(!AttachState::Discovering.is_terminal());
    }
}
