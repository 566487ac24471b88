//! Detach
//!
//! Removes this host's mapping of a volume. A "not mapped" answer counts as
//! success. The local device link may linger for a moment after the unmap;
//! it is not waited on.

use crate::controlplane::orchestrator::{identity_body, VolumeAction, VolumeOrchestrator};
use crate::domain::types::ConnectionDescriptor;
use crate::error::{ErrorKind, Result, ResultExt};
use tracing::{info, warn};

impl VolumeOrchestrator {
    /// Unmap the described volume from this host
    pub async fn detach(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        self.run_detach(descriptor)
            .await
            .with_context(|| format!("detach volume {}", descriptor.volume_name))
    }

    async fn run_detach(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        let resolver = self.resolver();
        let identity = self.resolve_host_identity(&descriptor.host, &resolver).await?;
        let volume_id = resolver.resolve_volume_by_name(&descriptor.volume_name).await?;

        let body = identity_body(&identity, &[]);
        match self
            .volume_action(&volume_id, VolumeAction::RemoveMappedSdc, &body)
            .await
        {
            Ok(_) => {
                info!("Unmapped volume {} from {}", volume_id, identity);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotMapped => {
                warn!("{} ({}), nothing to unmap", e, identity);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
