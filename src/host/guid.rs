//! Data-plane GUID Probe
//!
//! The host-resident data-plane client exposes its GUID through a vendor
//! helper (`drv_cfg --query_guid`). Its entire stdout, trimmed, is the GUID.

use crate::domain::ports::{command_failure, CommandRunnerRef};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default install location of the vendor helper
pub const DEFAULT_GUID_HELPER: &str = "/opt/emc/scaleio/sdc/bin/drv_cfg";

const QUERY_GUID_ARG: &str = "--query_guid";

/// Queries the local data-plane client for its GUID
#[derive(Clone)]
pub struct GuidProbe {
    runner: CommandRunnerRef,
    helper: PathBuf,
}

impl GuidProbe {
    pub fn new(runner: CommandRunnerRef, helper: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            helper: helper.into(),
        }
    }

    pub fn helper(&self) -> &Path {
        &self.helper
    }

    /// Run the helper with root privilege and return the GUID
    pub async fn query_guid(&self) -> Result<String> {
        let program = self.helper.to_string_lossy();
        let command = format!("{} {}", program, QUERY_GUID_ARG);

        let output = self.runner.run(&program, &[QUERY_GUID_ARG], true).await?;
        if !output.success {
            return Err(command_failure(&command, &output));
        }

        let guid = output.stdout.trim();
        if guid.is_empty() {
            return Err(Error::Command {
                command,
                reason: "helper printed no GUID".into(),
            });
        }

        debug!("Data-plane GUID query returned {} bytes", guid.len());
        info!("Local data-plane client GUID: {}", guid);
        Ok(guid.to_string())
    }
}

impl std::fmt::Debug for GuidProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuidProbe").field("helper", &self.helper).finish()
    }
}
