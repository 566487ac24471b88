//! SDS Volume Agent
//!
//! Host-side agent that attaches Controller-managed volumes as local block
//! devices and detaches them again.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Volume Orchestrator                        │
//! │        attach: resolve → map → QoS → discover                  │
//! │        detach: resolve → unmap                                 │
//! ├──────────────────────┬────────────────────┬───────────────────┤
//! │    Name Resolver     │   Auth Controller  │   Host probes     │
//! │  (names → ids)       │  (login / logout)  │  GUID helper,     │
//! │                      │                    │  by-id scanner    │
//! ├──────────────────────┴────────────────────┴───────────────────┤
//! │                    Controller Session                          │
//! │      headers, token store, error taxonomy, one re-login        │
//! ├───────────────────────────────────────────────────────────────┤
//! │                 HTTPS Transport (reqwest)                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Controller session, auth, resolver and orchestrators
//! - [`host`]: Local helpers (GUID probe, device scanner, commands)
//! - [`domain`]: Core domain types and ports
//! - [`config`]: YAML agent configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod host;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::AgentConfig;

pub use controlplane::{
    AttachState, AuthController, ControllerSession, FileTokenStore, FileTokenStoreConfig,
    MemoryTokenStore, NameResolver, ReqwestTransport, TransportConfig, VolumeOrchestrator,
    VpoolKind,
};

pub use domain::ports::{CommandRunner, Reauthenticator, TokenStore, Transport};
pub use domain::types::{
    AttachedDevice, ConnectionDescriptor, Credentials, Endpoint, HostIdentity,
    HostIdentitySource, QosPolicy, SessionToken,
};

pub use error::{Error, ErrorKind, Result};

pub use host::{DeviceScanner, DeviceScannerConfig, GuidProbe, SystemCommandRunner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
