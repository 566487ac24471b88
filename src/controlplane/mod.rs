//! Controller Control Plane
//!
//! Everything that talks to the Controller: the HTTPS transport, the
//! authenticated session, login/logout, name resolution and the
//! attach/detach orchestration built on top of them.

pub mod attach;
pub mod auth;
pub mod detach;
pub mod orchestrator;
pub mod resolver;
pub mod session;
pub mod token_store;
pub mod transport;

pub use attach::AttachState;
pub use auth::AuthController;
pub use orchestrator::{VolumeAction, VolumeOrchestrator};
pub use resolver::{NameResolver, VpoolKind};
pub use session::{ControllerResponse, ControllerSession, MediaType, RequestOptions};
pub use token_store::{FileTokenStore, FileTokenStoreConfig, MemoryTokenStore};
pub use transport::{ReqwestTransport, TransportConfig};
