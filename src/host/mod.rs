//! Host Module
//!
//! Everything the agent learns from the local machine: the process lineage
//! that keys the token index, the data-plane client GUID, and the block
//! device nodes the kernel presents after a mapping. Also the terminal, for
//! reading a password without echo.

pub mod command;
pub mod devices;
pub mod guid;
pub mod lineage;
pub mod prompt;

pub use command::*;
pub use devices::*;
pub use guid::*;
pub use lineage::*;
