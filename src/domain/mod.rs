//! Domain Module
//!
//! Core types and port traits for the attach/detach control plane.

pub mod ports;
pub mod types;

pub use ports::*;
pub use types::*;
