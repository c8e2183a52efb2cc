//! Device protocol models
//!
//! Everything a device exchanges with the control plane: registration,
//! heartbeats, the commands returned in heartbeat responses, and
//! deployment result submissions.

pub mod models;

pub use models::*;
