//! Kernex Agent Library
//!
//! Device-side half of the Kernex fleet update system: registration,
//! heartbeat polling, and download-verify-install of update bundles.

pub mod app;
pub mod authn;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod installer;
pub mod logs;
pub mod storage;
pub mod telemetry;
pub mod update;
pub mod utils;
pub mod workers;
