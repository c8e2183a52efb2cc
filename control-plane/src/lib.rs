//! Kernex control plane
//!
//! Tracks bundles, devices and deployments, and hands deployment and
//! configuration commands to devices in heartbeat responses.

pub mod activity;
pub mod app;
pub mod blob;
pub mod bundles;
pub mod configs;
pub mod deployments;
pub mod devices;
pub mod dispatcher;
pub mod errors;
pub mod fs;
pub mod integrity;
pub mod logs;
pub mod models;
pub mod server;
pub mod settings;
pub mod store;
