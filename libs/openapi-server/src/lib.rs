//! Operator API models for the control plane.

pub mod models;

pub use models::*;
