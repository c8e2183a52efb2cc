pub mod bundles;
pub mod client;
pub mod deployments;
pub mod devices;
