pub mod device;
pub mod layout;
pub mod settings;
