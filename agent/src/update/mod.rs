pub mod bundle;
pub mod executor;
pub mod fsm;
pub mod integrity;
pub mod launcher;
