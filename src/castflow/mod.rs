pub mod codec;
pub mod config;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod store;
