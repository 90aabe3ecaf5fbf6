pub mod config;
pub mod patch;
pub mod service;

pub use config::DeltadConfig;
pub use service::DeltaService;
