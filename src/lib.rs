// Core modules
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod models;
pub mod replay;
pub mod report;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use error::ReplayError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, ReplayError>;
