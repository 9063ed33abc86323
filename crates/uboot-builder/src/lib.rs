pub mod config;
pub mod error;
pub mod executor;
pub mod log_sanitize;
pub mod stages;
pub mod workspace;

pub use error::{Error, Result};
