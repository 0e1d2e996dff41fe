//! Crate-wide error type for configuration.
//!
//! Component-specific failures (for example [`crate::supervisor::StartError`])
//! have their own enums. The binaries wrap everything in `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
