//! Error types for pixerlink.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pixerlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pixerlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every connection attempt to the device failed.
    #[error("Failed to connect to {target} after {attempts} attempts")]
    ConnectionFailed {
        /// `host:port` that was dialed.
        target: String,
        /// Number of attempts made.
        attempts: usize,
    },

    /// The channel was used after it was closed.
    #[error("Not connected")]
    NotConnected,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Device did not answer a handshake step.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload exceeds the transfer size limit.
    #[error("Payload too large: {size} bytes (limit {max})")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured limit in bytes.
        max: usize,
    },

    /// Image source file does not exist.
    #[error("File '{}' not found", .0.display())]
    SourceNotFound(PathBuf),

    /// Image could not be decoded.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
