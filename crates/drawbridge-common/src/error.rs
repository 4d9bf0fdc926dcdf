//! Error types for Drawbridge

use thiserror::Error;

/// Drawbridge error type
#[derive(Error, Debug)]
pub enum DrawbridgeError {
    /// No entry for the requested network
    #[error("network not loaded: {0:#010x}")]
    NoNetwork(u32),

    /// Address is not a class B or C unicast address
    #[error("unsupported address class for {0:#010x}")]
    UnsupportedAddress(u32),

    /// Backing memory for a table could not be reserved
    #[error("out of table memory")]
    OutOfMemory,

    /// Table image has the wrong shape
    #[error("malformed table image: {0}")]
    MalformedTable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for Drawbridge
pub type DrawbridgeResult<T> = Result<T, DrawbridgeError>;
