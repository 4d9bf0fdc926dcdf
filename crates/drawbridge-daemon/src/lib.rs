//! Drawbridge Daemon
//!
//! Wires the policy tables, the packet filter and the management channel
//! to real sockets:
//!
//! - Configuration from a JSON file (`CONFIG_PATH`)
//! - Persisted tables and password loaded at start
//! - Two UDP-tunnelled bridge ports plus the management socket
//! - Deferred restart on REBOOT

#![warn(missing_docs)]

pub mod config;
pub mod daemon;
pub mod link;

pub use config::{DaemonConfig, LinkConfig, ManagementConfig, DEFAULT_CONFIG_PATH};
pub use daemon::{Daemon, Exit};
pub use link::UdpLink;

use std::net::SocketAddr;
use thiserror::Error;

/// Daemon errors
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Socket could not be bound
    #[error("cannot bind {what} socket {addr}: {source}")]
    Bind {
        /// Which socket
        what: &'static str,
        /// Requested address
        addr: SocketAddr,
        /// Cause
        source: std::io::Error,
    },

    /// Bad configuration file
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
