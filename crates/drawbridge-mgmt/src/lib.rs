//! Drawbridge Management Channel
//!
//! UDP request/response protocol for loading, querying and persisting the
//! filter's tables.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  SYNC / SYNCACK (clear)   ┌──────────────────────────┐
//! │ManagerClient │ ────────────────────────► │    ManagementChannel     │
//! │              │  QUERY LOAD WRITE ...     │                          │
//! │              │ ◄──────────────────────── │  Session   (key state)   │
//! └──────────────┘  sealed with session key  │  Loader    (LOAD staging)│
//!                                            │  TableStore (persistence)│
//!                                            └────────────┬─────────────┘
//!                                                         ▼
//!                                                   FirewallState
//! ```
//!
//! # Framing
//!
//! Every datagram starts with a 6-byte header (type, flags, nonce,
//! checksum). The checksum covers everything after the flags byte. Once a
//! session key exists, that same region is encrypted; ERROR replies never
//! are.

#![warn(missing_docs)]

pub mod channel;
pub mod checksum;
pub mod client;
pub mod crypto;
pub mod framing;
pub mod persist;
pub mod session;
pub mod staging;
pub mod wire;

pub use channel::{ManagementChannel, DEFAULT_REBOOT_DELAY};
pub use client::{parse_networks, parse_statistics, ClientError, ManagerClient, Reply};
pub use crypto::{ChaChaCipher, FrameCipher, SessionKey};
pub use persist::{BootReport, FileStore, PersistError, TableStore};
pub use session::{Session, SessionState};
pub use staging::{LoadError, Loader};
pub use wire::{ErrorCode, MessageType, QueryKind, TableKind, WireError};
