//! Drawbridge Policy Tables
//!
//! The two data stores the filter consults for every packet.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      FirewallState                       │
//! │                                                          │
//! │  ┌────────────────────────┐   ┌───────────────────────┐  │
//! │  │   AddressClassifier    │   │  AccessControlStore   │  │
//! │  │                        │   │                       │  │
//! │  │  2-way cache (4K sets) │   │  class → in/out/      │  │
//! │  │          │ miss        │   │          source/udp   │  │
//! │  │  NetworkTable          │   │  allow list           │  │
//! │  │          │             │   │  reject list          │  │
//! │  │  Arena host tables     │   │                       │  │
//! │  └────────────────────────┘   └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The classifier answers "which policy class is this host in"; the store
//! answers "does that class admit this port".

#![warn(missing_docs)]

pub mod acl;
pub mod arena;
pub mod cache;
pub mod classifier;
pub mod network;
pub mod state;
pub mod store;

pub use acl::{match_network, AllowEntry, ClassAcl, PortRange, PortRangeList, RejectEntry};
pub use arena::{Arena, ArenaError, ArenaHandle, HeapArena};
pub use classifier::AddressClassifier;
pub use network::{NetworkEntry, NetworkTable, TableError};
pub use state::FirewallState;
pub use store::{AccessControlStore, AclTable};
