//! Drawbridge Data Plane
//!
//! Per-packet filtering between the inside and outside segments.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Bridge                           │
//! │                                                           │
//! │  FrameDriver (inside)          FrameDriver (outside)      │
//! │        │                              │                   │
//! │        └───────────► FrameQueue ◄─────┘                   │
//! │                          │                                │
//! │                          ▼                                │
//! │                 split_ethernet → ProtocolTag              │
//! │                          │                                │
//! │                          ▼                                │
//! │   PacketFilter ──► FirewallState (classifier + ACLs)      │
//! │        │                                                  │
//! │        ├── Allow → opposite FrameDriver                   │
//! │        └── Deny  → EventLog + filtered counter            │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Each frame is run to completion; nothing is remembered between frames
//! beyond the policy tables and the classifier cache.

#![warn(missing_docs)]

pub mod bridge;
pub mod filter;
pub mod log;
pub mod packet;

pub use bridge::{Bridge, Frame, FrameDriver, FrameQueue, Interface};
pub use filter::{Decision, FilterOptions, OutboundUdp, PacketFilter, TcpAdmission};
pub use log::{DenyEvent, DenyReason, EventLog, TracingEventLog};
pub use packet::{Ipv4Header, ProtocolTag};
