//! Run loop
//!
//! One task owns the filter state and services every socket in turn, so
//! management commands and packet decisions never overlap.
//!
//! ```text
//!   mgmt socket ──► allow-list ──► ManagementChannel ──► reply
//!   inside link ──┐
//!                 ├──► Bridge::receive ──► Bridge::process ──► opposite link
//!   outside link ─┘
//!   reboot deadline ──► exit
//! ```

use crate::config::DaemonConfig;
use crate::link::{UdpLink, MAX_FRAME, RECV_BUF};
use crate::DaemonError;
use bytes::Bytes;
use drawbridge_dataplane::{Bridge, Frame, FrameQueue, Interface, PacketFilter};
use drawbridge_mgmt::{FileStore, ManagementChannel, TableStore};
use drawbridge_policy::{FirewallState, HeapArena};
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::UdpSocket;

/// Largest management datagram
pub const MAX_DATAGRAM: usize = 2048;

/// Why the run loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// An operator asked for a restart
    Reboot,
}

/// Bound sockets plus the filter they feed
pub struct Daemon {
    config: DaemonConfig,
    state: FirewallState,
    bridge: Bridge<UdpLink>,
    channel: ManagementChannel<FileStore>,
    mgmt: UdpSocket,
    inside: UdpLink,
    outside: UdpLink,
}

impl Daemon {
    /// Load persisted tables and bind every socket
    pub async fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        let store = FileStore::new(&config.data_dir, &config.password_file);
        let mut state = FirewallState::new(Box::new(HeapArena::new(config.arena_bytes)));

        let report = store.load_all(&mut state);
        tracing::info!(tables = report.tables, networks = report.networks, "tables loaded");

        let password = match store.read_password() {
            Ok(password) => password,
            Err(e) => {
                tracing::warn!(error = %e, "password unreadable, running insecure");
                None
            }
        };
        if password.is_none() {
            tracing::info!("no password loaded, management is insecure");
        }

        let mgmt = UdpSocket::bind(config.management.bind)
            .await
            .map_err(|source| DaemonError::Bind {
                what: "management",
                addr: config.management.bind,
                source,
            })?;
        let inside = bind_link("inside", config.inside.bind, config.inside.peer).await?;
        let outside = bind_link("outside", config.outside.bind, config.outside.peer).await?;

        let channel = ManagementChannel::new(store, password).with_reboot_delay(config.reboot_delay());
        let bridge = Bridge::new(
            PacketFilter::new(config.filter),
            inside.clone(),
            outside.clone(),
            FrameQueue::new(config.queue_depth),
        );

        Ok(Self {
            config,
            state,
            bridge,
            channel,
            mgmt,
            inside,
            outside,
        })
    }

    /// Bound (management, inside, outside) addresses
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr, SocketAddr), DaemonError> {
        Ok((
            self.mgmt.local_addr()?,
            self.inside.local_addr()?,
            self.outside.local_addr()?,
        ))
    }

    /// Serve until a reboot is due
    pub async fn run(mut self) -> Result<Exit, DaemonError> {
        let inside = self.inside.socket();
        let outside = self.outside.socket();
        let mut mgmt_buf = vec![0u8; MAX_DATAGRAM];
        let mut inside_buf = vec![0u8; RECV_BUF];
        let mut outside_buf = vec![0u8; RECV_BUF];

        tracing::info!(
            management = %self.config.management.bind,
            inside = %self.config.inside.bind,
            outside = %self.config.outside.bind,
            "drawbridge up"
        );

        loop {
            let deadline = self.channel.reboot_deadline();
            tokio::select! {
                received = self.mgmt.recv_from(&mut mgmt_buf) => {
                    if let Some((len, from)) = received_or_log("management", received) {
                        self.on_management(&mgmt_buf[..len], from).await;
                    }
                }
                received = inside.recv_from(&mut inside_buf) => {
                    if let Some((len, from)) = received_or_log("inside", received) {
                        self.on_frame(Interface::Inside, &inside_buf[..len], from);
                    }
                }
                received = outside.recv_from(&mut outside_buf) => {
                    if let Some((len, from)) = received_or_log("outside", received) {
                        self.on_frame(Interface::Outside, &outside_buf[..len], from);
                    }
                }
                _ = reboot_timer(deadline) => {
                    tracing::info!("rebooting");
                    return Ok(Exit::Reboot);
                }
            }
        }
    }

    async fn on_management(&mut self, datagram: &[u8], from: SocketAddr) {
        if !self.config.management.is_manager(from.ip()) {
            tracing::debug!(%from, "management datagram from unlisted host");
            return;
        }
        let Some(reply) = self.channel.handle_message(&mut self.state, datagram) else {
            return;
        };
        if let Err(e) = self.mgmt.send_to(&reply, from).await {
            tracing::warn!(%from, error = %e, "management reply not sent");
        }
    }

    fn on_frame(&mut self, interface: Interface, frame: &[u8], from: SocketAddr) {
        let peer = match interface {
            Interface::Inside => self.inside.peer(),
            Interface::Outside => self.outside.peer(),
        };
        if from != peer {
            tracing::debug!(?interface, %from, "frame from unknown sender");
            return;
        }
        if frame.len() > MAX_FRAME {
            self.state.stats.record_received(interface.direction());
            self.state.stats.record_drop();
            tracing::warn!(?interface, len = frame.len(), "oversized frame dropped");
            return;
        }
        self.bridge.receive(
            &mut self.state,
            Frame {
                interface,
                data: Bytes::copy_from_slice(frame),
            },
        );
        self.bridge.process(&mut self.state);
    }
}

/// Socket errors on a datagram socket are per-datagram; the loop keeps serving
fn received_or_log(
    socket: &'static str,
    received: io::Result<(usize, SocketAddr)>,
) -> Option<(usize, SocketAddr)> {
    match received {
        Ok(received) => Some(received),
        Err(e) => {
            tracing::warn!(socket, error = %e, "receive failed");
            None
        }
    }
}

async fn bind_link(what: &'static str, bind: SocketAddr, peer: SocketAddr) -> Result<UdpLink, DaemonError> {
    UdpLink::bind(bind, peer)
        .await
        .map_err(|source| DaemonError::Bind { what, addr: bind, source })
}

async fn reboot_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}
