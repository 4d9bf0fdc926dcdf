//! UDP-tunnelled interface links
//!
//! Each bridge port is a UDP socket exchanging raw Ethernet frames with a
//! single peer (a TAP helper, a test harness, another filter).

use drawbridge_dataplane::FrameDriver;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Largest frame accepted from a link, an 802.1Q tagged frame with FCS
pub const MAX_FRAME: usize = 1522;

/// Receive buffer size; a datagram that fills it is oversized
pub const RECV_BUF: usize = MAX_FRAME + 1;

/// Transmit side of a link
#[derive(Debug, Clone)]
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpLink {
    /// Bind a link socket
    pub async fn bind(bind: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self {
            socket: Arc::new(socket),
            peer,
        })
    }

    /// Socket shared with the receive loop
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// Far end
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl FrameDriver for UdpLink {
    /// Never waits; a full socket buffer surfaces as `WouldBlock`.
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let sent = self.socket.try_send_to(frame, self.peer)?;
        if sent != frame.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short frame send"));
        }
        Ok(())
    }
}
