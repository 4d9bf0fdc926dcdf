//! Deny event logging

use drawbridge_common::{dotted, Direction};
use serde::Serialize;

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Non-IP, non-ARP frame while discarding others
    OtherProtocol,
    /// Multicast destination while multicast is denied
    Multicast,
    /// Fragment at offset 1 carrying TCP
    SuspectFragment,
    /// Source network on the reject list
    RejectedNetwork,
    /// Header too short to evaluate
    HeaderTruncated,
    /// Inbound TCP connection attempt not admitted
    TcpInbound,
    /// Outbound TCP connection attempt not admitted
    TcpOutbound,
    /// Inbound UDP not admitted
    UdpInbound,
    /// Outbound UDP not admitted
    UdpOutbound,
    /// IP protocol other than TCP, UDP or ICMP
    OtherIpProtocol,
}

impl DenyReason {
    /// Short name for logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OtherProtocol => "other_protocol",
            Self::Multicast => "multicast",
            Self::SuspectFragment => "suspect_fragment",
            Self::RejectedNetwork => "rejected_network",
            Self::HeaderTruncated => "header_truncated",
            Self::TcpInbound => "tcp_inbound",
            Self::TcpOutbound => "tcp_outbound",
            Self::UdpInbound => "udp_inbound",
            Self::UdpOutbound => "udp_outbound",
            Self::OtherIpProtocol => "other_ip_protocol",
        }
    }
}

/// A dropped packet, with whatever header fields were readable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DenyEvent {
    /// Reason code
    pub reason: DenyReason,
    /// Direction across the bridge
    pub direction: Direction,
    /// IP protocol, 0 when not IP
    pub protocol: u8,
    /// Source address, 0 when unknown
    pub src: u32,
    /// Destination address, 0 when unknown
    pub dst: u32,
    /// Source port
    pub sport: Option<u16>,
    /// Destination port
    pub dport: Option<u16>,
}

impl DenyEvent {
    /// Event with no header fields
    pub fn bare(reason: DenyReason, direction: Direction) -> Self {
        Self {
            reason,
            direction,
            protocol: 0,
            src: 0,
            dst: 0,
            sport: None,
            dport: None,
        }
    }

    /// Attach ports
    pub fn with_ports(mut self, sport: u16, dport: u16) -> Self {
        self.sport = Some(sport);
        self.dport = Some(dport);
        self
    }
}

/// Receiver of deny events
pub trait EventLog {
    /// Record one dropped packet
    fn log_event(&mut self, event: &DenyEvent);
}

/// Emits each deny as a structured `tracing` warning
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log_event(&mut self, event: &DenyEvent) {
        tracing::warn!(
            reason = event.reason.as_str(),
            direction = %event.direction,
            protocol = event.protocol,
            src = %dotted(event.src),
            dst = %dotted(event.dst),
            sport = ?event.sport,
            dport = ?event.dport,
            "packet denied"
        );
    }
}
