//! Packet Decision Engine
//!
//! Stateless per-packet verdicts against the policy tables.
//!
//! # Order of checks for IP
//!
//! 1. Multicast destination
//! 2. Non-initial fragment (only offset 1 with TCP can be denied)
//! 3. Inbound source against the reject list
//! 4. Upper-layer rules: TCP connection admission, UDP, ICMP, other
//!
//! Every deny bumps the direction's filtered counter and goes to the
//! [`EventLog`].

use crate::log::{DenyEvent, DenyReason, EventLog, TracingEventLog};
use crate::packet::{ports, Ipv4Header, ProtocolTag, TCP_ACK, TCP_MIN_LEN, TCP_SYN, UDP_MIN_LEN};
use drawbridge_common::{proto, AddressClass, Direction};
use drawbridge_policy::{match_network, FirewallState};
use serde::{Deserialize, Serialize};

/// Which TCP segments are evaluated against the ACLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpAdmission {
    /// Only connection attempts (SYN without ACK); everything else passes
    #[default]
    SynOnly,
    /// Every segment that carries a full header
    EverySegment,
}

/// Treatment of outbound UDP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundUdp {
    /// Pass all outbound UDP
    #[default]
    AllowAll,
    /// Check the destination port against the source host's `out` list
    CheckOutList,
}

/// Filter build options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// TCP evaluation mode
    pub tcp_admission: TcpAdmission,
    /// Outbound UDP mode
    pub outbound_udp: OutboundUdp,
    /// Drop frames that are not IP, ARP or RARP
    pub discard_other: bool,
    /// Drop multicast
    pub deny_multicast: bool,
    /// Drop TCP fragments at offset 1
    pub discard_suspect_offset: bool,
    /// Drop IP protocols other than TCP, UDP and ICMP
    pub discard_other_ip: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            tcp_admission: TcpAdmission::SynOnly,
            outbound_udp: OutboundUdp::AllowAll,
            discard_other: false,
            deny_multicast: false,
            discard_suspect_offset: true,
            discard_other_ip: false,
        }
    }
}

/// Filter verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Forward the frame
    Allow,
    /// Drop the frame
    Deny(DenyReason),
}

impl Decision {
    /// Check if allowed
    #[inline(always)]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Packet decision engine
pub struct PacketFilter<L = TracingEventLog> {
    options: FilterOptions,
    log: L,
}

impl PacketFilter<TracingEventLog> {
    /// Create filter logging through `tracing`
    pub fn new(options: FilterOptions) -> Self {
        Self::with_log(options, TracingEventLog)
    }
}

impl<L: EventLog> PacketFilter<L> {
    /// Create filter with a custom event log
    pub fn with_log(options: FilterOptions, log: L) -> Self {
        Self { options, log }
    }

    /// Active options
    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Event log
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Decide one network-layer packet
    pub fn decide(
        &mut self,
        state: &mut FirewallState,
        direction: Direction,
        tag: ProtocolTag,
        packet: &[u8],
    ) -> Decision {
        let verdict = match tag {
            ProtocolTag::Arp | ProtocolTag::Rarp => Ok(()),
            ProtocolTag::Other if self.options.discard_other => {
                Err(DenyEvent::bare(DenyReason::OtherProtocol, direction))
            }
            ProtocolTag::Other => Ok(()),
            ProtocolTag::Ip => self.decide_ip(state, direction, packet),
        };

        match verdict {
            Ok(()) => Decision::Allow,
            Err(event) => self.deny(state, event),
        }
    }

    /// Count and log a drop decided outside [`PacketFilter::decide`]
    pub fn deny(&mut self, state: &mut FirewallState, event: DenyEvent) -> Decision {
        state.stats.record_filtered(event.direction);
        self.log.log_event(&event);
        Decision::Deny(event.reason)
    }

    fn decide_ip(
        &self,
        state: &mut FirewallState,
        direction: Direction,
        packet: &[u8],
    ) -> Result<(), DenyEvent> {
        let ip = Ipv4Header::parse(packet)
            .map_err(|_| DenyEvent::bare(DenyReason::HeaderTruncated, direction))?;
        let deny = |reason| DenyEvent {
            reason,
            direction,
            protocol: ip.protocol,
            src: ip.src,
            dst: ip.dst,
            sport: None,
            dport: None,
        };

        if AddressClass::of(ip.dst) == AddressClass::D {
            return if self.options.deny_multicast {
                Err(deny(DenyReason::Multicast))
            } else {
                Ok(())
            };
        }

        // Only the first fragment carries the transport header
        if ip.fragment_offset != 0 {
            if self.options.discard_suspect_offset
                && ip.fragment_offset == 1
                && ip.protocol == proto::TCP
            {
                return Err(deny(DenyReason::SuspectFragment));
            }
            return Ok(());
        }

        if direction == Direction::Inbound && match_network(state.acl.reject(), ip.src).is_some() {
            return Err(deny(DenyReason::RejectedNetwork));
        }

        match ip.protocol {
            proto::TCP => self.decide_tcp(state, direction, &ip, packet, deny),
            proto::UDP => self.decide_udp(state, direction, &ip, packet, deny),
            proto::ICMP => Ok(()),
            _ if self.options.discard_other_ip => Err(deny(DenyReason::OtherIpProtocol)),
            _ => Ok(()),
        }
    }

    fn decide_tcp(
        &self,
        state: &mut FirewallState,
        direction: Direction,
        ip: &Ipv4Header,
        packet: &[u8],
        deny: impl Fn(DenyReason) -> DenyEvent,
    ) -> Result<(), DenyEvent> {
        let l4 = ip.payload(packet);
        if ip.total_len > packet.len() || l4.len() < TCP_MIN_LEN {
            return Err(deny(DenyReason::HeaderTruncated));
        }
        let Some((sport, dport)) = ports(l4) else {
            return Err(deny(DenyReason::HeaderTruncated));
        };

        let flags = l4[13];
        let connection_attempt = flags & (TCP_SYN | TCP_ACK) == TCP_SYN;
        if self.options.tcp_admission == TcpAdmission::SynOnly && !connection_attempt {
            return Ok(());
        }

        match direction {
            Direction::Inbound => {
                let class = state.classifier.lookup(ip.dst);
                let acl = state.acl.class(class);
                if acl.inbound.check_port(dport) {
                    return Ok(());
                }
                // Return traffic for passive-style data connections
                if dport > 900 && acl.source.check_port(sport) {
                    return Ok(());
                }
                Err(deny(DenyReason::TcpInbound).with_ports(sport, dport))
            }
            Direction::Outbound => {
                let class = state.classifier.lookup(ip.src);
                if state.acl.class(class).outbound.check_port(dport) {
                    return Ok(());
                }
                if let Some(entry) = match_network(state.acl.allow(), ip.dst) {
                    if entry.ranges.check_port(dport) {
                        return Ok(());
                    }
                }
                Err(deny(DenyReason::TcpOutbound).with_ports(sport, dport))
            }
        }
    }

    fn decide_udp(
        &self,
        state: &mut FirewallState,
        direction: Direction,
        ip: &Ipv4Header,
        packet: &[u8],
        deny: impl Fn(DenyReason) -> DenyEvent,
    ) -> Result<(), DenyEvent> {
        let l4 = ip.payload(packet);
        if l4.len() < UDP_MIN_LEN {
            return Err(deny(DenyReason::HeaderTruncated));
        }
        let Some((sport, dport)) = ports(l4) else {
            return Err(deny(DenyReason::HeaderTruncated));
        };

        match direction {
            Direction::Inbound => {
                let class = state.classifier.lookup(ip.dst);
                if state.acl.class(class).udp.check_port(dport) {
                    Ok(())
                } else {
                    Err(deny(DenyReason::UdpInbound).with_ports(sport, dport))
                }
            }
            Direction::Outbound => match self.options.outbound_udp {
                OutboundUdp::AllowAll => Ok(()),
                OutboundUdp::CheckOutList => {
                    let class = state.classifier.lookup(ip.src);
                    if state.acl.class(class).outbound.check_port(dport) {
                        Ok(())
                    } else {
                        Err(deny(DenyReason::UdpOutbound).with_ports(sport, dport))
                    }
                }
            },
        }
    }
}
