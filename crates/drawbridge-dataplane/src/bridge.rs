//! Bridge dispatcher
//!
//! Frames arrive on one of two interfaces, wait in a bounded queue, and are
//! run to completion one at a time: split the Ethernet header, decide,
//! then hand allowed frames to the opposite interface's driver.
//!
//! ```text
//!  inside ──► ┐                             ┌──► outside (Outbound)
//!             ├─► FrameQueue ─► PacketFilter┤
//!  outside ─► ┘                             └──► inside  (Inbound)
//! ```

use crate::filter::{Decision, PacketFilter};
use crate::log::{DenyEvent, DenyReason, EventLog, TracingEventLog};
use crate::packet::split_ethernet;
use bytes::Bytes;
use drawbridge_common::Direction;
use drawbridge_policy::FirewallState;
use std::collections::VecDeque;
use std::io;

/// Default queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Frames handled per call to [`Bridge::process`]
pub const BATCH_SIZE: usize = 64;

/// Bridge port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Protected segment
    Inside,
    /// Untrusted segment
    Outside,
}

impl Interface {
    /// Direction of frames received on this interface
    #[inline(always)]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Inside => Direction::Outbound,
            Self::Outside => Direction::Inbound,
        }
    }
}

/// Link-layer transmit side of an interface
pub trait FrameDriver {
    /// Transmit one frame
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// A received frame and the interface it came from
#[derive(Debug, Clone)]
pub struct Frame {
    /// Receiving interface
    pub interface: Interface,
    /// Ethernet II frame
    pub data: Bytes,
}

/// Bounded FIFO of received frames
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    depth: usize,
}

impl FrameQueue {
    /// Create queue holding at most `depth` frames
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Queue a frame, handing it back when full
    pub fn enqueue(&mut self, frame: Frame) -> Result<(), Frame> {
        if self.frames.len() >= self.depth {
            return Err(frame);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Oldest queued frame
    pub fn dequeue(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Queued frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

/// Two-port filtering bridge
pub struct Bridge<D: FrameDriver, L: EventLog = TracingEventLog> {
    filter: PacketFilter<L>,
    inside: D,
    outside: D,
    queue: FrameQueue,
}

impl<D: FrameDriver, L: EventLog> Bridge<D, L> {
    /// Create bridge between two drivers
    pub fn new(filter: PacketFilter<L>, inside: D, outside: D, queue: FrameQueue) -> Self {
        Self {
            filter,
            inside,
            outside,
            queue,
        }
    }

    /// Filter in use
    pub fn filter(&self) -> &PacketFilter<L> {
        &self.filter
    }

    /// Driver for an interface
    pub fn driver(&self, interface: Interface) -> &D {
        match interface {
            Interface::Inside => &self.inside,
            Interface::Outside => &self.outside,
        }
    }

    /// Accept a frame from a driver.
    ///
    /// Frames that find the queue full are dropped and counted.
    pub fn receive(&mut self, state: &mut FirewallState, frame: Frame) {
        state.stats.record_received(frame.interface.direction());
        if let Err(frame) = self.queue.enqueue(frame) {
            state.stats.record_drop();
            tracing::debug!(interface = ?frame.interface, "frame queue full");
        }
    }

    /// Run up to [`BATCH_SIZE`] queued frames to completion.
    ///
    /// Returns the number handled.
    pub fn process(&mut self, state: &mut FirewallState) -> usize {
        let mut handled = 0;
        while handled < BATCH_SIZE {
            let Some(frame) = self.queue.dequeue() else {
                break;
            };
            self.dispatch(state, &frame);
            handled += 1;
        }
        handled
    }

    /// Decide one frame and forward it if allowed
    pub fn dispatch(&mut self, state: &mut FirewallState, frame: &Frame) -> Decision {
        let direction = frame.interface.direction();
        let (tag, packet) = match split_ethernet(&frame.data) {
            Ok(split) => split,
            Err(e) => {
                tracing::debug!(%direction, error = %e, "runt frame");
                return self
                    .filter
                    .deny(state, DenyEvent::bare(DenyReason::HeaderTruncated, direction));
            }
        };

        let decision = self.filter.decide(state, direction, tag, packet);
        if decision.is_allow() {
            let out = match frame.interface {
                Interface::Inside => &mut self.outside,
                Interface::Outside => &mut self.inside,
            };
            match out.send_frame(&frame.data) {
                Ok(()) => state.stats.record_forwarded(direction),
                Err(e) => {
                    state.stats.record_drop();
                    tracing::warn!(%direction, error = %e, "transmit failed");
                }
            }
        }
        decision
    }
}
