//! Filter Statistics
//!
//! Packet counters kept by the dispatcher and decision engine. Everything
//! runs on one execution context, so plain integers are enough.

use crate::Direction;
use serde::{Deserialize, Serialize};

/// Live filter counters
#[derive(Debug, Default, Clone)]
pub struct FilterStats {
    filtered_in: u64,
    filtered_out: u64,
    forwarded_in: u64,
    forwarded_out: u64,
    received_inside: u64,
    received_outside: u64,
    transmitted_inside: u64,
    transmitted_outside: u64,
    dropped: u64,
}

impl FilterStats {
    /// Count a denied packet
    #[inline(always)]
    pub fn record_filtered(&mut self, direction: Direction) {
        match direction {
            Direction::Inbound => self.filtered_in += 1,
            Direction::Outbound => self.filtered_out += 1,
        }
    }

    /// Count a packet handed to the opposite interface
    #[inline(always)]
    pub fn record_forwarded(&mut self, direction: Direction) {
        match direction {
            Direction::Inbound => {
                self.forwarded_in += 1;
                self.transmitted_inside += 1;
            }
            Direction::Outbound => {
                self.forwarded_out += 1;
                self.transmitted_outside += 1;
            }
        }
    }

    /// Count a frame arriving from a driver.
    ///
    /// Inbound frames arrive on the outside interface, outbound on the inside.
    #[inline(always)]
    pub fn record_received(&mut self, direction: Direction) {
        match direction {
            Direction::Inbound => self.received_outside += 1,
            Direction::Outbound => self.received_inside += 1,
        }
    }

    /// Count a frame lost without a filter decision
    #[inline(always)]
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Copy out the counters; cache figures come from the classifier
    pub fn snapshot(&self, cache_accesses: u64, cache_misses: u64) -> FilterStatsSnapshot {
        FilterStatsSnapshot {
            filtered_in: self.filtered_in,
            filtered_out: self.filtered_out,
            forwarded_in: self.forwarded_in,
            forwarded_out: self.forwarded_out,
            received_inside: self.received_inside,
            received_outside: self.received_outside,
            transmitted_inside: self.transmitted_inside,
            transmitted_outside: self.transmitted_outside,
            cache_accesses,
            cache_misses,
            dropped: self.dropped,
        }
    }

    /// Zero every counter
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Stats snapshot, in wire order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStatsSnapshot {
    pub filtered_in: u64,
    pub filtered_out: u64,
    pub forwarded_in: u64,
    pub forwarded_out: u64,
    pub received_inside: u64,
    pub received_outside: u64,
    pub transmitted_inside: u64,
    pub transmitted_outside: u64,
    pub cache_accesses: u64,
    pub cache_misses: u64,
    pub dropped: u64,
}

impl FilterStatsSnapshot {
    /// Number of counters carried on the wire
    pub const FIELDS: usize = 11;

    /// Counters in wire order
    pub fn to_array(&self) -> [u64; Self::FIELDS] {
        [
            self.filtered_in,
            self.filtered_out,
            self.forwarded_in,
            self.forwarded_out,
            self.received_inside,
            self.received_outside,
            self.transmitted_inside,
            self.transmitted_outside,
            self.cache_accesses,
            self.cache_misses,
            self.dropped,
        ]
    }

    /// Rebuild from wire order
    pub fn from_array(v: [u64; Self::FIELDS]) -> Self {
        Self {
            filtered_in: v[0],
            filtered_out: v[1],
            forwarded_in: v[2],
            forwarded_out: v[3],
            received_inside: v[4],
            received_outside: v[5],
            transmitted_inside: v[6],
            transmitted_outside: v[7],
            cache_accesses: v[8],
            cache_misses: v[9],
            dropped: v[10],
        }
    }

    /// Fraction of classifier lookups served from the cache
    pub fn cache_hit_rate(&self) -> f64 {
        if self.cache_accesses == 0 {
            return 0.0;
        }
        (self.cache_accesses - self.cache_misses) as f64 / self.cache_accesses as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_counters() {
        let mut stats = FilterStats::default();
        stats.record_received(Direction::Inbound);
        stats.record_filtered(Direction::Inbound);
        stats.record_received(Direction::Outbound);
        stats.record_forwarded(Direction::Outbound);
        stats.record_drop();

        let snap = stats.snapshot(10, 4);
        assert_eq!(snap.received_outside, 1);
        assert_eq!(snap.filtered_in, 1);
        assert_eq!(snap.received_inside, 1);
        assert_eq!(snap.forwarded_out, 1);
        assert_eq!(snap.transmitted_outside, 1);
        assert_eq!(snap.dropped, 1);
        assert!((snap.cache_hit_rate() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let mut stats = FilterStats::default();
        stats.record_filtered(Direction::Outbound);
        stats.clear();
        assert_eq!(stats.snapshot(0, 0), FilterStatsSnapshot::default());
    }

    #[test]
    fn test_wire_order() {
        let snap = FilterStatsSnapshot::from_array([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(snap.cache_misses, 10);
        assert_eq!(snap.to_array()[10], 11);
    }
}
