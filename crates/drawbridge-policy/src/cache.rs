//! Two-way set-associative classification cache
//!
//! Each line covers a pair of adjacent hosts: the tag is the address with
//! its parity bit cleared and the parity bit picks one of the two stored
//! class indices. Lines are rebuilt from the network table on demand, so
//! the whole cache may be zeroed at any time.

use drawbridge_common::PolicyClass;

/// Number of sets
pub const CACHE_SETS: usize = 4096;

/// Address bits selecting the set (bit 0 is the parity bit)
pub const CACHE_TAG_MASK: u32 = 0x1FFE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CacheLine {
    tag: u32,
    timestamp: u32,
    indices: [PolicyClass; 2],
}

/// Set-associative cache of host policy classes
pub struct ClassifierCache {
    sets: Box<[[CacheLine; 2]]>,
    clock: u32,
    accesses: u64,
    misses: u64,
}

impl ClassifierCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            sets: vec![[CacheLine::default(); 2]; CACHE_SETS].into_boxed_slice(),
            clock: 0,
            accesses: 0,
            misses: 0,
        }
    }

    #[inline(always)]
    fn set_index(ip: u32) -> usize {
        ((ip & CACHE_TAG_MASK) >> 1) as usize
    }

    #[inline(always)]
    fn tick(&mut self) -> u32 {
        self.clock = self.clock.wrapping_add(1);
        self.clock
    }

    /// Probe both lines of the address's set.
    ///
    /// A hit refreshes the line's timestamp.
    #[inline]
    pub fn probe(&mut self, ip: u32) -> Option<PolicyClass> {
        self.accesses += 1;
        let tag = ip & !1;
        let now = self.tick();
        let set = &mut self.sets[Self::set_index(ip)];

        for line in set.iter_mut() {
            if line.tag == tag {
                line.timestamp = now;
                return Some(line.indices[(ip & 1) as usize]);
            }
        }

        self.misses += 1;
        None
    }

    /// Replace the older line of the address's set with a fetched pair
    #[inline]
    pub fn fill(&mut self, ip: u32, indices: [PolicyClass; 2]) {
        let now = self.tick();
        let set = &mut self.sets[Self::set_index(ip)];

        // Wrapping age so the comparison survives clock rollover
        let age0 = now.wrapping_sub(set[0].timestamp);
        let age1 = now.wrapping_sub(set[1].timestamp);
        let victim = if age0 >= age1 { 0 } else { 1 };

        set[victim] = CacheLine {
            tag: ip & !1,
            timestamp: now,
            indices,
        };
    }

    /// Zero every line
    pub fn flush(&mut self) {
        self.sets.fill([CacheLine::default(); 2]);
    }

    /// Lookups seen
    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    /// Lookups that needed a fetch
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Zero the access counters
    pub fn clear_stats(&mut self) {
        self.accesses = 0;
        self.misses = 0;
    }
}

impl Default for ClassifierCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_selects_parity() {
        let mut cache = ClassifierCache::new();
        let ip = 0xC0A8_0110;

        assert_eq!(cache.probe(ip), None);
        cache.fill(ip, [3, 7]);

        assert_eq!(cache.probe(ip), Some(3));
        assert_eq!(cache.probe(ip | 1), Some(7));
        assert_eq!(cache.accesses(), 3);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_evicts_older_line() {
        let mut cache = ClassifierCache::new();
        // Three tags that share a set
        let a = 0xC0A8_0010;
        let b = a + 0x2000;
        let c = a + 0x4000;
        assert_eq!(ClassifierCache::set_index(a), ClassifierCache::set_index(b));
        assert_eq!(ClassifierCache::set_index(a), ClassifierCache::set_index(c));

        cache.fill(a, [1, 1]);
        cache.fill(b, [2, 2]);
        // Touch a so b becomes the older line
        assert_eq!(cache.probe(a), Some(1));
        cache.fill(c, [3, 3]);

        assert_eq!(cache.probe(a), Some(1));
        assert_eq!(cache.probe(c), Some(3));
        assert_eq!(cache.probe(b), None);
    }

    #[test]
    fn test_flush() {
        let mut cache = ClassifierCache::new();
        cache.fill(0x8001_0002, [5, 6]);
        cache.flush();
        assert_eq!(cache.probe(0x8001_0002), None);
    }
}
