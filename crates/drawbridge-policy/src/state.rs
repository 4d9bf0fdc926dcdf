//! Firewall state
//!
//! Everything the packet path and the management channel share, in one
//! context object handed to each of them by reference.

use crate::arena::Arena;
use crate::classifier::AddressClassifier;
use crate::store::AccessControlStore;
use drawbridge_common::{FilterStats, FilterStatsSnapshot};

/// Shared filter context
pub struct FirewallState {
    /// Host to policy-class mapping
    pub classifier: AddressClassifier,
    /// ACL tables
    pub acl: AccessControlStore,
    /// Packet counters
    pub stats: FilterStats,
}

impl FirewallState {
    /// Create state with compiled-in defaults and no networks
    pub fn new(arena: Box<dyn Arena>) -> Self {
        Self {
            classifier: AddressClassifier::new(arena),
            acl: AccessControlStore::new(),
            stats: FilterStats::default(),
        }
    }

    /// Counters including the classifier's cache figures
    pub fn statistics(&self) -> FilterStatsSnapshot {
        let (accesses, misses) = self.classifier.cache_stats();
        self.stats.snapshot(accesses, misses)
    }

    /// Zero all counters
    pub fn clear_statistics(&mut self) {
        self.stats.clear();
        self.classifier.clear_cache_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;
    use drawbridge_common::Direction;

    #[test]
    fn test_statistics_merge_cache_counters() {
        let mut state = FirewallState::new(Box::new(HeapArena::default()));
        state.stats.record_filtered(Direction::Inbound);
        state.classifier.lookup(0xC0A8_0101);

        let snap = state.statistics();
        assert_eq!(snap.filtered_in, 1);
        assert_eq!(snap.cache_accesses, 1);
        assert_eq!(snap.cache_misses, 1);

        state.clear_statistics();
        assert_eq!(state.statistics(), FilterStatsSnapshot::default());
    }
}
