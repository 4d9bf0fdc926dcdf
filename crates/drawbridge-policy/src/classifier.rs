//! Address classifier
//!
//! Maps a host address to its policy class: cache first, then the network
//! table and the arena-resident host table behind it.
//!
//! ```text
//!   ip ──► ClassifierCache ──hit──► class
//!              │ miss
//!              ▼
//!          NetworkTable ──none──► class 0
//!              │ entry
//!              ▼
//!          Arena (host table, 2-host granule) ──► fill line ──► class
//! ```

use crate::arena::{Arena, ArenaError, ArenaHandle};
use crate::cache::ClassifierCache;
use crate::network::{NetworkEntry, NetworkTable, TableError};
use drawbridge_common::{
    dotted, host_table_len, AddressClass, DrawbridgeError, PolicyClass, DEFAULT_CLASS,
};

/// Host-address to policy-class classifier
pub struct AddressClassifier {
    arena: Box<dyn Arena>,
    networks: NetworkTable,
    cache: ClassifierCache,
}

impl AddressClassifier {
    /// Create classifier with no networks loaded
    pub fn new(arena: Box<dyn Arena>) -> Self {
        Self {
            arena,
            networks: NetworkTable::default(),
            cache: ClassifierCache::new(),
        }
    }

    /// Policy class of a host.
    ///
    /// Class A and E addresses, and hosts on networks with no host table,
    /// get the default class. Multicast is filtered before it gets here.
    #[inline]
    pub fn lookup(&mut self, ip: u32) -> PolicyClass {
        let Some(split) = AddressClass::split(ip) else {
            return DEFAULT_CLASS;
        };

        if let Some(class) = self.cache.probe(ip) {
            return class;
        }

        let Some(entry) = self.networks.get(split.network) else {
            return DEFAULT_CLASS;
        };

        let mut granule = [DEFAULT_CLASS; 2];
        if let Err(e) = self.arena.copy_out(&entry.host_table, split.host & !1, &mut granule) {
            tracing::warn!(network = %dotted(split.network), error = %e, "host table unreadable");
            return DEFAULT_CLASS;
        }

        self.cache.fill(ip, granule);
        granule[(ip & 1) as usize]
    }

    /// Drop every cached classification
    pub fn flush(&mut self) {
        self.cache.flush();
    }

    // ========================================================================
    // Host tables
    // ========================================================================

    /// Reserve a zeroed host table sized for `network`
    pub fn alloc_host_table(&mut self, network: u32) -> Result<ArenaHandle, DrawbridgeError> {
        let len = host_table_len(network).ok_or(DrawbridgeError::UnsupportedAddress(network))?;
        self.arena.alloc(len).map_err(|e| match e {
            ArenaError::Exhausted { .. } => DrawbridgeError::OutOfMemory,
            other => DrawbridgeError::MalformedTable(other.to_string()),
        })
    }

    /// Write into a host table that is not installed yet
    pub fn write_host_table(&mut self, handle: &ArenaHandle, offset: usize, data: &[u8]) -> Result<(), ArenaError> {
        self.arena.copy_in(handle, offset, data)
    }

    /// Return an uninstalled host table to the arena
    pub fn free_host_table(&mut self, handle: ArenaHandle) {
        self.arena.free(handle);
    }

    /// Install a host table for a network, replacing any previous one.
    ///
    /// The cache is flushed because the mapping of tags to tables changed.
    pub fn install_network(&mut self, network: u32, handle: ArenaHandle) -> Result<(), TableError> {
        if !self.networks.can_insert(network) {
            self.arena.free(handle);
            return Err(TableError::Full(self.networks.capacity()));
        }
        if let Some(old) = self.networks.insert(network, handle)? {
            self.arena.free(old);
        }
        self.cache.flush();
        tracing::debug!(network = %dotted(network), "network installed");
        Ok(())
    }

    /// Install a network from a persisted host-table image
    pub fn load_network(&mut self, network: u32, image: &[u8]) -> Result<(), DrawbridgeError> {
        let expected = host_table_len(network).ok_or(DrawbridgeError::UnsupportedAddress(network))?;
        if image.len() != expected {
            return Err(DrawbridgeError::MalformedTable(format!(
                "host table for {} is {} bytes, expected {}",
                dotted(network),
                image.len(),
                expected
            )));
        }

        let handle = self.alloc_host_table(network)?;
        if let Err(e) = self.arena.copy_in(&handle, 0, image) {
            self.arena.free(handle);
            return Err(DrawbridgeError::MalformedTable(e.to_string()));
        }
        if let Err(e) = self.install_network(network, handle) {
            return Err(DrawbridgeError::Config(e.to_string()));
        }
        self.mark_clean(network);
        Ok(())
    }

    /// Remove a network and free its host table
    pub fn release_network(&mut self, network: u32) -> bool {
        match self.networks.remove(network) {
            Some(entry) => {
                self.arena.free(entry.host_table);
                self.cache.flush();
                true
            }
            None => false,
        }
    }

    /// Copy of a network's host table
    pub fn host_table(&self, network: u32) -> Result<Vec<u8>, DrawbridgeError> {
        let entry = self
            .networks
            .get(network)
            .ok_or(DrawbridgeError::NoNetwork(network))?;
        let len = self
            .arena
            .block_len(&entry.host_table)
            .map_err(|e| DrawbridgeError::MalformedTable(e.to_string()))?;
        let mut image = vec![0u8; len];
        self.arena
            .copy_out(&entry.host_table, 0, &mut image)
            .map_err(|e| DrawbridgeError::MalformedTable(e.to_string()))?;
        Ok(image)
    }

    /// Loaded networks
    pub fn networks(&self) -> impl Iterator<Item = &NetworkEntry> {
        self.networks.iter()
    }

    /// Networks changed since they were last persisted
    pub fn dirty_networks(&self) -> Vec<u32> {
        self.networks
            .iter()
            .filter(|e| e.dirty)
            .map(|e| e.network)
            .collect()
    }

    /// Clear a network's dirty flag after it was persisted
    pub fn mark_clean(&mut self, network: u32) {
        if let Some(entry) = self.networks.get_mut(network) {
            entry.dirty = false;
        }
    }

    /// Whether a network is loaded
    pub fn contains(&self, network: u32) -> bool {
        self.networks.get(network).is_some()
    }

    /// Cache (accesses, misses)
    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache.accesses(), self.cache.misses())
    }

    /// Zero the cache counters
    pub fn clear_cache_stats(&mut self) {
        self.cache.clear_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapArena;
    use proptest::prelude::*;

    fn classifier() -> AddressClassifier {
        AddressClassifier::new(Box::new(HeapArena::default()))
    }

    fn class_c_table(classes: &[(usize, u8)]) -> Vec<u8> {
        let mut table = vec![0u8; 256];
        for &(host, class) in classes {
            table[host] = class;
        }
        table
    }

    #[test]
    fn test_unknown_and_class_a_default() {
        let mut c = classifier();
        assert_eq!(c.lookup(0x0A00_0001), DEFAULT_CLASS);
        assert_eq!(c.lookup(0xC0A8_0101), DEFAULT_CLASS);
        assert_eq!(c.lookup(0xF000_0001), DEFAULT_CLASS);
    }

    #[test]
    fn test_lookup_through_cache() {
        let mut c = classifier();
        c.load_network(0xC0A8_0100, &class_c_table(&[(10, 4), (11, 9)])).unwrap();

        assert_eq!(c.lookup(0xC0A8_010A), 4);
        assert_eq!(c.lookup(0xC0A8_010B), 9);
        assert_eq!(c.lookup(0xC0A8_010C), 0);
        // Second host of the granule came from the same line
        let (accesses, misses) = c.cache_stats();
        assert_eq!(accesses, 3);
        assert_eq!(misses, 2);
    }

    #[test]
    fn test_class_b_network() {
        let mut c = classifier();
        let mut table = vec![0u8; 65536];
        table[0x1234] = 17;
        c.load_network(0x8C10_0000, &table).unwrap();
        assert_eq!(c.lookup(0x8C10_1234), 17);
        assert_eq!(c.lookup(0x8C10_1235), 0);
    }

    #[test]
    fn test_reload_invalidates_cache() {
        let mut c = classifier();
        c.load_network(0xC0A8_0100, &class_c_table(&[(1, 2)])).unwrap();
        assert_eq!(c.lookup(0xC0A8_0101), 2);

        c.load_network(0xC0A8_0100, &class_c_table(&[(1, 5)])).unwrap();
        assert_eq!(c.lookup(0xC0A8_0101), 5);

        assert!(c.release_network(0xC0A8_0100));
        assert_eq!(c.lookup(0xC0A8_0101), DEFAULT_CLASS);
        assert!(!c.release_network(0xC0A8_0100));
    }

    #[test]
    fn test_dirty_tracking() {
        let mut c = classifier();
        c.load_network(0xC0A8_0100, &class_c_table(&[])).unwrap();
        assert!(c.dirty_networks().is_empty());

        let h = c.alloc_host_table(0xC0A8_0200).unwrap();
        c.install_network(0xC0A8_0200, h).unwrap();
        assert_eq!(c.dirty_networks(), vec![0xC0A8_0200]);
        c.mark_clean(0xC0A8_0200);
        assert!(c.dirty_networks().is_empty());
    }

    #[test]
    fn test_wrong_size_image() {
        let mut c = classifier();
        assert!(c.load_network(0xC0A8_0100, &[0u8; 100]).is_err());
        assert!(matches!(
            c.load_network(0x0A00_0000, &[0u8; 256]),
            Err(DrawbridgeError::UnsupportedAddress(_))
        ));
    }

    #[test]
    fn test_arena_exhaustion() {
        let mut c = AddressClassifier::new(Box::new(HeapArena::new(300)));
        c.alloc_host_table(0xC0A8_0100).unwrap();
        assert!(matches!(
            c.alloc_host_table(0xC0A8_0200),
            Err(DrawbridgeError::OutOfMemory)
        ));
    }

    proptest! {
        #[test]
        fn prop_lookup_is_stable(host in 0usize..256, class in any::<u8>(), repeats in 1usize..8) {
            let mut c = classifier();
            c.load_network(0xC0A8_0100, &class_c_table(&[(host, class)])).unwrap();
            let ip = 0xC0A8_0100 | host as u32;
            let first = c.lookup(ip);
            prop_assert_eq!(first, class);
            for _ in 0..repeats {
                prop_assert_eq!(c.lookup(ip), first);
            }
        }
    }
}
