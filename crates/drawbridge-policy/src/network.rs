//! Network Table
//!
//! Open-addressed table of loaded networks, keyed by network address.
//!
//! # Design
//!
//! - Power-of-two slot array, FNV-1a home slot
//! - Linear probing with wraparound; an empty slot ends every probe
//! - Removal re-seats the rest of the cluster instead of leaving tombstones

use crate::arena::ArenaHandle;
use thiserror::Error;

/// Default number of slots
pub const DEFAULT_NETWORK_SLOTS: usize = 1024;

/// A loaded network and its host table
#[derive(Debug)]
pub struct NetworkEntry {
    /// Network address with host bits cleared
    pub network: u32,
    /// Host table, one policy-class byte per host
    pub host_table: ArenaHandle,
    /// Changed since last persisted
    pub dirty: bool,
}

/// Network table errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// No free slot left
    #[error("network table full ({0} slots)")]
    Full(usize),
}

/// Open-addressed network table
pub struct NetworkTable {
    slots: Vec<Option<NetworkEntry>>,
    mask: usize,
    count: usize,
}

impl NetworkTable {
    /// Create table with at least `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let size = capacity.max(2).next_power_of_two();
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self {
            slots,
            mask: size - 1,
            count: 0,
        }
    }

    /// Home slot for a network address (FNV-1a over the address bytes)
    #[inline(always)]
    fn home(&self, network: u32) -> usize {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut h = FNV_OFFSET;
        for byte in network.to_be_bytes() {
            h ^= byte as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        (h as usize) & self.mask
    }

    fn position(&self, network: u32) -> Option<usize> {
        let mut idx = self.home(network);
        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                None => return None,
                Some(entry) if entry.network == network => return Some(idx),
                Some(_) => idx = (idx + 1) & self.mask,
            }
        }
        None
    }

    /// Find a network
    #[inline]
    pub fn get(&self, network: u32) -> Option<&NetworkEntry> {
        self.position(network).and_then(|idx| self.slots[idx].as_ref())
    }

    /// Find a network for update
    pub fn get_mut(&mut self, network: u32) -> Option<&mut NetworkEntry> {
        let idx = self.position(network)?;
        self.slots[idx].as_mut()
    }

    /// Insert a network, or swap in a new host table for an existing one.
    ///
    /// Returns the replaced host table, which the caller must free.
    pub fn insert(&mut self, network: u32, host_table: ArenaHandle) -> Result<Option<ArenaHandle>, TableError> {
        if let Some(entry) = self.get_mut(network) {
            entry.dirty = true;
            return Ok(Some(std::mem::replace(&mut entry.host_table, host_table)));
        }

        // Keep one slot empty so probes always terminate
        if self.count + 1 >= self.slots.len() {
            return Err(TableError::Full(self.slots.len()));
        }

        let mut idx = self.home(network);
        while self.slots[idx].is_some() {
            idx = (idx + 1) & self.mask;
        }
        self.slots[idx] = Some(NetworkEntry {
            network,
            host_table,
            dirty: true,
        });
        self.count += 1;
        Ok(None)
    }

    /// Whether `network` is present or there is room to add it
    pub fn can_insert(&self, network: u32) -> bool {
        self.count + 1 < self.slots.len() || self.position(network).is_some()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Remove a network, returning its entry
    pub fn remove(&mut self, network: u32) -> Option<NetworkEntry> {
        let mut hole = self.position(network)?;
        let removed = self.slots[hole].take();
        self.count -= 1;

        // Walk the rest of the cluster and pull back any entry whose probe
        // sequence passes through the hole.
        let mut idx = hole;
        loop {
            idx = (idx + 1) & self.mask;
            let home = match &self.slots[idx] {
                None => break,
                Some(entry) => self.home(entry.network),
            };

            let reachable_without_hole = if hole <= idx {
                hole < home && home <= idx
            } else {
                hole < home || home <= idx
            };
            if !reachable_without_hole {
                self.slots[hole] = self.slots[idx].take();
                hole = idx;
            }
        }

        removed
    }

    /// Loaded networks in slot order
    pub fn iter(&self) -> impl Iterator<Item = &NetworkEntry> {
        self.slots.iter().flatten()
    }

    /// Number of loaded networks
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for NetworkTable {
    fn default() -> Self {
        Self::new(DEFAULT_NETWORK_SLOTS)
    }
}
