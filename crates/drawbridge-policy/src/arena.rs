//! Host-table arena
//!
//! Large per-network host tables live outside the filter's own structures,
//! behind opaque handles. The arena only knows about byte blocks; what the
//! bytes mean is up to the network table.

use thiserror::Error;

/// Opaque reference to a block held by an [`Arena`].
///
/// Not `Clone`: a block has exactly one owner, which must hand
/// the handle back through [`Arena::free`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ArenaHandle(u32);

impl ArenaHandle {
    /// Slot number, for logs
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Arena errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    /// Not enough free bytes
    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },
    /// Handle does not name a live block
    #[error("stale arena handle {0}")]
    InvalidHandle(u32),
    /// Copy past the end of a block
    #[error("arena access out of bounds: offset {offset} + {len} > {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

/// Block allocator with bulk copy in and out
pub trait Arena: Send {
    /// Reserve a zeroed block of `size` bytes
    fn alloc(&mut self, size: usize) -> Result<ArenaHandle, ArenaError>;

    /// Return a block to the arena
    fn free(&mut self, handle: ArenaHandle);

    /// Size of a live block
    fn block_len(&self, handle: &ArenaHandle) -> Result<usize, ArenaError>;

    /// Copy `src` into a block at `offset`
    fn copy_in(&mut self, dst: &ArenaHandle, offset: usize, src: &[u8]) -> Result<(), ArenaError>;

    /// Copy out of a block at `offset`, filling `dst`
    fn copy_out(&self, src: &ArenaHandle, offset: usize, dst: &mut [u8]) -> Result<(), ArenaError>;

    /// Bytes currently reserved
    fn in_use(&self) -> usize;
}

/// Heap-backed arena with a fixed byte budget
pub struct HeapArena {
    blocks: Vec<Option<Box<[u8]>>>,
    free_slots: Vec<u32>,
    in_use: usize,
    capacity: usize,
}

impl HeapArena {
    /// Create arena that will hand out at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            free_slots: Vec::new(),
            in_use: 0,
            capacity,
        }
    }

    /// Total byte budget
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn block(&self, handle: &ArenaHandle) -> Result<&[u8], ArenaError> {
        self.blocks
            .get(handle.0 as usize)
            .and_then(|b| b.as_deref())
            .ok_or(ArenaError::InvalidHandle(handle.0))
    }

    fn block_mut(&mut self, handle: &ArenaHandle) -> Result<&mut [u8], ArenaError> {
        self.blocks
            .get_mut(handle.0 as usize)
            .and_then(|b| b.as_deref_mut())
            .ok_or(ArenaError::InvalidHandle(handle.0))
    }
}

impl Default for HeapArena {
    fn default() -> Self {
        // Room for 64 class B networks
        Self::new(64 * 65536)
    }
}

fn check_bounds(offset: usize, len: usize, size: usize) -> Result<(), ArenaError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ArenaError::OutOfBounds { offset, len, size }),
    }
}

impl Arena for HeapArena {
    fn alloc(&mut self, size: usize) -> Result<ArenaHandle, ArenaError> {
        let available = self.capacity - self.in_use;
        if size > available {
            return Err(ArenaError::Exhausted {
                requested: size,
                available,
            });
        }

        let block = vec![0u8; size].into_boxed_slice();
        self.in_use += size;

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.blocks[slot as usize] = Some(block);
                slot
            }
            None => {
                self.blocks.push(Some(block));
                (self.blocks.len() - 1) as u32
            }
        };
        Ok(ArenaHandle(slot))
    }

    fn free(&mut self, handle: ArenaHandle) {
        if let Some(slot) = self.blocks.get_mut(handle.0 as usize) {
            if let Some(block) = slot.take() {
                self.in_use -= block.len();
                self.free_slots.push(handle.0);
            }
        }
    }

    fn block_len(&self, handle: &ArenaHandle) -> Result<usize, ArenaError> {
        self.block(handle).map(<[u8]>::len)
    }

    fn copy_in(&mut self, dst: &ArenaHandle, offset: usize, src: &[u8]) -> Result<(), ArenaError> {
        let block = self.block_mut(dst)?;
        check_bounds(offset, src.len(), block.len())?;
        block[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_out(&self, src: &ArenaHandle, offset: usize, dst: &mut [u8]) -> Result<(), ArenaError> {
        let block = self.block(src)?;
        check_bounds(offset, dst.len(), block.len())?;
        dst.copy_from_slice(&block[offset..offset + dst.len()]);
        Ok(())
    }

    fn in_use(&self) -> usize {
        self.in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_copy_free() {
        let mut arena = HeapArena::new(1024);
        let h = arena.alloc(256).unwrap();
        assert_eq!(arena.in_use(), 256);
        assert_eq!(arena.block_len(&h).unwrap(), 256);

        arena.copy_in(&h, 10, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 4];
        arena.copy_out(&h, 9, &mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3]);

        arena.free(h);
        assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let mut arena = HeapArena::new(300);
        let _a = arena.alloc(256).unwrap();
        let err = arena.alloc(256).unwrap_err();
        assert_eq!(
            err,
            ArenaError::Exhausted {
                requested: 256,
                available: 44
            }
        );
    }

    #[test]
    fn test_slot_reuse_and_stale_handle() {
        let mut arena = HeapArena::new(1024);
        let a = arena.alloc(16).unwrap();
        let id = a.id();
        arena.free(a);

        let b = arena.alloc(32).unwrap();
        assert_eq!(b.id(), id);

        let stale = ArenaHandle(99);
        assert_eq!(arena.block_len(&stale), Err(ArenaError::InvalidHandle(99)));
    }

    #[test]
    fn test_bounds() {
        let mut arena = HeapArena::new(1024);
        let h = arena.alloc(8).unwrap();
        assert!(matches!(
            arena.copy_in(&h, 6, &[0; 4]),
            Err(ArenaError::OutOfBounds { .. })
        ));
    }
}
