//! Allocator façade.
//!
//! Every heap cell and every container buffer is accounted through an
//! [`Allocator`], so a host can cap memory (sandboxing) or substitute its own
//! pooled strategy without the object model changing. Rust's global allocator
//! still provides the bytes; the façade decides whether a request may proceed
//! and keeps the books.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::RuntimeError;

/// Growth grain for containers, in elements (arrays, list items, trie nodes)
/// or bytes (strings).
pub const GRAIN: usize = 32;

/// Round `n` up to the next multiple of [`GRAIN`].
#[inline]
pub fn round_to_grain(n: usize) -> usize {
    n.div_ceil(GRAIN).saturating_mul(GRAIN)
}

/// Largest buffer a container may ask for, in bytes.
pub const MAX_BUFFER: usize = isize::MAX as usize;

/// Bytes taken by `count` elements of `elem` bytes each. Sizes past
/// [`MAX_BUFFER`] fail with `OutOfMemory`.
pub fn buffer_size(count: usize, elem: usize) -> Result<usize, RuntimeError> {
    count
        .checked_mul(elem)
        .filter(|&bytes| bytes <= MAX_BUFFER)
        .ok_or_else(|| oversized(count.saturating_mul(elem)))
}

/// `OutOfMemory` for a buffer the platform cannot provide at all.
pub fn oversized(requested: usize) -> RuntimeError {
    RuntimeError::OutOfMemory {
        requested,
        in_use: 0,
        limit: MAX_BUFFER,
    }
}

/// Proof of an accounted allocation. Not `Clone`: a block is released once.
#[derive(Debug)]
pub struct Block {
    size: usize,
}

impl Block {
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Counters kept by an allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Number of successful `allocate` calls
    pub allocations: usize,
    /// Number of `release` calls
    pub releases: usize,
    /// Bytes currently accounted
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use`
    pub peak_bytes: usize,
}

/// The allocate/release pair everything above the façade goes through.
pub trait Allocator {
    /// Account a block of `size` bytes, or fail with `OutOfMemory`.
    fn allocate(&self, size: usize) -> Result<Block, RuntimeError>;

    /// Return a block. Never fails.
    fn release(&self, block: Block);

    fn stats(&self) -> MemoryStats;
}

/// Shared reference to the allocator of one runtime instance.
pub type MemoryRef = Rc<dyn Allocator>;

/// Default allocator: counts everything, optionally enforces a byte limit.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    limit: Option<usize>,
    stats: Cell<MemoryStats>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            stats: Cell::new(MemoryStats::default()),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Result<Block, RuntimeError> {
        let mut stats = self.stats.get();
        let in_use = stats.bytes_in_use.saturating_add(size);
        if let Some(limit) = self.limit {
            if in_use > limit {
                log::warn!(
                    "allocation of {} bytes refused ({} of {} in use)",
                    size,
                    stats.bytes_in_use,
                    limit
                );
                return Err(RuntimeError::OutOfMemory {
                    requested: size,
                    in_use: stats.bytes_in_use,
                    limit,
                });
            }
        }
        stats.allocations += 1;
        stats.bytes_in_use = in_use;
        stats.peak_bytes = stats.peak_bytes.max(in_use);
        self.stats.set(stats);
        Ok(Block { size })
    }

    fn release(&self, block: Block) {
        let mut stats = self.stats.get();
        stats.releases += 1;
        stats.bytes_in_use = stats.bytes_in_use.saturating_sub(block.size);
        self.stats.set(stats);
    }

    fn stats(&self) -> MemoryStats {
        self.stats.get()
    }
}

/// An accounted buffer reservation owned by a container.
///
/// Resizing allocates the new block before releasing the old one, the same
/// order a realloc would need, so a limit is checked against the peak.
pub struct Allocation {
    mem: MemoryRef,
    block: Option<Block>,
}

impl Allocation {
    /// An empty reservation (no block yet).
    pub fn new(mem: MemoryRef) -> Self {
        Self { mem, block: None }
    }

    pub fn reserve(mem: MemoryRef, size: usize) -> Result<Self, RuntimeError> {
        let mut alloc = Self::new(mem);
        alloc.resize(size)?;
        Ok(alloc)
    }

    /// Bytes currently reserved
    pub fn size(&self) -> usize {
        self.block.as_ref().map_or(0, Block::size)
    }

    pub fn memory(&self) -> &MemoryRef {
        &self.mem
    }

    /// Replace the reservation with one of `size` bytes.
    pub fn resize(&mut self, size: usize) -> Result<(), RuntimeError> {
        if size == self.size() {
            return Ok(());
        }
        if size == 0 {
            self.clear();
            return Ok(());
        }
        let block = self.mem.allocate(size)?;
        if let Some(old) = self.block.replace(block) {
            self.mem.release(old);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        if let Some(old) = self.block.take() {
            self.mem.release(old);
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("size", &self.size())
            .finish()
    }
}
