//! Reference-counted heap with a cycle-breaking mark-and-sweep pass.
//!
//! Every object lives in a [`GcBox`] owned through [`Gc`] pointers, so plain
//! reference counting frees acyclic garbage the moment the last handle goes
//! away. The heap keeps a weak slot per box, laid out in fixed chunks, which
//! lets [`Heap::collect`] find cycles that counting alone can never free.
//!
//! A collection pass:
//! 1. asks every live object to mark its children, counting the references
//!    found inside the heap (any failure aborts before anything changes);
//! 2. treats as roots the explicitly marked objects plus every object whose
//!    reference count exceeds its in-heap references (held from outside);
//! 3. propagates reachability through the recorded edges;
//! 4. resets every unreached object to [`Object::Collected`] and drops the
//!    taken contents once the heap is no longer borrowed, which releases the
//!    cycles through ordinary reference counting.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use crate::error::RuntimeError;
use crate::memory::{Allocation, MemoryRef};
use crate::value::{ClassId, Handle, Object};

// ============================================================================
// ChunkBitmask - 256-bit bitmask for marking objects within a chunk
// ============================================================================

/// 256-bit bitmask for marking objects within a chunk.
/// Each bit corresponds to an index in the chunk (0-255).
#[derive(Clone, Copy, Default)]
struct ChunkBitmask {
    /// 4 × u64 = 256 bits
    bits: [u64; 4],
}

impl ChunkBitmask {
    #[inline]
    fn set(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index >> 6) {
            *word |= 1 << (index & 63);
        }
    }

    #[inline]
    fn get(&self, index: usize) -> bool {
        self.bits
            .get(index >> 6)
            .is_some_and(|word| word & (1 << (index & 63)) != 0)
    }

    #[inline]
    fn clear(&mut self) {
        self.bits = [0; 4];
    }

    /// Iterate over unmarked indices (bits that are 0) up to `len`
    #[inline]
    fn iter_unmarked(&self, len: usize) -> UnmarkedIter<'_> {
        UnmarkedIter {
            bitmask: self,
            len,
            current_word: 0,
            current_bits: !self.bits.first().copied().unwrap_or(u64::MAX),
            base_index: 0,
        }
    }
}

/// Iterator over unmarked (zero) bits in a ChunkBitmask
struct UnmarkedIter<'a> {
    bitmask: &'a ChunkBitmask,
    len: usize,
    current_word: usize,
    current_bits: u64, // Inverted bits (1 = unmarked)
    base_index: usize,
}

impl Iterator for UnmarkedIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current_bits != 0 {
                let bit_pos = self.current_bits.trailing_zeros() as usize;
                let index = self.base_index + bit_pos;
                self.current_bits &= self.current_bits - 1;
                if index < self.len {
                    return Some(index);
                }
            }

            self.current_word += 1;
            self.base_index = self.current_word << 6;
            if self.base_index >= self.len {
                return None;
            }
            self.current_bits = !*self.bitmask.bits.get(self.current_word)?;
        }
    }
}

// ============================================================================
// GcBox / Gc
// ============================================================================

/// Bookkeeping shared between the heap and its boxes. Boxes only hold a weak
/// pointer so they can outlive the heap.
#[derive(Default)]
struct HeapCounters {
    live: Cell<usize>,
    free: RefCell<Vec<usize>>,
}

/// Internal storage for one heap object.
pub struct GcBox {
    /// Slot index (chunk_idx * CHUNK_CAPACITY + index_in_chunk)
    index: usize,
    class: ClassId,
    data: RefCell<Object>,
    counters: Weak<HeapCounters>,
    _alloc: Allocation,
}

impl Drop for GcBox {
    fn drop(&mut self) {
        if let Some(counters) = self.counters.upgrade() {
            counters.live.set(counters.live.get().saturating_sub(1));
            if let Ok(mut free) = counters.free.try_borrow_mut() {
                free.push(self.index);
            }
        }
    }
}

/// Owning pointer to a heap object.
///
/// Works like `Rc<T>`: cloning adds a reference, dropping releases one, and
/// the object is destroyed with its last reference.
#[derive(Clone)]
pub struct Gc(Rc<GcBox>);

impl Gc {
    /// Slot index, unique among live objects of one heap.
    pub fn id(&self) -> usize {
        self.0.index
    }

    pub fn class_id(&self) -> ClassId {
        self.0.class
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn ptr_eq(a: &Gc, b: &Gc) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the box, stable for the object's lifetime.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, Object>, RuntimeError> {
        self.0.data.try_borrow().map_err(|_| RuntimeError::Borrowed)
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, Object>, RuntimeError> {
        self.0.data.try_borrow_mut().map_err(|_| RuntimeError::Borrowed)
    }

    /// True once the collector has released this object's contents.
    pub fn is_collected(&self) -> bool {
        self.0
            .data
            .try_borrow()
            .is_ok_and(|obj| matches!(*obj, Object::Collected))
    }
}

impl std::fmt::Debug for Gc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gc")
            .field("id", &self.0.index)
            .field("class", &self.0.class)
            .field("refs", &self.ref_count())
            .finish()
    }
}

// ============================================================================
// Marker - handed to every mark routine
// ============================================================================

/// Collects the children an object reports during the mark phase.
///
/// Native types receive a `Marker` in [`NativeObject::mark`] and call
/// [`Marker::mark`] for every handle they own.
///
/// [`NativeObject::mark`]: crate::native::NativeObject::mark
#[derive(Default)]
pub struct Marker {
    found: Vec<(usize, usize)>,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an owned handle. Scalars and weak handles are ignored.
    pub fn mark(&mut self, handle: &Handle) {
        if let Handle::Object(gc) = handle {
            self.mark_gc(gc);
        }
    }

    pub fn mark_gc(&mut self, gc: &Gc) {
        self.found.push((gc.id(), gc.addr()));
    }

    pub fn mark_all<'a>(&mut self, handles: impl IntoIterator<Item = &'a Handle>) {
        for handle in handles {
            self.mark(handle);
        }
    }

    /// Number of children reported so far.
    pub fn len(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    fn take(&mut self) -> Vec<(usize, usize)> {
        std::mem::take(&mut self.found)
    }
}

// ============================================================================
// Space - the internal slot arena
// ============================================================================

/// Chunk capacity: objects per chunk, matching the ChunkBitmask size
const CHUNK_CAPACITY: usize = 256;

struct Space {
    /// Weak slot per object. Inner vecs never exceed CHUNK_CAPACITY.
    chunks: Vec<Vec<Weak<GcBox>>>,

    /// Per-chunk mark bits, reused between passes.
    marked_chunks: Vec<ChunkBitmask>,

    /// Persistent mark stack, reused between passes.
    mark_stack: Vec<usize>,

    counters: Rc<HeapCounters>,
    mem: MemoryRef,
}

impl Space {
    fn new(mem: MemoryRef) -> Self {
        Self {
            chunks: Vec::new(),
            marked_chunks: Vec::new(),
            mark_stack: Vec::new(),
            counters: Rc::new(HeapCounters::default()),
            mem,
        }
    }

    fn total_slots(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Weak<GcBox>> {
        self.chunks
            .get_mut(index / CHUNK_CAPACITY)?
            .get_mut(index % CHUNK_CAPACITY)
    }

    fn alloc(&mut self, object: Object) -> Result<Gc, RuntimeError> {
        let alloc = Allocation::reserve(self.mem.clone(), std::mem::size_of::<GcBox>())?;
        let class = object.class_id();

        let reused = self
            .counters
            .free
            .try_borrow_mut()
            .map_err(|_| RuntimeError::Borrowed)?
            .pop();
        let index = match reused {
            Some(index) => index,
            None => {
                let need_new_chunk = self
                    .chunks
                    .last()
                    .is_none_or(|chunk| chunk.len() >= CHUNK_CAPACITY);
                if need_new_chunk {
                    self.chunks.push(Vec::with_capacity(CHUNK_CAPACITY));
                    self.marked_chunks.push(ChunkBitmask::default());
                }
                let chunk_idx = self.chunks.len().saturating_sub(1);
                let chunk = self
                    .chunks
                    .last_mut()
                    .ok_or(RuntimeError::Borrowed)?;
                chunk.push(Weak::new());
                chunk_idx * CHUNK_CAPACITY + chunk.len() - 1
            }
        };

        let gc_box = Rc::new(GcBox {
            index,
            class,
            data: RefCell::new(object),
            counters: Rc::downgrade(&self.counters),
            _alloc: alloc,
        });
        if let Some(slot) = self.slot_mut(index) {
            *slot = Rc::downgrade(&gc_box);
        }
        self.counters.live.set(self.counters.live.get() + 1);
        Ok(Gc(gc_box))
    }

    /// Strong references to every live box, indexed by slot.
    fn snapshot(&self) -> Vec<Option<Rc<GcBox>>> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.iter().map(Weak::upgrade))
            .collect()
    }

    fn mark_bit(&mut self, index: usize) -> bool {
        let Some(bitmask) = self.marked_chunks.get_mut(index / CHUNK_CAPACITY) else {
            return true;
        };
        let offset = index % CHUNK_CAPACITY;
        if bitmask.get(offset) {
            return true;
        }
        bitmask.set(offset);
        false
    }

    fn stats(&self) -> GcStats {
        let total_slots = self.total_slots();
        let free_slots = self.counters.free.try_borrow().map_or(0, |f| f.len());
        GcStats {
            total_slots,
            free_slots,
            live_objects: self.counters.live.get(),
        }
    }
}

/// Resolve a reported child against the snapshot. Boxes of another heap (or
/// stale slot numbers) never match.
fn resolve(snapshot: &[Option<Rc<GcBox>>], (index, addr): (usize, usize)) -> Option<usize> {
    let gc_box = snapshot.get(index)?.as_ref()?;
    (Rc::as_ptr(gc_box) as usize == addr).then_some(index)
}

// ============================================================================
// Heap - the public wrapper
// ============================================================================

/// Heap of one runtime instance.
pub struct Heap {
    inner: Rc<RefCell<Space>>,
}

impl Heap {
    pub fn new(mem: MemoryRef) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Space::new(mem))),
        }
    }

    /// Allocate a heap cell holding `object`, returning its first reference.
    pub fn alloc(&self, object: Object) -> Result<Gc, RuntimeError> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| RuntimeError::Locked)?
            .alloc(object)
    }

    pub fn stats(&self) -> GcStats {
        self.inner
            .try_borrow()
            .map(|space| space.stats())
            .unwrap_or_default()
    }

    /// Run one mark-and-sweep pass.
    ///
    /// `mark_roots` reports the explicit roots. Objects referenced from
    /// outside the heap are roots regardless.
    pub fn collect(
        &self,
        mark_roots: impl FnOnce(&mut Marker) -> Result<(), RuntimeError>,
    ) -> Result<GcReport, RuntimeError> {
        let mut space = self.inner.try_borrow_mut().map_err(|_| RuntimeError::Locked)?;
        let snapshot = space.snapshot();
        let mut marker = Marker::new();

        // Phase one: record edges and count in-heap references.
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); snapshot.len()];
        let mut internal = vec![0usize; snapshot.len()];
        for (index, gc_box) in snapshot.iter().enumerate() {
            let Some(gc_box) = gc_box else { continue };
            let data = gc_box.data.try_borrow().map_err(|_| RuntimeError::Locked)?;
            data.trace(&mut marker).map_err(|err| {
                log::warn!("{} failed to mark its children: {}", gc_box.class, err);
                RuntimeError::MarkFailed {
                    type_name: gc_box.class.to_string(),
                    code: err.code(),
                }
            })?;
            let children: Vec<usize> = marker
                .take()
                .into_iter()
                .filter_map(|child| resolve(&snapshot, child))
                .collect();
            for &child in &children {
                if let Some(count) = internal.get_mut(child) {
                    *count += 1;
                }
            }
            if let Some(slot) = edges.get_mut(index) {
                *slot = children;
            }
        }

        mark_roots(&mut marker)?;
        let mut stack = std::mem::take(&mut space.mark_stack);
        stack.clear();
        stack.extend(
            marker
                .take()
                .into_iter()
                .filter_map(|child| resolve(&snapshot, child)),
        );
        for (index, gc_box) in snapshot.iter().enumerate() {
            let Some(gc_box) = gc_box else { continue };
            // The snapshot itself holds one reference.
            let outside = Rc::strong_count(gc_box).saturating_sub(1);
            if outside > internal.get(index).copied().unwrap_or(0) {
                stack.push(index);
            }
        }

        // Phase two: propagate.
        for bitmask in &mut space.marked_chunks {
            bitmask.clear();
        }
        let mut distinct = stack.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let roots = distinct.len();
        while let Some(index) = stack.pop() {
            if space.mark_bit(index) {
                continue;
            }
            if let Some(children) = edges.get(index) {
                stack.extend(children.iter().copied());
            }
        }
        space.mark_stack = stack;

        // Phase three: sweep.
        let mut released = Vec::new();
        let mut scanned = 0;
        for (chunk_idx, (chunk, bitmask)) in
            space.chunks.iter().zip(space.marked_chunks.iter()).enumerate()
        {
            scanned += chunk.len();
            for offset in bitmask.iter_unmarked(chunk.len()) {
                let index = chunk_idx * CHUNK_CAPACITY + offset;
                let Some(Some(gc_box)) = snapshot.get(index) else {
                    continue;
                };
                let mut data = gc_box.data.try_borrow_mut().map_err(|_| RuntimeError::Locked)?;
                if !matches!(*data, Object::Collected) {
                    released.push(std::mem::replace(&mut *data, Object::Collected));
                }
            }
        }
        drop(space);

        let report = GcReport {
            scanned,
            collected: released.len(),
            roots,
        };
        // Dropping the contents releases every handle the cycles held.
        drop(released);
        drop(snapshot);
        log::debug!(
            "collected {} of {} slots ({} roots)",
            report.collected,
            report.scanned,
            report.roots
        );
        Ok(report)
    }
}

/// Heap statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Total number of slots ever created
    pub total_slots: usize,
    /// Slots available for reuse
    pub free_slots: usize,
    /// Number of live objects
    pub live_objects: usize,
}

/// Result of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Slots examined by the sweep
    pub scanned: usize,
    /// Objects whose contents were released
    pub collected: usize,
    /// Distinct root objects found
    pub roots: usize,
}
