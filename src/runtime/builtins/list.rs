//! Associative list and its iterator.
//!
//! Items live in a slot arena and are chained through `prev`/`next` slot
//! numbers. Besides the list itself, iterators hold references to items:
//! an item removed while referenced moves to [`ItemState::PendingRelease`],
//! keeps its key and value for the cursors parked on it, stays physically
//! chained so they can still step off it, and is freed when its last
//! iterator reference goes away.
//!
//! Handles the list gives up are not dropped while the list is borrowed:
//! they collect in `released` and [`Handle::with_list_mut`] drops them once
//! the borrow has ended. An iterator dropped while its list is borrowed
//! queues its item reference instead of releasing it in place.

use std::cell::Cell;
use std::mem::size_of;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::gc::Marker;
use crate::memory::{Allocation, MemoryRef, buffer_size, round_to_grain};
use crate::prelude::FxHashSet;
use crate::native::{CallContext, NativeType};
use crate::runtime::Runtime;
use crate::value::{ClassId, Handle};

use super::array::insertion_sort;
use super::{member_index, this_or_invalid};

/// Sort key and direction for [`List::sort`]. Ties on the primary field
/// are broken by the other field in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    KeyAscending,
    KeyDescending,
    ValueAscending,
    ValueDescending,
}

impl SortOrder {
    pub fn from_code(code: i64) -> Option<SortOrder> {
        match code {
            0 => Some(SortOrder::KeyAscending),
            1 => Some(SortOrder::KeyDescending),
            2 => Some(SortOrder::ValueAscending),
            3 => Some(SortOrder::ValueDescending),
            _ => None,
        }
    }

    /// Three-way comparison of two entries: `compare` on the primary field,
    /// then on the other one, negated for the descending orders.
    pub(crate) fn compare<E>(
        self,
        a: &SortEntry,
        b: &SortEntry,
        mut compare: impl FnMut(&Handle, &Handle) -> Result<i32, E>,
    ) -> Result<i32, E> {
        let by_key = matches!(self, SortOrder::KeyAscending | SortOrder::KeyDescending);
        let (first, second) = if by_key {
            ((&a.key, &b.key), (&a.value, &b.value))
        } else {
            ((&a.value, &b.value), (&a.key, &b.key))
        };
        let mut result = compare(first.0, first.1)?;
        if result == 0 {
            result = compare(second.0, second.1)?;
        }
        Ok(match self {
            SortOrder::KeyDescending | SortOrder::ValueDescending => result.saturating_neg(),
            _ => result,
        })
    }
}

/// A linked item taken out for sorting.
pub(crate) struct SortEntry {
    pub(crate) id: usize,
    pub(crate) key: Handle,
    pub(crate) value: Handle,
}

/// Item references given back by iterators that could not borrow the list.
type ReleaseQueue = Rc<Cell<Vec<usize>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Linked,
    /// Removed from the list but still referenced by iterators.
    PendingRelease,
}

struct Item {
    key: Handle,
    value: Handle,
    prev: Option<usize>,
    next: Option<usize>,
    /// Iterator references
    refs: usize,
    state: ItemState,
}

pub struct List {
    slots: Vec<Option<Item>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Linked items only
    len: usize,
    /// Handles given up during the current borrow
    released: Vec<Handle>,
    deferred: ReleaseQueue,
    alloc: Allocation,
}

impl List {
    pub fn new(mem: MemoryRef) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            released: Vec::new(),
            deferred: ReleaseQueue::default(),
            alloc: Allocation::new(mem),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ------------------------------------------------------------------
    // Slot arena
    // ------------------------------------------------------------------

    fn item(&self, id: usize) -> Option<&Item> {
        self.slots.get(id)?.as_ref()
    }

    fn item_mut(&mut self, id: usize) -> Option<&mut Item> {
        self.slots.get_mut(id)?.as_mut()
    }

    fn alloc_item(&mut self, key: Handle, value: Handle) -> Result<usize, RuntimeError> {
        let item = Item {
            key,
            value,
            prev: None,
            next: None,
            refs: 0,
            state: ItemState::Linked,
        };
        if let Some(id) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = Some(item);
                return Ok(id);
            }
        }
        let needed = self.slots.len().saturating_add(1);
        if buffer_size(needed, size_of::<Option<Item>>())? > self.alloc.size() {
            let capacity = round_to_grain(needed);
            log::trace!("list grows to {} items", capacity);
            self.alloc
                .resize(buffer_size(capacity, size_of::<Option<Item>>())?)?;
        }
        self.slots.push(Some(item));
        Ok(self.slots.len() - 1)
    }

    fn free_item(&mut self, id: usize) {
        let Some(item) = self.slots.get_mut(id).and_then(Option::take) else {
            return;
        };
        self.free.push(id);
        self.released.push(item.key);
        self.released.push(item.value);
    }

    /// Apply queued iterator releases and hand over the handles given up
    /// since the last call. The caller drops them after the borrow ends.
    pub(crate) fn settle(&mut self) -> Vec<Handle> {
        for id in self.deferred.take() {
            self.release(id);
        }
        std::mem::take(&mut self.released)
    }

    // ------------------------------------------------------------------
    // Physical chain
    // ------------------------------------------------------------------

    fn unlink(&mut self, id: usize) {
        let Some((prev, next)) = self.item(id).map(|item| (item.prev, item.next)) else {
            return;
        };
        match prev.and_then(|p| self.item_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.item_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
        if let Some(item) = self.item_mut(id) {
            item.prev = None;
            item.next = None;
        }
    }

    fn link_between(&mut self, id: usize, prev: Option<usize>, next: Option<usize>) {
        if let Some(item) = self.item_mut(id) {
            item.prev = prev;
            item.next = next;
        }
        match prev.and_then(|p| self.item_mut(p)) {
            Some(p) => p.next = Some(id),
            None => self.head = Some(id),
        }
        match next.and_then(|n| self.item_mut(n)) {
            Some(n) => n.prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    fn physical_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            order.push(id);
            cursor = self.item(id).and_then(|item| item.next);
        }
        order
    }

    fn relink(&mut self, order: &[usize]) {
        self.head = order.first().copied();
        self.tail = order.last().copied();
        for (pos, &id) in order.iter().enumerate() {
            let prev = pos.checked_sub(1).and_then(|p| order.get(p)).copied();
            let next = order.get(pos + 1).copied();
            if let Some(item) = self.item_mut(id) {
                item.prev = prev;
                item.next = next;
            }
        }
    }

    fn linked_ids(&self) -> Vec<usize> {
        self.physical_order()
            .into_iter()
            .filter(|&id| self.is_linked(id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Item-level access (used by iterators)
    // ------------------------------------------------------------------

    pub(crate) fn is_linked(&self, id: usize) -> bool {
        self.item(id)
            .is_some_and(|item| item.state == ItemState::Linked)
    }

    /// Linked, or removed but still held by an iterator.
    pub(crate) fn is_present(&self, id: usize) -> bool {
        self.item(id).is_some()
    }

    pub(crate) fn first_id(&self) -> Option<usize> {
        let head = self.head?;
        if self.is_linked(head) {
            Some(head)
        } else {
            self.next_id(head)
        }
    }

    pub(crate) fn last_id(&self) -> Option<usize> {
        let tail = self.tail?;
        if self.is_linked(tail) {
            Some(tail)
        } else {
            self.prev_id(tail)
        }
    }

    /// Next linked item after `id`, stepping over pending ones.
    pub(crate) fn next_id(&self, id: usize) -> Option<usize> {
        let mut cursor = self.item(id)?.next;
        while let Some(candidate) = cursor {
            if self.is_linked(candidate) {
                return Some(candidate);
            }
            cursor = self.item(candidate)?.next;
        }
        None
    }

    pub(crate) fn prev_id(&self, id: usize) -> Option<usize> {
        let mut cursor = self.item(id)?.prev;
        while let Some(candidate) = cursor {
            if self.is_linked(candidate) {
                return Some(candidate);
            }
            cursor = self.item(candidate)?.prev;
        }
        None
    }

    /// Key of a linked or pending item.
    pub(crate) fn key_of(&self, id: usize) -> Handle {
        self.item(id)
            .map(|item| item.key.clone())
            .unwrap_or_default()
    }

    pub(crate) fn value_of(&self, id: usize) -> Handle {
        self.item(id)
            .map(|item| item.value.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_value_of(&mut self, id: usize, value: Handle) -> bool {
        let old = match self.item_mut(id) {
            Some(item) if item.state == ItemState::Linked => {
                std::mem::replace(&mut item.value, value)
            }
            _ => return false,
        };
        self.released.push(old);
        true
    }

    pub(crate) fn release_queue(&self) -> ReleaseQueue {
        Rc::clone(&self.deferred)
    }

    pub(crate) fn retain(&mut self, id: usize) {
        if let Some(item) = self.item_mut(id) {
            item.refs += 1;
        }
    }

    /// Drop one iterator reference. A pending item is freed with its last
    /// reference.
    pub(crate) fn release(&mut self, id: usize) {
        let Some(item) = self.item_mut(id) else {
            return;
        };
        item.refs = item.refs.saturating_sub(1);
        if item.refs == 0 && item.state == ItemState::PendingRelease {
            self.unlink(id);
            self.free_item(id);
        }
    }

    /// Take an item out of the list. Referenced items turn pending and keep
    /// their key and value until the last reference is released.
    pub(crate) fn remove_item(&mut self, id: usize) -> bool {
        let Some(item) = self.item_mut(id) else {
            return false;
        };
        if item.state != ItemState::Linked {
            return false;
        }
        if item.refs > 0 {
            item.state = ItemState::PendingRelease;
        } else {
            self.unlink(id);
            self.free_item(id);
        }
        self.len -= 1;
        true
    }

    pub(crate) fn insert_item_before(
        &mut self,
        anchor: Option<usize>,
        key: Handle,
        value: Handle,
    ) -> Result<usize, RuntimeError> {
        let prev = match anchor {
            Some(anchor) => self.item(anchor).and_then(|item| item.prev),
            None => self.tail,
        };
        let id = self.alloc_item(key, value)?;
        self.link_between(id, prev, anchor);
        self.len += 1;
        Ok(id)
    }

    pub(crate) fn insert_item_after(
        &mut self,
        anchor: Option<usize>,
        key: Handle,
        value: Handle,
    ) -> Result<usize, RuntimeError> {
        let next = match anchor {
            Some(anchor) => self.item(anchor).and_then(|item| item.next),
            None => self.head,
        };
        let id = self.alloc_item(key, value)?;
        self.link_between(id, anchor, next);
        self.len += 1;
        Ok(id)
    }

    fn find(&self, key: &Handle) -> Option<usize> {
        self.linked_ids().into_iter().find(|&id| {
            self.item(id)
                .is_some_and(|item| item.key.key_equals(key))
        })
    }

    // ------------------------------------------------------------------
    // Key-level operations
    // ------------------------------------------------------------------

    /// Append a new item, even if `key` is already present.
    pub fn add(&mut self, key: Handle, value: Handle) -> Result<(), RuntimeError> {
        self.insert_item_before(None, key, value).map(|_| ())
    }

    /// Replace the value of the first item with `key`, or append one.
    pub fn add_or_set(&mut self, key: Handle, value: Handle) -> Result<(), RuntimeError> {
        match self.find(&key) {
            Some(id) => {
                self.set_value_of(id, value);
                Ok(())
            }
            None => self.add(key, value),
        }
    }

    /// Value stored under `key`, null when absent.
    pub fn get(&self, key: &Handle) -> Handle {
        self.find(key)
            .map(|id| self.value_of(id))
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &Handle) -> bool {
        self.find(key).is_some()
    }

    /// Insert before the item with `anchor`. Returns false when the anchor
    /// is missing.
    pub fn insert_before(
        &mut self,
        anchor: &Handle,
        key: Handle,
        value: Handle,
    ) -> Result<bool, RuntimeError> {
        let Some(anchor) = self.find(anchor) else {
            return Ok(false);
        };
        self.insert_item_before(Some(anchor), key, value)?;
        Ok(true)
    }

    pub fn insert_after(
        &mut self,
        anchor: &Handle,
        key: Handle,
        value: Handle,
    ) -> Result<bool, RuntimeError> {
        let Some(anchor) = self.find(anchor) else {
            return Ok(false);
        };
        self.insert_item_after(Some(anchor), key, value)?;
        Ok(true)
    }

    pub fn remove(&mut self, key: &Handle) -> bool {
        match self.find(key) {
            Some(id) => self.remove_item(id),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for id in self.linked_ids() {
            self.remove_item(id);
        }
    }

    /// Exchange the positions of two items.
    pub fn swap(&mut self, a: &Handle, b: &Handle) -> bool {
        let (Some(a), Some(b)) = (self.find(a), self.find(b)) else {
            return false;
        };
        let mut order = self.physical_order();
        let (Some(pa), Some(pb)) = (
            order.iter().position(|&id| id == a),
            order.iter().position(|&id| id == b),
        ) else {
            return false;
        };
        order.swap(pa, pb);
        self.relink(&order);
        true
    }

    pub fn move_to_first(&mut self, key: &Handle) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        self.unlink(id);
        let head = self.head;
        self.link_between(id, None, head);
        true
    }

    pub fn move_to_last(&mut self, key: &Handle) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        self.unlink(id);
        let tail = self.tail;
        self.link_between(id, tail, None);
        true
    }

    /// Stable insertion sort with the default ordering. See
    /// [`Runtime::list_sort`] for a caller-supplied comparator.
    pub fn sort(&mut self, order: SortOrder) {
        let mut entries = self.sort_entries();
        let sorted = insertion_sort(&mut entries, |a, b| {
            order.compare(a, b, |x, y| Ok::<_, RuntimeError>(x.default_compare(y)))
        });
        if sorted.is_ok() {
            let ids: Vec<usize> = entries.iter().map(|entry| entry.id).collect();
            self.apply_order(&ids);
        }
    }

    pub(crate) fn sort_entries(&self) -> Vec<SortEntry> {
        self.linked_ids()
            .into_iter()
            .map(|id| SortEntry {
                id,
                key: self.key_of(id),
                value: self.value_of(id),
            })
            .collect()
    }

    /// Relink the linked items in `order`. Items no longer linked are
    /// skipped, linked items missing from `order` follow in their current
    /// order, and pending items go last so cursors on them stay chained.
    pub(crate) fn apply_order(&mut self, order: &[usize]) {
        let mut next: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&id| self.is_linked(id))
            .collect();
        let placed: FxHashSet<usize> = next.iter().copied().collect();
        let (linked, pending): (Vec<usize>, Vec<usize>) = self
            .physical_order()
            .into_iter()
            .partition(|&id| self.is_linked(id));
        next.extend(linked.into_iter().filter(|id| !placed.contains(id)));
        next.extend(pending);
        self.relink(&next);
    }

    /// Visit every linked item in order. The first error stops the walk.
    pub fn enumerate(
        &self,
        mut f: impl FnMut(&Handle, &Handle) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        for id in self.linked_ids() {
            if let Some(item) = self.item(id) {
                f(&item.key, &item.value)?;
            }
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<Handle> {
        self.linked_ids().into_iter().map(|id| self.key_of(id)).collect()
    }

    pub fn values(&self) -> Vec<Handle> {
        self.linked_ids()
            .into_iter()
            .map(|id| self.value_of(id))
            .collect()
    }

    pub fn pairs(&self) -> Vec<(Handle, Handle)> {
        self.linked_ids()
            .into_iter()
            .map(|id| (self.key_of(id), self.value_of(id)))
            .collect()
    }

    /// Items still chained only because iterators hold them.
    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|item| item.state == ItemState::PendingRelease)
            .count()
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        for item in self.slots.iter().flatten() {
            marker.mark(&item.key);
            marker.mark(&item.value);
        }
    }
}

// ============================================================================
// ListIterator
// ============================================================================

/// Cursor over one list.
///
/// Holds an owning handle to its list and one item reference. After
/// [`ListIterator::delete`] the cursor sits on the successor of the deleted
/// item; key and value read as null until the cursor moves again, and a
/// second delete does nothing. Other cursors on the deleted item keep
/// reading its key and value until they move away.
pub struct ListIterator {
    list: Handle,
    item: Option<usize>,
    deleted: bool,
    releases: ReleaseQueue,
}

impl ListIterator {
    /// Cursor on the first item of `list`. `None` if `list` is not a list.
    pub fn new(list: Handle) -> Option<Self> {
        let (item, releases) = list.with_list_mut(|l| {
            let first = l.first_id();
            if let Some(id) = first {
                l.retain(id);
            }
            (first, l.release_queue())
        })?;
        Some(Self {
            list,
            item,
            deleted: false,
            releases,
        })
    }

    pub fn list(&self) -> &Handle {
        &self.list
    }

    fn with_list<R>(&self, f: impl FnOnce(&mut List) -> R) -> Option<R> {
        self.list.with_list_mut(f)
    }

    /// Point at `target`, taking its reference before dropping the old one.
    fn move_to(&mut self, target: Option<usize>) {
        let old = self.item;
        self.with_list(|l| {
            if let Some(id) = target {
                l.retain(id);
            }
            if let Some(id) = old {
                l.release(id);
            }
        });
        self.item = target;
        self.deleted = false;
    }

    pub fn first(&mut self) -> bool {
        let target = self.with_list(|l| l.first_id()).flatten();
        self.move_to(target);
        self.is_valid()
    }

    pub fn last(&mut self) -> bool {
        let target = self.with_list(|l| l.last_id()).flatten();
        self.move_to(target);
        self.is_valid()
    }

    /// Step forward. Moving past the end leaves the cursor invalid.
    pub fn next(&mut self) -> bool {
        if self.deleted {
            self.deleted = false;
            return self.is_valid();
        }
        let Some(id) = self.item else {
            return false;
        };
        let target = self.with_list(|l| l.next_id(id)).flatten();
        self.move_to(target);
        self.is_valid()
    }

    pub fn prev(&mut self) -> bool {
        let target = match (self.item, self.deleted) {
            (Some(id), _) => self.with_list(|l| l.prev_id(id)).flatten(),
            (None, true) => self.with_list(|l| l.last_id()).flatten(),
            (None, false) => return false,
        };
        self.move_to(target);
        self.is_valid()
    }

    /// Remove the current item from the list. Returns false if there is
    /// nothing to delete or this cursor already deleted it.
    pub fn delete(&mut self) -> bool {
        if self.deleted {
            return false;
        }
        let Some(id) = self.item else {
            return false;
        };
        let successor = self
            .with_list(|l| {
                if !l.remove_item(id) {
                    return None;
                }
                let successor = l.next_id(id);
                if let Some(next) = successor {
                    l.retain(next);
                }
                l.release(id);
                Some(successor)
            })
            .flatten();
        let Some(successor) = successor else {
            return false;
        };
        self.item = successor;
        self.deleted = true;
        true
    }

    pub fn key(&self) -> Handle {
        match (self.item, self.deleted) {
            (Some(id), false) => self.with_list(|l| l.key_of(id)).unwrap_or_default(),
            _ => Handle::Null,
        }
    }

    pub fn value(&self) -> Handle {
        match (self.item, self.deleted) {
            (Some(id), false) => self.with_list(|l| l.value_of(id)).unwrap_or_default(),
            _ => Handle::Null,
        }
    }

    pub fn set_value(&mut self, value: Handle) -> bool {
        match (self.item, self.deleted) {
            (Some(id), false) => self
                .with_list(|l| l.set_value_of(id, value))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Insert before the cursor, or at the end when the cursor is invalid.
    pub fn insert_before(&mut self, key: Handle, value: Handle) -> Result<(), RuntimeError> {
        let anchor = self.anchor();
        self.with_list(|l| l.insert_item_before(anchor, key, value))
            .ok_or(RuntimeError::Borrowed)?
            .map(|_| ())
    }

    /// Insert after the cursor, or at the end when the cursor is invalid.
    pub fn insert_after(&mut self, key: Handle, value: Handle) -> Result<(), RuntimeError> {
        let anchor = self.anchor();
        self.with_list(|l| match anchor {
            Some(_) => l.insert_item_after(anchor, key, value),
            None => l.insert_item_before(None, key, value),
        })
        .ok_or(RuntimeError::Borrowed)?
        .map(|_| ())
    }

    fn anchor(&self) -> Option<usize> {
        let id = self.item?;
        if self.deleted {
            return None;
        }
        self.with_list(|l| l.is_present(id)).unwrap_or(false).then_some(id)
    }

    /// True while key and value are readable: on a linked item, or on one
    /// another cursor deleted.
    pub fn is_valid(&self) -> bool {
        match (self.item, self.deleted) {
            (Some(id), false) => self.with_list(|l| l.is_present(id)).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_first(&self) -> bool {
        self.is_valid() && self.with_list(|l| l.first_id()).flatten() == self.item
    }

    pub fn is_last(&self) -> bool {
        self.is_valid() && self.with_list(|l| l.last_id()).flatten() == self.item
    }

    /// Index of the current item among the linked items.
    pub fn position(&self) -> Option<usize> {
        let id = self.item.filter(|_| !self.deleted)?;
        self.with_list(|l| l.linked_ids().iter().position(|&linked| linked == id))
            .flatten()
    }

    /// A second cursor on the same item.
    pub fn copy(&self) -> Self {
        if let Some(id) = self.item {
            self.with_list(|l| l.retain(id));
        }
        Self {
            list: self.list.clone(),
            item: self.item,
            deleted: self.deleted,
            releases: Rc::clone(&self.releases),
        }
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        marker.mark(&self.list);
    }
}

impl Drop for ListIterator {
    fn drop(&mut self) {
        let Some(id) = self.item.take() else {
            return;
        };
        if self.list.with_list_mut(|l| l.release(id)).is_none() {
            // the list is borrowed further up; it applies the release when
            // that borrow ends
            let mut queue = self.releases.take();
            queue.push(id);
            self.releases.set(queue);
        }
    }
}

// ============================================================================
// Script binding
// ============================================================================

const LIST_DECLARATION: &str = "\
class list {
    int length();
    void add(var key, var value);
    void addOrSet(var key, var value);
    var get(var key);
    int contains(var key);
    int remove(var key);
    void clear();
    int insertBefore(var anchor, var key, var value);
    int insertAfter(var anchor, var key, var value);
    int swap(var a, var b);
    int moveToFirst(var key);
    int moveToLast(var key);
    void sort(int order, delegate compare);
    array keys();
    array values();
    void enumerate(delegate visit);
    iterator iterator();
}";

const LIST_MEMBERS: &[&str] = &[
    "length",
    "add",
    "addOrSet",
    "get",
    "contains",
    "remove",
    "clear",
    "insertBefore",
    "insertAfter",
    "swap",
    "moveToFirst",
    "moveToLast",
    "sort",
    "keys",
    "values",
    "enumerate",
    "iterator",
];

/// Protocol entry of the built-in list type.
pub struct ListType;

fn with_list<R>(this: &Handle, f: impl FnOnce(&mut List) -> R) -> Result<R, RuntimeError> {
    this_or_invalid(this.with_list_mut(f), "list")
}

impl NativeType for ListType {
    fn name(&self) -> &str {
        "list"
    }

    fn declaration(&self) -> Result<String, RuntimeError> {
        Ok(LIST_DECLARATION.to_string())
    }

    fn version(&self) -> Result<String, RuntimeError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        member_index(LIST_MEMBERS, name)
    }

    fn new_object(&self, rt: &mut Runtime, _class: ClassId) -> Result<Handle, RuntimeError> {
        rt.new_list()
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let this = cx.this().clone();
        let member = LIST_MEMBERS
            .get(func)
            .copied()
            .ok_or_else(|| RuntimeError::unsupported(format!("list member {}", func)))?;
        let (a, b, c) = (cx.arg_handle(0), cx.arg_handle(1), cx.arg_handle(2));
        match member {
            "length" => cx.return_int(with_list(&this, |l| l.len())? as i64),
            "add" => with_list(&this, |l| l.add(a, b))??,
            "addOrSet" => with_list(&this, |l| l.add_or_set(a, b))??,
            "get" => cx.set_return(with_list(&this, |l| l.get(&a))?),
            "contains" => cx.return_bool(with_list(&this, |l| l.contains(&a))?),
            "remove" => cx.return_bool(with_list(&this, |l| l.remove(&a))?),
            "clear" => with_list(&this, List::clear)?,
            "insertBefore" => cx.return_bool(with_list(&this, |l| l.insert_before(&a, b, c))??),
            "insertAfter" => cx.return_bool(with_list(&this, |l| l.insert_after(&a, b, c))??),
            "swap" => cx.return_bool(with_list(&this, |l| l.swap(&a, &b))?),
            "moveToFirst" => cx.return_bool(with_list(&this, |l| l.move_to_first(&a))?),
            "moveToLast" => cx.return_bool(with_list(&this, |l| l.move_to_last(&a))?),
            "sort" => {
                let order = SortOrder::from_code(a.to_int())
                    .ok_or_else(|| RuntimeError::invalid_argument("unknown sort order"))?;
                cx.runtime().list_sort(&this, order, &b)?;
            }
            "keys" | "values" => {
                let items = with_list(&this, |l| {
                    if member == "keys" { l.keys() } else { l.values() }
                })?;
                let array = cx.runtime().new_array_from(items)?;
                cx.set_return(array);
            }
            "enumerate" => cx.runtime().list_enumerate(&this, &a)?,
            "iterator" => {
                let iter = cx.runtime().new_iterator(&this)?;
                cx.set_return(iter);
            }
            _ => return Err(RuntimeError::unsupported(format!("list member {}", member))),
        }
        Ok(())
    }
}

const ITERATOR_DECLARATION: &str = "\
class iterator {
    int first();
    int last();
    int next();
    int prev();
    var key();
    var value();
    int setValue(var value);
    int delete();
    void insertBefore(var key, var value);
    void insertAfter(var key, var value);
    int isFirst();
    int isLast();
    int isValid();
    iterator copy();
    static iterator create(list source);
}";

const ITERATOR_MEMBERS: &[&str] = &[
    "first",
    "last",
    "next",
    "prev",
    "key",
    "value",
    "setValue",
    "delete",
    "insertBefore",
    "insertAfter",
    "isFirst",
    "isLast",
    "isValid",
    "copy",
];

const ITERATOR_STATICS: &[&str] = &["create"];

/// Protocol entry of the built-in iterator type.
pub struct IteratorType;

fn with_iter<R>(this: &Handle, f: impl FnOnce(&mut ListIterator) -> R) -> Result<R, RuntimeError> {
    this_or_invalid(this.with_iterator_mut(f), "iterator")
}

impl NativeType for IteratorType {
    fn name(&self) -> &str {
        "iterator"
    }

    fn declaration(&self) -> Result<String, RuntimeError> {
        Ok(ITERATOR_DECLARATION.to_string())
    }

    fn version(&self) -> Result<String, RuntimeError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        member_index(ITERATOR_MEMBERS, name)
    }

    fn static_index(&self, name: &str) -> Option<usize> {
        member_index(ITERATOR_STATICS, name)
    }

    fn call_static(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        match ITERATOR_STATICS.get(func).copied() {
            Some("create") => {
                let list = cx.arg_handle(0);
                let iter = cx.runtime().new_iterator(&list)?;
                cx.set_return(iter);
                Ok(())
            }
            _ => Err(RuntimeError::unsupported(format!("iterator static {}", func))),
        }
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let this = cx.this().clone();
        let member = ITERATOR_MEMBERS
            .get(func)
            .copied()
            .ok_or_else(|| RuntimeError::unsupported(format!("iterator member {}", func)))?;
        let (a, b) = (cx.arg_handle(0), cx.arg_handle(1));
        match member {
            "first" => cx.return_bool(with_iter(&this, ListIterator::first)?),
            "last" => cx.return_bool(with_iter(&this, ListIterator::last)?),
            "next" => cx.return_bool(with_iter(&this, ListIterator::next)?),
            "prev" => cx.return_bool(with_iter(&this, ListIterator::prev)?),
            "key" => cx.set_return(with_iter(&this, |it| it.key())?),
            "value" => cx.set_return(with_iter(&this, |it| it.value())?),
            "setValue" => cx.return_bool(with_iter(&this, |it| it.set_value(a))?),
            "delete" => cx.return_bool(with_iter(&this, ListIterator::delete)?),
            "insertBefore" => with_iter(&this, |it| it.insert_before(a, b))??,
            "insertAfter" => with_iter(&this, |it| it.insert_after(a, b))??,
            "isFirst" => cx.return_bool(with_iter(&this, |it| it.is_first())?),
            "isLast" => cx.return_bool(with_iter(&this, |it| it.is_last())?),
            "isValid" => cx.return_bool(with_iter(&this, |it| it.is_valid())?),
            "copy" => {
                let copy = with_iter(&this, |it| it.copy())?;
                let handle = cx.runtime().alloc_object(copy.into())?;
                cx.set_return(handle);
            }
            _ => return Err(RuntimeError::unsupported(format!("iterator member {}", member))),
        }
        Ok(())
    }
}
