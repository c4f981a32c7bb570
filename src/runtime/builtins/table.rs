//! Byte-keyed trie table.
//!
//! Every key byte is two levels of 16-way nodes (high nibble, then low
//! nibble). Nodes live in an arena owned by the table and refer to each
//! other by index; node 0 is the root and index 0 doubles as "no child".
//! A data slot is only ever set on a node where a key ends.

use std::any::Any;
use std::ffi::c_void;
use std::mem::size_of;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::gc::Marker;
use crate::memory::{Allocation, MemoryRef, round_to_grain};
use crate::native::{CallContext, NativeType};
use crate::prelude::{IndexSet, index_set_with_capacity};
use crate::runtime::Runtime;
use crate::value::{ClassId, Handle};

use super::{member_index, this_or_invalid};

/// Storage mode, fixed when the table is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    /// Values are handles, released and marked by the table.
    Managed,
    /// Values are opaque pointers the table never owns.
    NativeUnmanaged,
    /// Values are owned native values, dropped (or handed to the table's
    /// destructor) when removed.
    NativeManaged,
}

/// An opaque pointer stored by a native-unmanaged table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPtr(pub *mut c_void);

/// Application-supplied cleanup for native-managed values.
pub type Destructor = Rc<dyn Fn(Box<dyn Any>)>;

pub enum Slot {
    Handle(Handle),
    Ptr(RawPtr),
    Owned(Box<dyn Any>),
}

const FANOUT: usize = 16;

#[derive(Default)]
struct Node {
    children: [u32; FANOUT],
    data: Option<Slot>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.iter().all(|&child| child == 0)
    }
}

pub struct Table {
    mode: TableMode,
    nodes: Vec<Node>,
    free_nodes: Vec<u32>,
    len: usize,
    destructor: Option<Destructor>,
    alloc: Allocation,
}

impl Table {
    pub fn new(mem: MemoryRef, mode: TableMode) -> Result<Self, RuntimeError> {
        let mut table = Self {
            mode,
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            len: 0,
            destructor: None,
            alloc: Allocation::new(mem),
        };
        table.reserve_nodes(1)?;
        table.nodes.push(Node::default());
        Ok(table)
    }

    /// A native-managed table whose removed values go to `destructor`.
    pub fn with_destructor(mem: MemoryRef, destructor: Destructor) -> Result<Self, RuntimeError> {
        let mut table = Self::new(mem, TableMode::NativeManaged)?;
        table.destructor = Some(destructor);
        Ok(table)
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nodes in use, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    pub(crate) fn require(&self, mode: TableMode, operation: &str) -> Result<(), RuntimeError> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(unsupported_in(self.mode, operation))
        }
    }

    // ------------------------------------------------------------------
    // Node arena
    // ------------------------------------------------------------------

    fn reserve_nodes(&mut self, needed: usize) -> Result<(), RuntimeError> {
        if needed * size_of::<Node>() <= self.alloc.size() {
            return Ok(());
        }
        let capacity = round_to_grain(needed);
        log::trace!("table grows to {} nodes", capacity);
        self.alloc.resize(capacity * size_of::<Node>())?;
        Ok(())
    }

    fn alloc_node(&mut self) -> Result<u32, RuntimeError> {
        if let Some(index) = self.free_nodes.pop() {
            return Ok(index);
        }
        self.reserve_nodes(self.nodes.len() + 1)?;
        let index = u32::try_from(self.nodes.len())
            .map_err(|_| RuntimeError::invalid_argument("table node limit reached"))?;
        self.nodes.push(Node::default());
        Ok(index)
    }

    fn child(&self, node: usize, nibble: u8) -> Option<usize> {
        let child = *self.nodes.get(node)?.children.get(usize::from(nibble))?;
        (child != 0).then_some(child as usize)
    }

    fn find_node(&self, key: &[u8]) -> Option<usize> {
        let mut node = 0;
        for &byte in key {
            node = self.child(node, byte >> 4)?;
            node = self.child(node, byte & 0x0f)?;
        }
        Some(node)
    }

    fn find_or_create(&mut self, key: &[u8]) -> Result<usize, RuntimeError> {
        let mut node = 0;
        for &byte in key {
            for nibble in [byte >> 4, byte & 0x0f] {
                node = match self.child(node, nibble) {
                    Some(child) => child,
                    None => {
                        let child = self.alloc_node()?;
                        if let Some(slot) = self
                            .nodes
                            .get_mut(node)
                            .and_then(|n| n.children.get_mut(usize::from(nibble)))
                        {
                            *slot = child;
                        }
                        child as usize
                    }
                };
            }
        }
        Ok(node)
    }

    fn slot(&self, key: &[u8]) -> Option<&Slot> {
        self.nodes.get(self.find_node(key)?)?.data.as_ref()
    }

    fn store(&mut self, key: &[u8], slot: Slot) -> Result<(), RuntimeError> {
        let node = self.find_or_create(key)?;
        let old = self
            .nodes
            .get_mut(node)
            .and_then(|n| n.data.replace(slot));
        match old {
            Some(old) => self.dispose(old),
            None => self.len += 1,
        }
        Ok(())
    }

    fn dispose(&self, slot: Slot) {
        if let (Slot::Owned(value), Some(destructor)) = (slot, self.destructor.as_ref()) {
            destructor(value);
        }
    }

    // ------------------------------------------------------------------
    // Managed mode
    // ------------------------------------------------------------------

    /// Value under `key`; null when absent or in a native mode.
    pub fn get(&self, key: &[u8]) -> Handle {
        match self.slot(key) {
            Some(Slot::Handle(value)) => value.clone(),
            _ => Handle::Null,
        }
    }

    /// Store `value` under `key`. Storing null deletes the key.
    pub fn set(&mut self, key: &[u8], value: Handle) -> Result<(), RuntimeError> {
        self.require(TableMode::Managed, "set")?;
        if value.is_null() {
            self.remove(key);
            return Ok(());
        }
        self.store(key, Slot::Handle(value))
    }

    /// Delete `key`. Nodes stay allocated until [`Table::cleanup`].
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let Some(node) = self.find_node(key) else {
            return false;
        };
        let Some(old) = self.nodes.get_mut(node).and_then(|n| n.data.take()) else {
            return false;
        };
        self.len -= 1;
        self.dispose(old);
        true
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.slot(key).is_some()
    }

    // ------------------------------------------------------------------
    // Native modes
    // ------------------------------------------------------------------

    /// Store a pointer the table does not own. A null pointer deletes.
    pub fn set_ptr(&mut self, key: &[u8], ptr: *mut c_void) -> Result<(), RuntimeError> {
        self.require(TableMode::NativeUnmanaged, "set_ptr")?;
        if ptr.is_null() {
            self.remove(key);
            return Ok(());
        }
        self.store(key, Slot::Ptr(RawPtr(ptr)))
    }

    pub fn get_ptr(&self, key: &[u8]) -> Option<*mut c_void> {
        match self.slot(key) {
            Some(Slot::Ptr(ptr)) => Some(ptr.0),
            _ => None,
        }
    }

    /// Store an owned value, disposing of any previous one.
    pub fn set_owned(&mut self, key: &[u8], value: Box<dyn Any>) -> Result<(), RuntimeError> {
        self.require(TableMode::NativeManaged, "set_owned")?;
        self.store(key, Slot::Owned(value))
    }

    pub fn get_owned<T: Any, R>(&self, key: &[u8], f: impl FnOnce(&T) -> R) -> Option<R> {
        match self.slot(key) {
            Some(Slot::Owned(value)) => value.downcast_ref::<T>().map(f),
            _ => None,
        }
    }

    /// Remove an owned value and hand it back without running the
    /// destructor.
    pub fn take_owned(&mut self, key: &[u8]) -> Option<Box<dyn Any>> {
        let node = self.find_node(key)?;
        let data = &mut self.nodes.get_mut(node)?.data;
        if !matches!(data, Some(Slot::Owned(_))) {
            return None;
        }
        let Some(Slot::Owned(value)) = data.take() else {
            return None;
        };
        self.len -= 1;
        Some(value)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    fn visit(
        &self,
        node: usize,
        prefix: &mut Vec<u8>,
        high: Option<u8>,
        f: &mut dyn FnMut(&[u8], &Slot) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let Some(current) = self.nodes.get(node) else {
            return Ok(());
        };
        for (nibble, &child) in current.children.iter().enumerate() {
            if child == 0 {
                continue;
            }
            let nibble = nibble as u8;
            match high {
                None => self.visit(child as usize, prefix, Some(nibble), f)?,
                Some(high) => {
                    prefix.push((high << 4) | nibble);
                    self.visit(child as usize, prefix, None, f)?;
                    prefix.pop();
                }
            }
        }
        if let (None, Some(slot)) = (high, current.data.as_ref()) {
            f(prefix, slot)?;
        }
        Ok(())
    }

    fn walk(
        &self,
        mut f: impl FnMut(&[u8], &Slot) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let mut prefix = Vec::new();
        self.visit(0, &mut prefix, None, &mut f)
    }

    /// Visit every entry, children before their parent. Managed mode only.
    pub fn enumerate(
        &self,
        mut f: impl FnMut(&[u8], &Handle) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        self.require(TableMode::Managed, "enumerate")?;
        self.walk(|key, slot| match slot {
            Slot::Handle(value) => f(key, value),
            _ => Ok(()),
        })
    }

    /// Keys in enumeration order, any mode.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys = Vec::with_capacity(self.len);
        let _ = self.walk(|key, _| {
            keys.push(key.to_vec());
            Ok(())
        });
        keys
    }

    pub fn pairs(&self) -> Vec<(Vec<u8>, Handle)> {
        let mut pairs = Vec::with_capacity(self.len);
        let _ = self.walk(|key, slot| {
            if let Slot::Handle(value) = slot {
                pairs.push((key.to_vec(), value.clone()));
            }
            Ok(())
        });
        pairs
    }

    pub fn values(&self) -> Vec<Handle> {
        self.pairs().into_iter().map(|(_, value)| value).collect()
    }

    /// Return empty subtrees to the node pool. A table with no entries
    /// collapses back to its root.
    pub fn cleanup(&mut self) -> Result<(), RuntimeError> {
        if self.len == 0 {
            self.nodes.truncate(1);
            if let Some(root) = self.nodes.first_mut() {
                *root = Node::default();
            }
            self.free_nodes.clear();
            self.alloc.resize(round_to_grain(1) * size_of::<Node>())?;
            return Ok(());
        }
        self.prune(0);
        Ok(())
    }

    /// Prune below `node`; true if `node` itself is now empty.
    fn prune(&mut self, node: usize) -> bool {
        let children = match self.nodes.get(node) {
            Some(n) => n.children,
            None => return true,
        };
        for (nibble, &child) in children.iter().enumerate() {
            if child == 0 {
                continue;
            }
            if self.prune(child as usize) {
                if let Some(n) = self.nodes.get_mut(node) {
                    if let Some(slot) = n.children.get_mut(nibble) {
                        *slot = 0;
                    }
                }
                self.free_nodes.push(child);
            }
        }
        self.nodes
            .get(node)
            .is_none_or(|n| n.data.is_none() && n.is_leaf())
    }

    /// Structural copy of a managed table with every value passed through
    /// `copy_value`.
    pub fn copy_with(
        &self,
        mut copy_value: impl FnMut(&Handle) -> Result<Handle, RuntimeError>,
    ) -> Result<Self, RuntimeError> {
        self.require(TableMode::Managed, "copy")?;
        let mut out = Self::new(self.alloc.memory().clone(), TableMode::Managed)?;
        out.reserve_nodes(self.nodes.len())?;
        out.nodes.clear();
        for node in &self.nodes {
            let data = match &node.data {
                None => None,
                Some(Slot::Handle(value)) => Some(Slot::Handle(copy_value(value)?)),
                Some(Slot::Ptr(_) | Slot::Owned(_)) => {
                    return Err(unsupported_in(self.mode, "copy"));
                }
            };
            out.nodes.push(Node {
                children: node.children,
                data,
            });
        }
        out.free_nodes = self.free_nodes.clone();
        out.len = self.len;
        Ok(out)
    }

    /// Shallow copy: values are shared.
    pub fn copy(&self) -> Result<Self, RuntimeError> {
        self.copy_with(|value| Ok(value.clone()))
    }

    /// Union of both key sets: keys of `left` in its order, then the keys
    /// only `right` has.
    pub fn merge_keys(left: &Table, right: &Table) -> IndexSet<Vec<u8>> {
        let mut keys = index_set_with_capacity(left.len() + right.len());
        keys.extend(left.keys());
        keys.extend(right.keys());
        keys
    }

    /// Build a new managed table by calling `merge` once per key of either
    /// input. A null result leaves the key out. Both inputs must be managed.
    pub fn merge(
        left: &Table,
        right: &Table,
        mut merge: impl FnMut(&[u8], &Table, &Table) -> Result<Handle, RuntimeError>,
    ) -> Result<Self, RuntimeError> {
        left.require(TableMode::Managed, "merge")?;
        right.require(TableMode::Managed, "merge")?;
        let mut out = Self::new(left.alloc.memory().clone(), TableMode::Managed)?;
        for key in Self::merge_keys(left, right) {
            let value = merge(&key, left, right)?;
            out.set(&key, value)?;
        }
        Ok(out)
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        for node in &self.nodes {
            if let Some(Slot::Handle(value)) = &node.data {
                marker.mark(value);
            }
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.destructor.is_none() {
            return;
        }
        let slots: Vec<Slot> = self
            .nodes
            .iter_mut()
            .filter_map(|node| node.data.take())
            .collect();
        for slot in slots {
            self.dispose(slot);
        }
    }
}

/// Table key of a handle: string bytes, or the decimal text of a number.
/// `Unsupported` for a handle-only operation on a native table.
pub(crate) fn unsupported_in(mode: TableMode, operation: &str) -> RuntimeError {
    RuntimeError::unsupported(format!("{} on a {:?} table", operation, mode))
}

pub fn key_bytes(key: &Handle) -> Option<Vec<u8>> {
    match key {
        Handle::Int(v) => Some(v.to_string().into_bytes()),
        Handle::Float(v) => Some(v.to_string().into_bytes()),
        other => other.with_string(|s| s.as_bytes().to_vec()),
    }
}

// ============================================================================
// Script binding
// ============================================================================

const DECLARATION: &str = "\
class table {
    int length();
    var get(string key);
    void set(string key, var value);
    int remove(string key);
    int contains(string key);
    array keys();
    array toArray();
    list toList();
    table copy();
    void enumerate(delegate visit);
    void cleanup();
    static table merge(table left, table right, delegate merge);
}";

const MEMBERS: &[&str] = &[
    "length", "get", "set", "remove", "contains", "keys", "toArray", "toList", "copy",
    "enumerate", "cleanup",
];

const STATICS: &[&str] = &["merge"];

/// Protocol entry of the built-in table type.
pub struct TableType;

fn with_table<R>(this: &Handle, f: impl FnOnce(&mut Table) -> R) -> Result<R, RuntimeError> {
    this_or_invalid(this.with_table_mut(f), "table")
}

impl NativeType for TableType {
    fn name(&self) -> &str {
        "table"
    }

    fn declaration(&self) -> Result<String, RuntimeError> {
        Ok(DECLARATION.to_string())
    }

    fn version(&self) -> Result<String, RuntimeError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        member_index(MEMBERS, name)
    }

    fn static_index(&self, name: &str) -> Option<usize> {
        member_index(STATICS, name)
    }

    fn new_object(&self, rt: &mut Runtime, _class: ClassId) -> Result<Handle, RuntimeError> {
        rt.new_table()
    }

    fn call_static(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        match STATICS.get(func).copied() {
            Some("merge") => {
                let (left, right, merge) = (cx.arg_handle(0), cx.arg_handle(1), cx.arg_handle(2));
                let merged = cx.runtime().table_merge(&left, &right, &merge)?;
                cx.set_return(merged);
                Ok(())
            }
            _ => Err(RuntimeError::unsupported(format!("table static {}", func))),
        }
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let this = cx.this().clone();
        let member = MEMBERS
            .get(func)
            .copied()
            .ok_or_else(|| RuntimeError::unsupported(format!("table member {}", func)))?;
        let key = cx.arg(0).and_then(key_bytes);
        match (member, key) {
            ("get", Some(key)) => cx.set_return(with_table(&this, |t| t.get(&key))?),
            ("set", Some(key)) => {
                let value = cx.arg_handle(1);
                with_table(&this, |t| t.set(&key, value))??;
            }
            ("remove", Some(key)) => cx.return_bool(with_table(&this, |t| t.remove(&key))?),
            ("contains", Some(key)) => cx.return_bool(with_table(&this, |t| t.contains(&key))?),
            // a missing or non-string key matches no entry
            ("get" | "set", None) => {}
            ("remove" | "contains", None) => cx.return_bool(false),
            _ => call_keyless(member, &this, cx)?,
        }
        Ok(())
    }
}

fn call_keyless(member: &str, this: &Handle, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
    match member {
        "length" => cx.return_int(with_table(this, |t| t.len())? as i64),
        "keys" => {
            let keys = with_table(this, |t| t.keys())?;
            let rt = cx.runtime();
            let items = keys
                .iter()
                .map(|k| rt.new_string_bytes(k))
                .collect::<Result<Vec<_>, _>>()?;
            let array = rt.new_array_from(items)?;
            cx.set_return(array);
        }
        "toArray" => {
            let array = cx.runtime().table_to_array(this)?;
            cx.set_return(array);
        }
        "toList" => {
            let list = cx.runtime().table_to_list(this)?;
            cx.set_return(list);
        }
        "copy" => {
            let copy = with_table(this, |t| t.copy())??;
            let handle = cx.runtime().alloc_object(copy.into())?;
            cx.set_return(handle);
        }
        "enumerate" => {
            let visit = cx.arg_handle(0);
            cx.runtime().table_enumerate(this, &visit)?;
        }
        "cleanup" => with_table(this, Table::cleanup)??,
        _ => return Err(RuntimeError::unsupported(format!("table member {}", member))),
    }
    Ok(())
}
