//! Dynamic array of handles.

use std::mem::size_of;

use crate::error::RuntimeError;
use crate::gc::Marker;
use crate::memory::{Allocation, MemoryRef, buffer_size, oversized, round_to_grain};
use crate::native::{CallContext, NativeType};
use crate::runtime::Runtime;
use crate::value::{ClassId, Handle};

use super::{index_arg, member_index, return_object, this_or_invalid};

/// Ordered, 0-indexed sequence of handles.
///
/// `len() <= max_size()` always holds; the reservation grows in 32-element
/// steps and a shrink releases the dropped handles immediately.
pub struct Array {
    items: Vec<Handle>,
    alloc: Allocation,
}

impl Array {
    pub fn new(mem: MemoryRef) -> Self {
        Self {
            items: Vec::new(),
            alloc: Allocation::new(mem),
        }
    }

    /// An array of `size` nulls.
    pub fn with_size(mem: MemoryRef, size: usize) -> Result<Self, RuntimeError> {
        let mut array = Self::new(mem);
        array.resize(size)?;
        Ok(array)
    }

    pub fn from_items(mem: MemoryRef, items: Vec<Handle>) -> Result<Self, RuntimeError> {
        let mut array = Self::new(mem);
        array.reserve(items.len())?;
        array.items = items;
        Ok(array)
    }

    fn derived(&self, items: Vec<Handle>) -> Result<Self, RuntimeError> {
        Self::from_items(self.alloc.memory().clone(), items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Elements the current reservation can hold.
    pub fn max_size(&self) -> usize {
        self.alloc.size() / size_of::<Handle>()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Handle> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Handle] {
        &self.items
    }

    fn reserve(&mut self, needed: usize) -> Result<(), RuntimeError> {
        if needed <= self.max_size() {
            return Ok(());
        }
        let capacity = round_to_grain(needed);
        let bytes = buffer_size(capacity, size_of::<Handle>())?;
        log::trace!("array grows {} -> {} elements", self.max_size(), capacity);
        self.items
            .try_reserve_exact(capacity.saturating_sub(self.items.len()))
            .map_err(|_| oversized(bytes))?;
        if let Err(err) = self.alloc.resize(bytes) {
            self.items.shrink_to(self.max_size());
            return Err(err);
        }
        Ok(())
    }

    fn shrink_reservation(&mut self) -> Result<(), RuntimeError> {
        let capacity = round_to_grain(self.items.len());
        if capacity < self.max_size() {
            self.alloc.resize(buffer_size(capacity, size_of::<Handle>())?)?;
            self.items.shrink_to(capacity);
        }
        Ok(())
    }

    /// Element at `index`. Never grows; out of range reads as null.
    pub fn get(&self, index: i64) -> Handle {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.items.get(i))
            .cloned()
            .unwrap_or_default()
    }

    /// Store at `index`, growing as needed. Negative indexes are ignored.
    pub fn set(&mut self, index: i64, value: Handle) -> Result<(), RuntimeError> {
        let Ok(index) = usize::try_from(index) else {
            return Ok(());
        };
        if index >= self.items.len() {
            let size = index.checked_add(1).ok_or_else(|| oversized(usize::MAX))?;
            self.resize(size)?;
        }
        if let Some(slot) = self.items.get_mut(index) {
            *slot = value;
        }
        Ok(())
    }

    /// Set the length. Growing pads with nulls; shrinking drops the tail.
    pub fn resize(&mut self, size: usize) -> Result<(), RuntimeError> {
        if size > self.items.len() {
            self.reserve(size)?;
            self.items.resize(size, Handle::Null);
            Ok(())
        } else {
            self.items.truncate(size);
            self.shrink_reservation()
        }
    }

    /// Append by reference. An array argument is spliced: its top-level
    /// elements are appended, not the array itself. An array pushed into
    /// itself is appended as a single element.
    pub fn push(&mut self, value: Handle) -> Result<(), RuntimeError> {
        match value.with_array(|other| other.items.clone()) {
            Some(items) => self.extend(items),
            None => {
                self.reserve(self.items.len() + 1)?;
                self.items.push(value);
                Ok(())
            }
        }
    }

    pub fn extend(&mut self, items: Vec<Handle>) -> Result<(), RuntimeError> {
        self.reserve(self.items.len() + items.len())?;
        self.items.extend(items);
        Ok(())
    }

    /// A new array with `source` inserted before `pos` (clamped to the end).
    pub fn insert_range(&self, pos: usize, source: &[Handle]) -> Result<Self, RuntimeError> {
        let pos = pos.min(self.items.len());
        let mut items = Vec::with_capacity(self.items.len() + source.len());
        items.extend_from_slice(self.items.get(..pos).unwrap_or(&[]));
        items.extend_from_slice(source);
        items.extend_from_slice(self.items.get(pos..).unwrap_or(&[]));
        self.derived(items)
    }

    /// A new array without the `count` elements starting at `pos`.
    pub fn remove_range(&self, pos: usize, count: usize) -> Result<Self, RuntimeError> {
        let (start, end) = self.clamp(pos, count);
        let mut items = self.items.get(..start).unwrap_or(&[]).to_vec();
        items.extend_from_slice(self.items.get(end..).unwrap_or(&[]));
        self.derived(items)
    }

    pub fn sub_array(&self, pos: usize, count: usize) -> Result<Self, RuntimeError> {
        let (start, end) = self.clamp(pos, count);
        self.derived(self.items.get(start..end).unwrap_or(&[]).to_vec())
    }

    fn clamp(&self, pos: usize, count: usize) -> (usize, usize) {
        let start = pos.min(self.items.len());
        (start, start.saturating_add(count).min(self.items.len()))
    }

    /// Exchange two elements. Out-of-range indexes leave the array alone.
    pub fn swap(&mut self, a: usize, b: usize) -> bool {
        if a >= self.items.len() || b >= self.items.len() {
            return false;
        }
        self.items.swap(a, b);
        true
    }

    /// Stable sort with a three-way comparator.
    pub fn sort(
        &mut self,
        compare: impl FnMut(&Handle, &Handle) -> Result<i32, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        insertion_sort(&mut self.items, compare)
    }

    /// Position of `value` (scalars by value, objects by identity), -1 when
    /// absent.
    pub fn index_of(&self, value: &Handle) -> i64 {
        self.items
            .iter()
            .position(|item| item.identical(value))
            .map_or(-1, |pos| pos as i64)
    }

    /// Call `f` for every element in order. The first error stops the walk.
    pub fn enumerate(
        &self,
        mut f: impl FnMut(usize, &Handle) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        for (i, item) in self.items.iter().enumerate() {
            f(i, item)?;
        }
        Ok(())
    }

    /// Store `value` in every element.
    pub fn fill(&mut self, value: &Handle) {
        for item in &mut self.items {
            *item = value.clone();
        }
    }

    /// Elements rendered as text and joined with `separator`.
    pub fn to_string_joined(&self, separator: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(separator);
            }
            render(item, &mut out);
        }
        out
    }

    pub(crate) fn take_items(&mut self) -> Vec<Handle> {
        std::mem::take(&mut self.items)
    }

    pub(crate) fn restore_items(&mut self, items: Vec<Handle>) {
        self.items = items;
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        marker.mark_all(&self.items);
    }
}

fn render(item: &Handle, out: &mut Vec<u8>) {
    match item {
        Handle::Null => {}
        Handle::Int(v) => out.extend_from_slice(v.to_string().as_bytes()),
        Handle::Float(v) => out.extend_from_slice(v.to_string().as_bytes()),
        other => match other.with_string(|s| s.as_bytes().to_vec()) {
            Some(bytes) => out.extend_from_slice(&bytes),
            None => out.extend_from_slice(format!("<{}>", other.class_id()).as_bytes()),
        },
    }
}

/// Stable in-place insertion sort. Elements only move by swapping, so the
/// slice stays a permutation of its input even when `compare` fails midway.
pub(crate) fn insertion_sort<T>(
    items: &mut [T],
    mut compare: impl FnMut(&T, &T) -> Result<i32, RuntimeError>,
) -> Result<(), RuntimeError> {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let (Some(prev), Some(cur)) = (items.get(j - 1), items.get(j)) else {
                break;
            };
            if compare(prev, cur)? <= 0 {
                break;
            }
            items.swap(j - 1, j);
            j -= 1;
        }
    }
    Ok(())
}

// ============================================================================
// Script binding
// ============================================================================

const DECLARATION: &str = "\
class array {
    int length();
    var get(int index);
    void set(int index, var value);
    array push(var value);
    array appendCopy(var value);
    array insert(int pos, array source);
    array remove(int pos, int count);
    array subArray(int pos, int count);
    int swap(int a, int b);
    array sort(delegate compare);
    int indexOf(var value);
    void resize(int size);
    void fill(var value);
    string join(string separator);
    void enumerate(delegate visit);
    static array create(int size);
}";

const MEMBERS: &[&str] = &[
    "length",
    "get",
    "set",
    "push",
    "appendCopy",
    "insert",
    "remove",
    "subArray",
    "swap",
    "sort",
    "indexOf",
    "resize",
    "fill",
    "join",
    "enumerate",
];

const STATICS: &[&str] = &["create"];

/// Protocol entry of the built-in array type.
pub struct ArrayType;

fn with_this<R>(this: &Handle, f: impl FnOnce(&mut Array) -> R) -> Result<R, RuntimeError> {
    this_or_invalid(this.with_array_mut(f), "array")
}

impl NativeType for ArrayType {
    fn name(&self) -> &str {
        "array"
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
        rt.new_array()
    }

    fn call_static(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        match STATICS.get(func).copied() {
            Some("create") => {
                let size = index_arg(cx, 0);
                let array = cx.runtime().new_array_with_size(size)?;
                cx.set_return(array);
                Ok(())
            }
            _ => Err(RuntimeError::unsupported(format!("array static {}", func))),
        }
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let this = cx.this().clone();
        let member = MEMBERS
            .get(func)
            .copied()
            .ok_or_else(|| RuntimeError::unsupported(format!("array member {}", func)))?;
        match member {
            "length" => cx.return_int(with_this(&this, |a| a.len())? as i64),
            "get" => {
                let index = cx.arg_int(0);
                cx.set_return(with_this(&this, |a| a.get(index))?);
            }
            "set" => {
                let (index, value) = (cx.arg_int(0), cx.arg_handle(1));
                with_this(&this, |a| a.set(index, value))??;
            }
            "push" => {
                let value = cx.arg_handle(0);
                with_this(&this, |a| a.push(value))??;
                cx.set_return(this);
            }
            "appendCopy" => {
                let value = cx.arg_handle(0);
                cx.runtime().array_append_copy(&this, &value)?;
                cx.set_return(this);
            }
            "insert" => {
                let pos = index_arg(cx, 0);
                let source = cx
                    .arg_handle(1)
                    .with_array(|a| a.as_slice().to_vec())
                    .unwrap_or_default();
                let out = with_this(&this, |a| a.insert_range(pos, &source))??;
                return return_object(cx, out);
            }
            "remove" | "subArray" => {
                let (pos, count) = (index_arg(cx, 0), index_arg(cx, 1));
                let out = with_this(&this, |a| {
                    if member == "remove" {
                        a.remove_range(pos, count)
                    } else {
                        a.sub_array(pos, count)
                    }
                })??;
                return return_object(cx, out);
            }
            "swap" => {
                let (a, b) = (index_arg(cx, 0), index_arg(cx, 1));
                cx.return_bool(with_this(&this, |arr| arr.swap(a, b))?);
            }
            "sort" => {
                let compare = cx.arg_handle(0);
                cx.runtime().array_sort(&this, &compare)?;
                cx.set_return(this);
            }
            "indexOf" => {
                let value = cx.arg_handle(0);
                cx.return_int(with_this(&this, |a| a.index_of(&value))?);
            }
            "resize" => {
                let size = index_arg(cx, 0);
                with_this(&this, |a| a.resize(size))??;
            }
            "fill" => {
                let value = cx.arg_handle(0);
                with_this(&this, |a| a.fill(&value))?;
            }
            "join" => {
                let separator = cx.arg_bytes(0).unwrap_or_default();
                let joined = with_this(&this, |a| a.to_string_joined(&separator))?;
                let handle = cx.runtime().new_string_bytes(&joined)?;
                cx.set_return(handle);
            }
            "enumerate" => {
                let visit = cx.arg_handle(0);
                cx.runtime().array_enumerate(&this, &visit)?;
            }
            _ => return Err(RuntimeError::unsupported(format!("array member {}", member))),
        }
        Ok(())
    }
}
