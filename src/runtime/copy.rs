//! Graph-preserving deep copy.
//!
//! Every source object is copied once: a memo keyed by object address maps
//! it to its copy, and container shells are registered before their
//! children are copied, so shared sub-objects stay shared and cycles come
//! out as cycles.

use crate::error::RuntimeError;
use crate::gc::Gc;
use crate::prelude::{FxHashMap, FxHashSet};
use crate::runtime::Runtime;
use crate::runtime::builtins::array::Array;
use crate::runtime::builtins::delegate::Delegate;
use crate::runtime::builtins::list::{List, ListIterator};
use crate::runtime::builtins::table::{Table, TableMode, unsupported_in};
use crate::value::{Handle, NativeInstance, Object};

/// State of one deep copy. Native types receive it in
/// [`NativeObject::copy`](crate::native::NativeObject::copy) and copy their
/// children through [`DeepCopy::copy`].
pub struct DeepCopy<'a> {
    rt: &'a Runtime,
    memo: FxHashMap<usize, Handle>,
    natives_in_progress: FxHashSet<usize>,
    /// Iterator copies and the position they move to once every list is
    /// filled
    cursors: Vec<(Handle, Option<usize>)>,
}

enum Kind {
    String(Vec<u8>),
    Array,
    List,
    Iterator,
    Table(TableMode),
    Delegate,
    Native,
    Collected,
}

impl<'a> DeepCopy<'a> {
    pub fn new(rt: &'a Runtime) -> Self {
        Self {
            rt,
            memo: FxHashMap::default(),
            natives_in_progress: FxHashSet::default(),
            cursors: Vec::new(),
        }
    }

    /// Copy of `handle` with every copied iterator moved to its position.
    pub fn copy_root(mut self, handle: &Handle) -> Result<Handle, RuntimeError> {
        let copy = self.copy(handle)?;
        for (iter, position) in self.cursors.drain(..) {
            let Some(steps) = position else {
                continue;
            };
            iter.with_iterator_mut(|it| {
                it.first();
                for _ in 0..steps {
                    it.next();
                }
            });
        }
        Ok(copy)
    }

    pub fn runtime(&self) -> &Runtime {
        self.rt
    }

    /// Copy of `handle`. Scalars are copied by value and weak handles stay
    /// weak references to the same host object.
    pub fn copy(&mut self, handle: &Handle) -> Result<Handle, RuntimeError> {
        let Handle::Object(gc) = handle else {
            return Ok(handle.clone());
        };
        if let Some(done) = self.memo.get(&gc.addr()) {
            return Ok(done.clone());
        }
        let kind = {
            let obj = gc.try_borrow()?;
            match &*obj {
                Object::String(s) => Kind::String(s.as_bytes().to_vec()),
                Object::Array(_) => Kind::Array,
                Object::List(_) => Kind::List,
                Object::Iterator(_) => Kind::Iterator,
                Object::Table(t) => Kind::Table(t.mode()),
                Object::Delegate(_) => Kind::Delegate,
                Object::Native(_) => Kind::Native,
                Object::Collected => Kind::Collected,
            }
        };
        match kind {
            Kind::String(bytes) => {
                let copy = self.rt.new_string_bytes(&bytes)?;
                self.memo.insert(gc.addr(), copy.clone());
                Ok(copy)
            }
            Kind::Array => self.copy_array(gc, handle),
            Kind::List => self.copy_list(gc, handle),
            Kind::Iterator => self.copy_iterator(gc, handle),
            Kind::Table(TableMode::Managed) => self.copy_table(gc, handle),
            Kind::Table(mode) => Err(unsupported_in(mode, "deep copy")),
            Kind::Delegate => self.copy_delegate(gc, handle),
            Kind::Native => self.copy_native(gc),
            Kind::Collected => Ok(Handle::Null),
        }
    }

    fn copy_array(&mut self, gc: &Gc, source: &Handle) -> Result<Handle, RuntimeError> {
        let shell = self.rt.new_array()?;
        self.memo.insert(gc.addr(), shell.clone());
        let items = source
            .with_array(|a| a.as_slice().to_vec())
            .ok_or(RuntimeError::Borrowed)?;
        let copies = items
            .iter()
            .map(|item| self.copy(item))
            .collect::<Result<Vec<_>, _>>()?;
        shell
            .with_array_mut(|a| a.extend(copies))
            .ok_or(RuntimeError::Borrowed)??;
        Ok(shell)
    }

    fn copy_list(&mut self, gc: &Gc, source: &Handle) -> Result<Handle, RuntimeError> {
        let shell = self.list_shell(gc)?;
        self.fill_list(&shell, source)?;
        Ok(shell)
    }

    fn list_shell(&mut self, gc: &Gc) -> Result<Handle, RuntimeError> {
        let shell = self.rt.new_list()?;
        self.memo.insert(gc.addr(), shell.clone());
        Ok(shell)
    }

    fn fill_list(&mut self, shell: &Handle, source: &Handle) -> Result<(), RuntimeError> {
        let pairs = source.with_list(List::pairs).ok_or(RuntimeError::Borrowed)?;
        for (key, value) in pairs {
            let (key, value) = (self.copy(&key)?, self.copy(&value)?);
            shell
                .with_list_mut(|l| l.add(key, value))
                .ok_or(RuntimeError::Borrowed)??;
        }
        Ok(())
    }

    /// The copy is registered before its list is filled, so an iterator
    /// stored in its own list is copied once. It moves to the source's
    /// position when the whole copy is done; a cursor that is off the list
    /// stays off it.
    fn copy_iterator(&mut self, gc: &Gc, source: &Handle) -> Result<Handle, RuntimeError> {
        let (list, position) = source
            .with_iterator(|it| (it.list().clone(), it.position()))
            .ok_or(RuntimeError::Borrowed)?;
        let Handle::Object(list_gc) = &list else {
            return Err(RuntimeError::invalid_argument("iterator without a list"));
        };
        let (list_copy, unfilled) = match self.memo.get(&list_gc.addr()) {
            Some(done) => (done.clone(), false),
            None => (self.list_shell(list_gc)?, true),
        };
        let iter = ListIterator::new(list_copy.clone())
            .ok_or_else(|| RuntimeError::invalid_argument("iterator without a list"))?;
        let copy = self.rt.alloc_object(Object::Iterator(iter))?;
        self.memo.insert(gc.addr(), copy.clone());
        if unfilled {
            self.fill_list(&list_copy, &list)?;
        }
        self.cursors.push((copy.clone(), position));
        Ok(copy)
    }

    fn copy_table(&mut self, gc: &Gc, source: &Handle) -> Result<Handle, RuntimeError> {
        let shell = self.rt.new_table()?;
        self.memo.insert(gc.addr(), shell.clone());
        let pairs = source.with_table(Table::pairs).ok_or(RuntimeError::Borrowed)?;
        for (key, value) in pairs {
            let value = self.copy(&value)?;
            shell
                .with_table_mut(|t| t.set(&key, value))
                .ok_or(RuntimeError::Borrowed)??;
        }
        Ok(shell)
    }

    fn copy_delegate(&mut self, gc: &Gc, source: &Handle) -> Result<Handle, RuntimeError> {
        let (name, func, bound) = source
            .with_delegate(|d| (d.name().to_string(), d.func(), d.bound().to_vec()))
            .ok_or(RuntimeError::Borrowed)?;
        let shell = self
            .rt
            .alloc_object(Object::Delegate(Delegate::new(name, func)))?;
        self.memo.insert(gc.addr(), shell.clone());
        let bound = bound
            .iter()
            .map(|h| self.copy(h))
            .collect::<Result<Vec<_>, _>>()?;
        shell
            .with_delegate_mut(|d| d.set_bound(bound))
            .ok_or(RuntimeError::Borrowed)?;
        Ok(shell)
    }

    /// Natives copy themselves; a native reached again through its own
    /// children cannot be copied.
    fn copy_native(&mut self, gc: &Gc) -> Result<Handle, RuntimeError> {
        let addr = gc.addr();
        if !self.natives_in_progress.insert(addr) {
            return Err(RuntimeError::cannot_copy(format!(
                "{} (cyclic)",
                self.rt.class_name(gc.class_id())
            )));
        }
        let result = {
            let obj = gc.try_borrow()?;
            match &*obj {
                Object::Native(native) => native
                    .object()
                    .copy(self)
                    .map(|copy| (native.class_id(), copy)),
                _ => Err(RuntimeError::invalid_argument("not a native object")),
            }
        };
        self.natives_in_progress.remove(&addr);
        let (class, copy) = result.map_err(|err| match err {
            RuntimeError::CannotCopy { .. } => {
                RuntimeError::cannot_copy(self.rt.class_name(gc.class_id()))
            }
            other => other,
        })?;
        let handle = self
            .rt
            .alloc_object(Object::Native(NativeInstance::new(class, copy)))?;
        self.memo.insert(addr, handle.clone());
        Ok(handle)
    }
}
