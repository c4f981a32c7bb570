//! The runtime instance: allocation, native dispatch, roots and collection.

use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::gc::{GcReport, GcStats, Heap, Marker};
use crate::memory::{CountingAllocator, MemoryRef, MemoryStats};
use crate::native::{CallContext, Message, NativeObject, NativeType, Reply, TypeInfo, TypeRegistry};
use crate::value::{ClassId, Handle, HostObject, NativeInstance, Object, WeakHandle};

pub mod builtins;
pub mod copy;

use builtins::array::{Array, insertion_sort};
use builtins::delegate::{Delegate, DelegateFn};
use builtins::list::{List, ListIterator, SortOrder};
use builtins::string::ScriptString;
use builtins::table::{Destructor, Table, TableMode, key_bytes};
use builtins::this_or_invalid;
use copy::DeepCopy;

/// The external dispatch loop. Consulted by [`Runtime::execute_function`]
/// for callables that are not built-in delegates.
pub trait Executor {
    fn execute(
        &self,
        rt: &mut Runtime,
        function: &Handle,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError>;
}

/// Host-side holder of handles that must survive collections.
pub trait GcParticipant {
    fn mark(&self, marker: &mut Marker) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantId(u64);

/// One runtime instance. Single-threaded; handles must not cross instances.
pub struct Runtime {
    config: RuntimeConfig,
    mem: MemoryRef,
    heap: Heap,
    registry: TypeRegistry,
    globals: Handle,
    user_data: Vec<Handle>,
    participants: Vec<(ParticipantId, Rc<dyn GcParticipant>)>,
    next_participant: u64,
    executor: Option<Rc<dyn Executor>>,
    /// Native calls and function executions in progress
    depth: usize,
    collecting: bool,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mem: MemoryRef = match config.memory_limit {
            Some(limit) => Rc::new(CountingAllocator::with_limit(limit)),
            None => Rc::new(CountingAllocator::new()),
        };
        Self::with_allocator(config, mem)
    }

    /// A runtime whose every allocation goes through `mem`.
    pub fn with_allocator(config: RuntimeConfig, mem: MemoryRef) -> Self {
        let mut registry = TypeRegistry::new();
        for (class, ty) in builtins::builtin_types() {
            if let Err(err) = registry.insert(ty, Some(class)) {
                log::warn!("built-in {} not registered: {}", class, err);
            }
        }
        Self {
            user_data: vec![Handle::Null; config.user_data_slots],
            heap: Heap::new(mem.clone()),
            mem,
            config,
            registry,
            globals: Handle::Null,
            participants: Vec::new(),
            next_participant: 0,
            executor: None,
            depth: 0,
            collecting: false,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryRef {
        &self.mem
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.mem.stats()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    pub fn alloc_object(&self, object: Object) -> Result<Handle, RuntimeError> {
        self.heap.alloc(object).map(Handle::Object)
    }

    pub fn new_string(&self, text: &str) -> Result<Handle, RuntimeError> {
        self.new_string_bytes(text.as_bytes())
    }

    pub fn new_string_bytes(&self, bytes: &[u8]) -> Result<Handle, RuntimeError> {
        let s = ScriptString::from_bytes(self.mem.clone(), bytes)?;
        self.alloc_object(Object::String(s))
    }

    pub fn new_array(&self) -> Result<Handle, RuntimeError> {
        self.alloc_object(Object::Array(Array::new(self.mem.clone())))
    }

    pub fn new_array_with_size(&self, size: usize) -> Result<Handle, RuntimeError> {
        let array = Array::with_size(self.mem.clone(), size)?;
        self.alloc_object(Object::Array(array))
    }

    pub fn new_array_from(&self, items: Vec<Handle>) -> Result<Handle, RuntimeError> {
        let array = Array::from_items(self.mem.clone(), items)?;
        self.alloc_object(Object::Array(array))
    }

    pub fn new_list(&self) -> Result<Handle, RuntimeError> {
        self.alloc_object(Object::List(List::new(self.mem.clone())))
    }

    /// A cursor on the first item of `list`, or null when `list` is not a
    /// list.
    pub fn new_iterator(&self, list: &Handle) -> Result<Handle, RuntimeError> {
        match ListIterator::new(list.clone()) {
            Some(iter) => self.alloc_object(Object::Iterator(iter)),
            None => Ok(Handle::Null),
        }
    }

    pub fn new_table(&self) -> Result<Handle, RuntimeError> {
        self.new_native_table(TableMode::Managed)
    }

    pub fn new_native_table(&self, mode: TableMode) -> Result<Handle, RuntimeError> {
        let table = Table::new(self.mem.clone(), mode)?;
        self.alloc_object(Object::Table(table))
    }

    pub fn new_table_with_destructor(&self, destructor: Destructor) -> Result<Handle, RuntimeError> {
        let table = Table::with_destructor(self.mem.clone(), destructor)?;
        self.alloc_object(Object::Table(table))
    }

    pub fn new_delegate(
        &self,
        name: &str,
        func: impl Fn(&mut CallContext<'_>, &[Handle]) -> Result<(), RuntimeError> + 'static,
    ) -> Result<Handle, RuntimeError> {
        self.new_delegate_bound(name, func, Vec::new())
    }

    pub fn new_delegate_bound(
        &self,
        name: &str,
        func: impl Fn(&mut CallContext<'_>, &[Handle]) -> Result<(), RuntimeError> + 'static,
        bound: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        let func: DelegateFn = Rc::new(func);
        self.alloc_object(Object::Delegate(Delegate::with_bound(name, func, bound)))
    }

    /// Give an instance of a registered native type to a new owning handle.
    pub fn wrap_native(
        &self,
        class: ClassId,
        object: Box<dyn NativeObject>,
    ) -> Result<Handle, RuntimeError> {
        if self.registry.get(class).is_none() {
            return Err(RuntimeError::UnknownType(class.to_string()));
        }
        self.alloc_object(Object::Native(NativeInstance::new(class, object)))
    }

    /// A non-owning handle to an object the host keeps alive.
    pub fn wrap_weak(&self, class: ClassId, target: &HostObject) -> Handle {
        Handle::Weak(WeakHandle::new(class, target))
    }

    /// Copy `handle` and everything reachable from it. Shared children and
    /// cycles are preserved in the copy.
    pub fn copy_deep(&self, handle: &Handle) -> Result<Handle, RuntimeError> {
        DeepCopy::new(self).copy_root(handle)
    }

    pub fn class_name(&self, class: ClassId) -> String {
        self.registry
            .name_of(class)
            .map(str::to_string)
            .or_else(|| class.builtin_name().map(str::to_string))
            .unwrap_or_else(|| class.to_string())
    }

    pub fn type_name(&self, handle: &Handle) -> String {
        self.class_name(handle.class_id())
    }

    // ========================================================================
    // Native types
    // ========================================================================

    /// Register a native type: assign a class id, then send register and
    /// initialize. Either may be unsupported; any other failure undoes the
    /// registration.
    pub fn register_type(&mut self, ty: Box<dyn NativeType>) -> Result<ClassId, RuntimeError> {
        let ty: Rc<dyn NativeType> = Rc::from(ty);
        let class = self.registry.insert(Rc::clone(&ty), None)?;
        let setup = tolerate(ty.register(class)).and_then(|()| tolerate(ty.initialize(self)));
        if let Err(err) = setup {
            log::warn!("registration of {} failed: {}", ty.name(), err);
            self.registry.remove(class);
            return Err(err);
        }
        log::debug!("registered native type {} as {}", ty.name(), class);
        Ok(class)
    }

    /// Send terminate and unregister to one type and forget it.
    pub fn unregister_type(&mut self, class: ClassId) -> Result<(), RuntimeError> {
        if class < ClassId::FIRST_NATIVE {
            return Err(RuntimeError::invalid_argument("built-in types stay registered"));
        }
        let ty = self.native_type(class)?;
        let result = tolerate(ty.terminate(self)).and_then(|()| tolerate(ty.unregister()));
        self.registry.remove(class);
        log::debug!("unregistered native type {}", ty.name());
        result
    }

    /// Send terminate then unregister to every native type, most recently
    /// registered first. Failures are logged and teardown continues.
    pub fn unregister_all(&mut self) {
        for (class, ty) in self.registry.reverse_order() {
            if class < ClassId::FIRST_NATIVE {
                continue;
            }
            let result = tolerate(ty.terminate(self)).and_then(|()| tolerate(ty.unregister()));
            if let Err(err) = result {
                log::warn!("teardown of {} failed: {}", ty.name(), err);
            }
            self.registry.remove(class);
        }
    }

    pub fn class_of(&self, name: &str) -> Option<ClassId> {
        self.registry.class_of(name)
    }

    fn native_type(&self, class: ClassId) -> Result<Rc<dyn NativeType>, RuntimeError> {
        self.registry
            .get(class)
            .ok_or_else(|| RuntimeError::UnknownType(class.to_string()))
    }

    pub fn type_info(&self, class: ClassId) -> Result<TypeInfo, RuntimeError> {
        self.registry
            .type_info(class)
            .ok_or_else(|| RuntimeError::UnknownType(class.to_string()))
    }

    /// Allocate an instance through the type's new-object message.
    pub fn new_object(&mut self, class: ClassId) -> Result<Handle, RuntimeError> {
        let ty = self.native_type(class)?;
        self.enter(|rt| ty.new_object(rt, class))
    }

    pub fn call_static(
        &mut self,
        class: ClassId,
        func: usize,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        let ty = self.native_type(class)?;
        self.enter(|rt| {
            let mut cx = CallContext::new(rt, Handle::Null, args);
            ty.call_static(func, &mut cx)?;
            Ok(cx.into_return())
        })
    }

    /// Call member function `func` of the type of `this`.
    pub fn call_member(
        &mut self,
        this: &Handle,
        func: usize,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        let ty = self.native_type(this.class_id())?;
        self.enter(|rt| {
            let mut cx = CallContext::new(rt, this.clone(), args);
            ty.call_member(func, &mut cx)?;
            Ok(cx.into_return())
        })
    }

    /// Call a member function by name.
    pub fn call_method(
        &mut self,
        this: &Handle,
        name: &str,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        let class = this.class_id();
        let func = self
            .native_type(class)?
            .member_index(name)
            .ok_or_else(|| RuntimeError::unsupported(format!("{}.{}", self.class_name(class), name)))?;
        self.call_member(this, func, args)
    }

    pub fn call_static_by_name(
        &mut self,
        class: ClassId,
        name: &str,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        let func = self
            .native_type(class)?
            .static_index(name)
            .ok_or_else(|| RuntimeError::unsupported(format!("{}::{}", self.class_name(class), name)))?;
        self.call_static(class, func, args)
    }

    /// Message-level entry point, the typed trait methods behind one
    /// dispatch.
    pub fn send_message(&mut self, class: ClassId, message: Message) -> Result<Reply, RuntimeError> {
        let ty = self.native_type(class)?;
        match message {
            Message::GetName => Ok(Reply::Text(ty.name().to_string())),
            Message::GetDeclaration => ty.declaration().map(Reply::Text),
            Message::GetVersion => ty.version().map(Reply::Text),
            Message::GetAuthor => ty.author().map(Reply::Text),
            Message::GetBaseName => ty.base_name().map(Reply::Text),
            Message::Register => ty.register(class).map(|()| Reply::Done),
            Message::Initialize => ty.initialize(self).map(|()| Reply::Done),
            Message::NewObject => self.new_object(class).map(Reply::Handle),
            Message::CopyObject(object) => self.copy_deep(&object).map(Reply::Handle),
            Message::MarkChildren(object) => {
                let mut marker = Marker::new();
                match &object {
                    Handle::Object(gc) => gc.try_borrow()?.trace(&mut marker)?,
                    other => return Err(RuntimeError::invalid_argument(format!(
                        "mark-children on {}",
                        self.type_name(other)
                    ))),
                }
                Ok(Reply::Marked(marker.len()))
            }
            Message::CallStatic { func, args } => self.call_static(class, func, args).map(Reply::Handle),
            Message::CallMember { func, this, args } => {
                self.call_member(&this, func, args).map(Reply::Handle)
            }
            Message::Terminate => ty.terminate(self).map(|()| Reply::Done),
            Message::Unregister => ty.unregister().map(|()| Reply::Done),
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    pub fn set_executor(&mut self, executor: Rc<dyn Executor>) {
        self.executor = Some(executor);
    }

    pub fn is_executing(&self) -> bool {
        self.depth > 0
    }

    fn enter<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Run a callable: built-in delegates directly, anything else through
    /// the installed executor.
    pub fn execute_function(
        &mut self,
        function: &Handle,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        if let Some((func, bound)) = function.with_delegate(|d| (d.func(), d.bound().to_vec())) {
            return self.enter(|rt| {
                let mut cx = CallContext::new(rt, function.clone(), args);
                func(&mut cx, &bound)?;
                Ok(cx.into_return())
            });
        }
        match self.executor.clone() {
            Some(executor) => self.enter(|rt| executor.execute(rt, function, args)),
            None => Err(RuntimeError::unsupported(format!(
                "execute {}",
                self.type_name(function)
            ))),
        }
    }

    fn compare_with(
        &mut self,
        compare: &Handle,
        a: &Handle,
        b: &Handle,
    ) -> Result<i32, RuntimeError> {
        if compare.is_null() {
            return Ok(a.default_compare(b));
        }
        let result = self.execute_function(compare, vec![a.clone(), b.clone()])?;
        Ok(result.to_int().clamp(-1, 1) as i32)
    }

    // ========================================================================
    // Roots and collection
    // ========================================================================

    /// The managed table holding named globals, created on first use.
    pub fn globals(&mut self) -> Result<Handle, RuntimeError> {
        if self.globals.is_null() {
            self.globals = self.new_table()?;
        }
        Ok(self.globals.clone())
    }

    pub fn set_global(&mut self, name: &str, value: Handle) -> Result<(), RuntimeError> {
        let globals = self.globals()?;
        this_or_invalid(globals.with_table_mut(|t| t.set(name.as_bytes(), value)), "table")?
    }

    pub fn global(&self, name: &str) -> Handle {
        self.globals
            .with_table(|t| t.get(name.as_bytes()))
            .unwrap_or_default()
    }

    pub fn user_data_slots(&self) -> usize {
        self.user_data.len()
    }

    pub fn user_data(&self, slot: usize) -> Handle {
        self.user_data.get(slot).cloned().unwrap_or_default()
    }

    pub fn set_user_data(&mut self, slot: usize, value: Handle) -> Result<(), RuntimeError> {
        let count = self.user_data.len();
        let entry = self.user_data.get_mut(slot).ok_or_else(|| {
            RuntimeError::invalid_argument(format!("user data slot {} of {}", slot, count))
        })?;
        *entry = value;
        Ok(())
    }

    pub fn add_participant(&mut self, participant: Rc<dyn GcParticipant>) -> ParticipantId {
        let id = ParticipantId(self.next_participant);
        self.next_participant += 1;
        self.participants.push((id, participant));
        id
    }

    pub fn remove_participant(&mut self, id: ParticipantId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|(pid, _)| *pid != id);
        self.participants.len() != before
    }

    /// Run one mark-and-sweep pass.
    ///
    /// Fails with `Locked` while a function is executing or a collection is
    /// already running, and with `MarkFailed` (releasing nothing) when an
    /// object cannot mark its children.
    pub fn collect(&mut self) -> Result<GcReport, RuntimeError> {
        if self.depth > 0 || self.collecting {
            return Err(RuntimeError::Locked);
        }
        self.collecting = true;
        let (globals, user_data, participants) = (&self.globals, &self.user_data, &self.participants);
        let result = self.heap.collect(|marker| {
            marker.mark(globals);
            marker.mark_all(user_data);
            for (_, participant) in participants {
                participant.mark(marker)?;
            }
            Ok(())
        });
        self.collecting = false;
        result.map_err(|err| match err {
            RuntimeError::MarkFailed { type_name, code } => RuntimeError::MarkFailed {
                type_name: self.name_for_display(&type_name),
                code,
            },
            other => other,
        })
    }

    fn name_for_display(&self, class_text: &str) -> String {
        class_text
            .strip_prefix("class#")
            .and_then(|id| id.parse().ok())
            .map(|id| self.class_name(ClassId(id)))
            .unwrap_or_else(|| class_text.to_string())
    }

    // ========================================================================
    // Container operations that call back into the runtime
    // ========================================================================

    /// Sort `array` in place with a delegate comparator (null for the
    /// default ordering). The elements are taken out of the array while the
    /// comparator runs.
    pub fn array_sort(&mut self, array: &Handle, compare: &Handle) -> Result<(), RuntimeError> {
        let mut items = this_or_invalid(array.with_array_mut(Array::take_items), "array")?;
        let result = insertion_sort(&mut items, |a, b| self.compare_with(compare, a, b));
        array.with_array_mut(|a| a.restore_items(items));
        result
    }

    /// Append by value: deep copies, with arrays spliced element-wise.
    pub fn array_append_copy(&mut self, array: &Handle, value: &Handle) -> Result<(), RuntimeError> {
        let copy = self.copy_deep(value)?;
        this_or_invalid(array.with_array_mut(|a| a.push(copy)), "array")?
    }

    pub fn array_enumerate(&mut self, array: &Handle, visit: &Handle) -> Result<(), RuntimeError> {
        let items = this_or_invalid(array.with_array(|a| a.as_slice().to_vec()), "array")?;
        for (i, item) in items.into_iter().enumerate() {
            self.execute_function(visit, vec![Handle::Int(i as i64), item])?;
        }
        Ok(())
    }

    /// Stable insertion sort of `list` by `order`, comparing fields with a
    /// delegate comparator (null for the default ordering). A comparator
    /// error aborts the sort and leaves the list in its previous order.
    pub fn list_sort(
        &mut self,
        list: &Handle,
        order: SortOrder,
        compare: &Handle,
    ) -> Result<(), RuntimeError> {
        let mut entries = this_or_invalid(list.with_list(List::sort_entries), "list")?;
        insertion_sort(&mut entries, |a, b| {
            order.compare(a, b, |x, y| self.compare_with(compare, x, y))
        })?;
        let ids: Vec<usize> = entries.iter().map(|entry| entry.id).collect();
        this_or_invalid(list.with_list_mut(|l| l.apply_order(&ids)), "list")
    }

    pub fn list_enumerate(&mut self, list: &Handle, visit: &Handle) -> Result<(), RuntimeError> {
        let pairs = this_or_invalid(list.with_list(List::pairs), "list")?;
        for (key, value) in pairs {
            self.execute_function(visit, vec![key, value])?;
        }
        Ok(())
    }

    pub fn table_enumerate(&mut self, table: &Handle, visit: &Handle) -> Result<(), RuntimeError> {
        let pairs = table.with_table(|t| {
            t.require(TableMode::Managed, "enumerate").map(|()| t.pairs())
        });
        let pairs = this_or_invalid(pairs, "table")??;
        for (key, value) in pairs {
            let key = self.new_string_bytes(&key)?;
            self.execute_function(visit, vec![key, value])?;
        }
        Ok(())
    }

    /// Merge two managed tables. `merge` is called once per key of either
    /// input, left keys first, with the key and both tables; a null result
    /// leaves the key out of the new table.
    pub fn table_merge(
        &mut self,
        left: &Handle,
        right: &Handle,
        merge: &Handle,
    ) -> Result<Handle, RuntimeError> {
        let keys = left
            .with_table(|l| {
                right.with_table(|r| {
                    l.require(TableMode::Managed, "merge")?;
                    r.require(TableMode::Managed, "merge")?;
                    Ok::<_, RuntimeError>(Table::merge_keys(l, r))
                })
            })
            .flatten();
        let keys = this_or_invalid(keys, "table")??;

        let out = self.new_table()?;
        for key in keys {
            let key_handle = self.new_string_bytes(&key)?;
            let value =
                self.execute_function(merge, vec![key_handle, left.clone(), right.clone()])?;
            this_or_invalid(out.with_table_mut(|t| t.set(&key, value)), "table")??;
        }
        Ok(out)
    }

    /// Values of a managed table in enumeration order.
    pub fn table_to_array(&self, table: &Handle) -> Result<Handle, RuntimeError> {
        let values = table.with_table(|t| {
            t.require(TableMode::Managed, "toArray").map(|()| t.values())
        });
        self.new_array_from(this_or_invalid(values, "table")??)
    }

    /// Key/value pairs of a managed table as a list with string keys.
    pub fn table_to_list(&self, table: &Handle) -> Result<Handle, RuntimeError> {
        let pairs = table.with_table(|t| {
            t.require(TableMode::Managed, "toList").map(|()| t.pairs())
        });
        let pairs = this_or_invalid(pairs, "table")??;
        let list = self.new_list()?;
        for (key, value) in pairs {
            let key = self.new_string_bytes(&key)?;
            this_or_invalid(list.with_list_mut(|l| l.add(key, value)), "list")??;
        }
        Ok(list)
    }

    /// Table lookup with a handle key (string, or number as decimal text).
    pub fn table_get(&self, table: &Handle, key: &Handle) -> Handle {
        key_bytes(key)
            .and_then(|key| table.with_table(|t| t.get(&key)))
            .unwrap_or_default()
    }

    pub fn table_set(&self, table: &Handle, key: &Handle, value: Handle) -> Result<(), RuntimeError> {
        let key = key_bytes(key).ok_or_else(|| RuntimeError::invalid_argument("table key"))?;
        this_or_invalid(table.with_table_mut(|t| t.set(&key, value)), "table")?
    }
}

/// Optional protocol messages: `Unsupported` counts as success.
fn tolerate(result: Result<(), RuntimeError>) -> Result<(), RuntimeError> {
    match result {
        Err(err) if err.is_unsupported() => Ok(()),
        other => other,
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.unregister_all();
        self.globals = Handle::Null;
        self.user_data.clear();
        self.participants.clear();
        self.executor = None;
        if self.config.collect_on_drop {
            if let Err(err) = self.collect() {
                log::warn!("final collection failed: {}", err);
            }
        }
        self.registry.clear();
    }
}
