//! Native extension protocol
//!
//! A native type is a [`NativeType`] (the per-type dispatch routine) plus the
//! [`NativeObject`]s it creates. The runtime talks to both through the fixed
//! message set in [`Message`]; trait methods are the typed form of those
//! messages and optional ones default to `Unsupported`, which every caller
//! tolerates.

use std::any::Any;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::gc::Marker;
use crate::prelude::{FxHashMap, IndexMap, index_map_new};
use crate::runtime::Runtime;
use crate::runtime::copy::DeepCopy;
use crate::value::{ClassId, Handle};

/// Downcasting support for trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One instance of a native type.
pub trait NativeObject: AsAny {
    /// Report every owned handle to the collector. Required: an object that
    /// cannot say what it owns would make every collection unsafe.
    fn mark(&self, marker: &mut Marker) -> Result<(), RuntimeError>;

    /// Deep copy. Child handles go through `cx` so shared children and
    /// cycles are copied once.
    fn copy(&self, cx: &mut DeepCopy<'_>) -> Result<Box<dyn NativeObject>, RuntimeError> {
        let _ = cx;
        Err(RuntimeError::cannot_copy(std::any::type_name::<Self>()))
    }

    /// Called exactly once, when the owning handle releases the instance.
    fn destroy(&mut self) {}
}

/// The dispatch routine of a native type.
pub trait NativeType {
    /// Registration key and script-visible type name.
    fn name(&self) -> &str;

    fn declaration(&self) -> Result<String, RuntimeError> {
        Err(RuntimeError::unsupported("get-declaration"))
    }

    fn version(&self) -> Result<String, RuntimeError> {
        Err(RuntimeError::unsupported("get-version"))
    }

    fn author(&self) -> Result<String, RuntimeError> {
        Err(RuntimeError::unsupported("get-author"))
    }

    fn base_name(&self) -> Result<String, RuntimeError> {
        Err(RuntimeError::unsupported("get-base-name"))
    }

    /// The type was assigned `class`.
    fn register(&self, class: ClassId) -> Result<(), RuntimeError> {
        let _ = class;
        Err(RuntimeError::unsupported("register"))
    }

    fn initialize(&self, rt: &mut Runtime) -> Result<(), RuntimeError> {
        let _ = rt;
        Err(RuntimeError::unsupported("initialize"))
    }

    /// Allocate an instance, usually through [`Runtime::wrap_native`].
    fn new_object(&self, rt: &mut Runtime, class: ClassId) -> Result<Handle, RuntimeError> {
        let _ = (rt, class);
        Err(RuntimeError::unsupported("new-object"))
    }

    fn call_static(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let _ = (func, cx);
        Err(RuntimeError::unsupported("call-static"))
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let _ = (func, cx);
        Err(RuntimeError::unsupported("call-member"))
    }

    /// Resolve a member function name to the index `call_member` expects.
    fn member_index(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }

    fn static_index(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }

    fn terminate(&self, rt: &mut Runtime) -> Result<(), RuntimeError> {
        let _ = rt;
        Err(RuntimeError::unsupported("terminate"))
    }

    fn unregister(&self) -> Result<(), RuntimeError> {
        Err(RuntimeError::unsupported("unregister"))
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Wire numbering of the protocol messages.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    GetName = 1,
    GetDeclaration = 2,
    GetVersion = 3,
    GetAuthor = 4,
    GetBaseName = 5,
    Register = 6,
    Initialize = 7,
    NewObject = 8,
    DestroyObject = 9,
    CopyObject = 10,
    MarkChildren = 11,
    CallStatic = 12,
    CallMember = 13,
    Terminate = 14,
    Unregister = 15,
}

impl MessageCode {
    pub fn from_code(code: i32) -> Option<MessageCode> {
        let msg = match code {
            1 => MessageCode::GetName,
            2 => MessageCode::GetDeclaration,
            3 => MessageCode::GetVersion,
            4 => MessageCode::GetAuthor,
            5 => MessageCode::GetBaseName,
            6 => MessageCode::Register,
            7 => MessageCode::Initialize,
            8 => MessageCode::NewObject,
            9 => MessageCode::DestroyObject,
            10 => MessageCode::CopyObject,
            11 => MessageCode::MarkChildren,
            12 => MessageCode::CallStatic,
            13 => MessageCode::CallMember,
            14 => MessageCode::Terminate,
            15 => MessageCode::Unregister,
            _ => return None,
        };
        Some(msg)
    }
}

/// A protocol message addressed to a registered type.
///
/// Instance destruction has a wire code but no variant: it is driven by the
/// last handle going away, never sent.
#[derive(Debug, Clone)]
pub enum Message {
    GetName,
    GetDeclaration,
    GetVersion,
    GetAuthor,
    GetBaseName,
    Register,
    Initialize,
    NewObject,
    CopyObject(Handle),
    MarkChildren(Handle),
    CallStatic { func: usize, args: Vec<Handle> },
    CallMember { func: usize, this: Handle, args: Vec<Handle> },
    Terminate,
    Unregister,
}

impl Message {
    pub fn code(&self) -> MessageCode {
        match self {
            Message::GetName => MessageCode::GetName,
            Message::GetDeclaration => MessageCode::GetDeclaration,
            Message::GetVersion => MessageCode::GetVersion,
            Message::GetAuthor => MessageCode::GetAuthor,
            Message::GetBaseName => MessageCode::GetBaseName,
            Message::Register => MessageCode::Register,
            Message::Initialize => MessageCode::Initialize,
            Message::NewObject => MessageCode::NewObject,
            Message::CopyObject(_) => MessageCode::CopyObject,
            Message::MarkChildren(_) => MessageCode::MarkChildren,
            Message::CallStatic { .. } => MessageCode::CallStatic,
            Message::CallMember { .. } => MessageCode::CallMember,
            Message::Terminate => MessageCode::Terminate,
            Message::Unregister => MessageCode::Unregister,
        }
    }
}

/// Answer to a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Text(String),
    Handle(Handle),
    /// Number of children reported by mark-children
    Marked(usize),
}

// ============================================================================
// CallContext - argument marshaling
// ============================================================================

/// Arguments and return slot of one native call.
///
/// Pulls are positional and forgiving: a missing or wrongly typed argument
/// reads as 0, 0.0, `None` or null.
pub struct CallContext<'rt> {
    rt: &'rt mut Runtime,
    this: Handle,
    args: Vec<Handle>,
    ret: Handle,
}

impl<'rt> CallContext<'rt> {
    pub fn new(rt: &'rt mut Runtime, this: Handle, args: Vec<Handle>) -> Self {
        Self {
            rt,
            this,
            args,
            ret: Handle::Null,
        }
    }

    pub fn runtime(&mut self) -> &mut Runtime {
        self.rt
    }

    pub fn this(&self) -> &Handle {
        &self.this
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, index: usize) -> Option<&Handle> {
        self.args.get(index)
    }

    /// An owned reference to an argument.
    pub fn arg_handle(&self, index: usize) -> Handle {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn arg_int(&self, index: usize) -> i64 {
        self.args.get(index).map_or(0, Handle::to_int)
    }

    pub fn arg_float(&self, index: usize) -> f64 {
        self.args.get(index).map_or(0.0, Handle::to_float)
    }

    pub fn arg_str(&self, index: usize) -> Option<String> {
        self.args.get(index)?.to_string_lossy()
    }

    pub fn arg_bytes(&self, index: usize) -> Option<Vec<u8>> {
        self.args.get(index)?.with_string(|s| s.as_bytes().to_vec())
    }

    /// Snapshot of an array argument's elements.
    pub fn arg_array(&self, index: usize) -> Option<Vec<Handle>> {
        self.args.get(index)?.with_array(|a| a.as_slice().to_vec())
    }

    /// Run `f` on the native object behind `this`, downcast to `T`.
    pub fn with_this<T: NativeObject, R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, RuntimeError> {
        self.this.with_native(f)
    }

    pub fn with_arg<T: NativeObject, R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, RuntimeError> {
        self.args
            .get(index)
            .ok_or_else(|| RuntimeError::invalid_argument(format!("missing argument {}", index)))?
            .with_native(f)
    }

    pub fn return_null(&mut self) {
        self.ret = Handle::Null;
    }

    pub fn return_int(&mut self, value: i64) {
        self.ret = Handle::Int(value);
    }

    pub fn return_float(&mut self, value: f64) {
        self.ret = Handle::Float(value);
    }

    pub fn return_bool(&mut self, value: bool) {
        self.ret = Handle::Int(i64::from(value));
    }

    pub fn return_str(&mut self, value: &str) -> Result<(), RuntimeError> {
        self.ret = self.rt.new_string(value)?;
        Ok(())
    }

    /// Set the return value, taking over the caller's reference.
    pub fn set_return(&mut self, value: Handle) {
        self.ret = value;
    }

    pub fn return_value(&self) -> &Handle {
        &self.ret
    }

    pub fn into_return(self) -> Handle {
        self.ret
    }
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// Metadata of a registered type, missing entries filled with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub class: ClassId,
    pub name: String,
    pub declaration: String,
    pub version: String,
    pub author: String,
    pub base_name: Option<String>,
}

pub(crate) struct RegisteredType {
    pub(crate) class: ClassId,
    pub(crate) ty: Rc<dyn NativeType>,
}

/// Types known to one runtime, in registration order.
pub struct TypeRegistry {
    types: IndexMap<String, RegisteredType>,
    by_class: FxHashMap<ClassId, String>,
    next_class: u32,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: index_map_new(),
            by_class: FxHashMap::default(),
            next_class: ClassId::FIRST_NATIVE.0,
        }
    }

    /// Insert a type under a fresh class id (or `fixed` for built-ins).
    pub(crate) fn insert(
        &mut self,
        ty: Rc<dyn NativeType>,
        fixed: Option<ClassId>,
    ) -> Result<ClassId, RuntimeError> {
        let name = ty.name().to_string();
        if self.types.contains_key(&name) {
            return Err(RuntimeError::DuplicateType(name));
        }
        let class = match fixed {
            Some(class) => class,
            None => {
                let class = ClassId(self.next_class);
                self.next_class += 1;
                class
            }
        };
        if self.by_class.contains_key(&class) {
            return Err(RuntimeError::DuplicateType(name));
        }
        self.by_class.insert(class, name.clone());
        self.types.insert(name, RegisteredType { class, ty });
        Ok(class)
    }

    /// Forget a type. Its class id is not reused.
    pub(crate) fn remove(&mut self, class: ClassId) -> Option<Rc<dyn NativeType>> {
        let name = self.by_class.remove(&class)?;
        self.types.shift_remove(&name).map(|entry| entry.ty)
    }

    pub fn class_of(&self, name: &str) -> Option<ClassId> {
        self.types.get(name).map(|entry| entry.class)
    }

    pub fn get(&self, class: ClassId) -> Option<Rc<dyn NativeType>> {
        let name = self.by_class.get(&class)?;
        self.types.get(name).map(|entry| Rc::clone(&entry.ty))
    }

    pub fn name_of(&self, class: ClassId) -> Option<&str> {
        self.by_class.get(&class).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered types, most recent first.
    pub(crate) fn reverse_order(&self) -> Vec<(ClassId, Rc<dyn NativeType>)> {
        self.types
            .values()
            .rev()
            .map(|entry| (entry.class, Rc::clone(&entry.ty)))
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.types.clear();
        self.by_class.clear();
    }

    pub fn type_info(&self, class: ClassId) -> Option<TypeInfo> {
        let ty = self.get(class)?;
        Some(TypeInfo {
            class,
            name: ty.name().to_string(),
            declaration: ty.declaration().unwrap_or_default(),
            version: ty.version().unwrap_or_else(|_| "0".to_string()),
            author: ty.author().unwrap_or_default(),
            base_name: ty.base_name().ok(),
        })
    }
}
