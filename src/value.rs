//! Handle representation
//!
//! The universal boxed value every script-visible value lives in, and the
//! closed set of heap object kinds a handle can own.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::RuntimeError;
use crate::gc::{Gc, Marker};
use crate::native::NativeObject;
use crate::runtime::builtins::array::Array;
use crate::runtime::builtins::delegate::Delegate;
use crate::runtime::builtins::list::{List, ListIterator};
use crate::runtime::builtins::string::ScriptString;
use crate::runtime::builtins::table::Table;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Cloning a [`Handle`] is the add-reference operation: it never copies the
/// object behind it. `cheap_clone` spells that out at call sites.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

// ============================================================================
// ClassId
// ============================================================================

/// Type identifier carried by every handle.
///
/// Ids below [`ClassId::FIRST_NATIVE`] are fixed for the built-in types;
/// registered native types receive ids from `FIRST_NATIVE` upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const NULL: ClassId = ClassId(0);
    pub const INT: ClassId = ClassId(1);
    pub const FLOAT: ClassId = ClassId(2);
    pub const STRING: ClassId = ClassId(3);
    pub const ARRAY: ClassId = ClassId(4);
    pub const LIST: ClassId = ClassId(5);
    pub const ITERATOR: ClassId = ClassId(6);
    pub const TABLE: ClassId = ClassId(7);
    pub const DELEGATE: ClassId = ClassId(8);
    pub const FIRST_NATIVE: ClassId = ClassId(16);

    /// Name of a built-in class, `None` for registered native types.
    pub fn builtin_name(self) -> Option<&'static str> {
        let name = match self {
            ClassId::NULL => "null",
            ClassId::INT => "int",
            ClassId::FLOAT => "float",
            ClassId::STRING => "string",
            ClassId::ARRAY => "array",
            ClassId::LIST => "list",
            ClassId::ITERATOR => "iterator",
            ClassId::TABLE => "table",
            ClassId::DELEGATE => "delegate",
            _ => return None,
        };
        Some(name)
    }

    /// Value types keep their scalar inline and have no backing object.
    pub fn is_value_type(self) -> bool {
        matches!(self, ClassId::NULL | ClassId::INT | ClassId::FLOAT)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.builtin_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "class#{}", self.0),
        }
    }
}

// ============================================================================
// Object - the closed set of heap object kinds
// ============================================================================

/// A heap object owned by exactly one [`Gc`] cell.
pub enum Object {
    String(ScriptString),
    Array(Array),
    List(List),
    Iterator(ListIterator),
    Table(Table),
    Delegate(Delegate),
    Native(NativeInstance),
    /// Contents were released by the collector; the cell waits for its last
    /// outside reference to go away.
    Collected,
}

impl Object {
    pub fn class_id(&self) -> ClassId {
        match self {
            Object::String(_) => ClassId::STRING,
            Object::Array(_) => ClassId::ARRAY,
            Object::List(_) => ClassId::LIST,
            Object::Iterator(_) => ClassId::ITERATOR,
            Object::Table(_) => ClassId::TABLE,
            Object::Delegate(_) => ClassId::DELEGATE,
            Object::Native(native) => native.class,
            Object::Collected => ClassId::NULL,
        }
    }

    /// Mark every handle this object owns.
    pub(crate) fn trace(&self, marker: &mut Marker) -> Result<(), RuntimeError> {
        match self {
            Object::String(_) | Object::Collected => Ok(()),
            Object::Array(array) => {
                array.trace(marker);
                Ok(())
            }
            Object::List(list) => {
                list.trace(marker);
                Ok(())
            }
            Object::Iterator(iter) => {
                iter.trace(marker);
                Ok(())
            }
            Object::Table(table) => {
                table.trace(marker);
                Ok(())
            }
            Object::Delegate(delegate) => {
                delegate.trace(marker);
                Ok(())
            }
            Object::Native(native) => native.object.mark(marker),
        }
    }
}

/// An owned native instance together with the class it was created for.
pub struct NativeInstance {
    pub(crate) class: ClassId,
    pub(crate) object: Box<dyn NativeObject>,
}

impl NativeInstance {
    pub fn new(class: ClassId, object: Box<dyn NativeObject>) -> Self {
        Self { class, object }
    }

    pub fn class_id(&self) -> ClassId {
        self.class
    }

    pub fn object(&self) -> &dyn NativeObject {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> &mut dyn NativeObject {
        self.object.as_mut()
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        self.object.destroy();
    }
}

// ============================================================================
// Weak handles
// ============================================================================

/// A native object whose lifetime the host controls.
pub type HostObject = Rc<RefCell<dyn NativeObject>>;

/// Non-owning reference to a [`HostObject`].
///
/// The host dropping its `Rc` is the teardown signal; afterwards every access
/// fails with `DeadReference` instead of touching freed memory.
#[derive(Clone)]
pub struct WeakHandle {
    class: ClassId,
    target: Weak<RefCell<dyn NativeObject>>,
}

impl WeakHandle {
    pub fn new(class: ClassId, target: &HostObject) -> Self {
        Self {
            class,
            target: Rc::downgrade(target),
        }
    }

    pub fn class_id(&self) -> ClassId {
        self.class
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    pub fn upgrade(&self) -> Result<HostObject, RuntimeError> {
        self.target.upgrade().ok_or_else(|| {
            log::warn!("access through dead weak handle of {}", self.class);
            RuntimeError::dead_reference(self.class.to_string())
        })
    }

    pub fn ptr_eq(a: &WeakHandle, b: &WeakHandle) -> bool {
        Weak::ptr_eq(&a.target, &b.target)
    }
}

// ============================================================================
// Handle
// ============================================================================

/// The universal boxed value.
///
/// Scalars live inline; reference types point at a heap cell. Cloning a
/// handle adds a reference, dropping it releases one. When the last reference
/// to a cell goes away the object is destroyed, which in turn releases every
/// handle it owns.
#[derive(Clone, Default)]
pub enum Handle {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Object(Gc),
    Weak(WeakHandle),
}

impl CheapClone for Handle {}

macro_rules! object_accessors {
    ($($variant:ident: $ty:ty => $with:ident, $with_mut:ident;)*) => {
        $(
            /// Borrow the object if this handle owns one of this kind.
            /// Returns `None` on a type mismatch or if the object is already
            /// mutably borrowed.
            pub fn $with<R>(&self, f: impl FnOnce(&$ty) -> R) -> Option<R> {
                let Handle::Object(gc) = self else {
                    return None;
                };
                let obj = gc.try_borrow().ok()?;
                match &*obj {
                    Object::$variant(inner) => Some(f(inner)),
                    _ => None,
                }
            }

            /// Mutably borrow the object if this handle owns one of this kind.
            pub fn $with_mut<R>(&self, f: impl FnOnce(&mut $ty) -> R) -> Option<R> {
                let Handle::Object(gc) = self else {
                    return None;
                };
                let mut obj = gc.try_borrow_mut().ok()?;
                match &mut *obj {
                    Object::$variant(inner) => Some(f(inner)),
                    _ => None,
                }
            }
        )*
    };
}

impl Handle {
    pub fn null() -> Self {
        Handle::Null
    }

    pub fn int(value: i64) -> Self {
        Handle::Int(value)
    }

    pub fn float(value: f64) -> Self {
        Handle::Float(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Handle::Null)
    }

    pub fn is_weak(&self) -> bool {
        matches!(self, Handle::Weak(_))
    }

    pub fn class_id(&self) -> ClassId {
        match self {
            Handle::Null => ClassId::NULL,
            Handle::Int(_) => ClassId::INT,
            Handle::Float(_) => ClassId::FLOAT,
            Handle::Object(gc) => gc.class_id(),
            Handle::Weak(weak) => weak.class_id(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Handle::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Handle::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric conversion used by typed argument pulls. Non-numbers read as 0.
    pub fn to_int(&self) -> i64 {
        match self {
            Handle::Int(v) => *v,
            Handle::Float(v) => *v as i64,
            _ => 0,
        }
    }

    pub fn to_float(&self) -> f64 {
        match self {
            Handle::Int(v) => *v as f64,
            Handle::Float(v) => *v,
            _ => 0.0,
        }
    }

    pub fn as_gc(&self) -> Option<&Gc> {
        match self {
            Handle::Object(gc) => Some(gc),
            _ => None,
        }
    }

    /// Number of references to the backing object. Scalars and null have
    /// no shared backing object and report 0.
    pub fn ref_count(&self) -> usize {
        match self {
            Handle::Object(gc) => gc.ref_count(),
            _ => 0,
        }
    }

    /// Assignment semantics: copies a scalar, shares a reference type.
    pub fn copy_value(&self) -> Handle {
        self.cheap_clone()
    }

    /// Identity comparison: scalars by value, everything else by identity.
    pub fn identical(&self, other: &Handle) -> bool {
        match (self, other) {
            (Handle::Null, Handle::Null) => true,
            (Handle::Int(a), Handle::Int(b)) => a == b,
            (Handle::Float(a), Handle::Float(b)) => a == b,
            (Handle::Object(a), Handle::Object(b)) => Gc::ptr_eq(a, b),
            (Handle::Weak(a), Handle::Weak(b)) => WeakHandle::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Identity of the referenced object; false for scalars.
    pub fn same_object(&self, other: &Handle) -> bool {
        match (self, other) {
            (Handle::Object(a), Handle::Object(b)) => Gc::ptr_eq(a, b),
            (Handle::Weak(a), Handle::Weak(b)) => WeakHandle::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Key comparison for associative containers: like [`Handle::identical`]
    /// but strings compare by content.
    pub fn key_equals(&self, other: &Handle) -> bool {
        if self.identical(other) {
            return true;
        }
        let Some(mine) = self.with_string(|s| s.as_bytes().to_vec()) else {
            return false;
        };
        other
            .with_string(|s| s.as_bytes() == mine.as_slice())
            .unwrap_or(false)
    }

    /// Three-way comparison used when no comparator is supplied: numbers by
    /// value, strings by bytes, anything else by class id.
    pub fn default_compare(&self, other: &Handle) -> i32 {
        use std::cmp::Ordering;
        let ordering = match (self, other) {
            (Handle::Int(a), Handle::Int(b)) => a.cmp(b),
            (Handle::Int(_) | Handle::Float(_), Handle::Int(_) | Handle::Float(_)) => self
                .to_float()
                .partial_cmp(&other.to_float())
                .unwrap_or(Ordering::Equal),
            _ => {
                let strings = self.with_string(|a| {
                    other
                        .with_string(|b| a.as_bytes().cmp(b.as_bytes()))
                        .unwrap_or(Ordering::Greater)
                });
                strings.unwrap_or_else(|| self.class_id().cmp(&other.class_id()))
            }
        };
        ordering as i32
    }

    /// String content of a string handle, decoded lossily.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.with_string(|s| s.to_string_lossy())
    }

    object_accessors! {
        String: ScriptString => with_string, with_string_mut;
        Array: Array => with_array, with_array_mut;
        Iterator: ListIterator => with_iterator, with_iterator_mut;
        Table: Table => with_table, with_table_mut;
        Delegate: Delegate => with_delegate, with_delegate_mut;
    }

    pub fn with_list<R>(&self, f: impl FnOnce(&List) -> R) -> Option<R> {
        let Handle::Object(gc) = self else {
            return None;
        };
        let obj = gc.try_borrow().ok()?;
        match &*obj {
            Object::List(list) => Some(f(list)),
            _ => None,
        }
    }

    /// Mutably borrow a list. Handles the list gives up inside `f` are
    /// dropped after the borrow ends, so their destructors may use the list.
    pub fn with_list_mut<R>(&self, f: impl FnOnce(&mut List) -> R) -> Option<R> {
        let Handle::Object(gc) = self else {
            return None;
        };
        let (result, released) = {
            let mut obj = gc.try_borrow_mut().ok()?;
            let Object::List(list) = &mut *obj else {
                return None;
            };
            let result = f(list);
            (result, list.settle())
        };
        drop(released);
        Some(result)
    }

    /// Run `f` on the native object behind an owned or weak handle,
    /// downcast to `T`.
    pub fn with_native<T: NativeObject, R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, RuntimeError> {
        match self {
            Handle::Object(gc) => {
                let mut obj = gc.try_borrow_mut()?;
                let Object::Native(native) = &mut *obj else {
                    return Err(RuntimeError::invalid_argument("not a native object"));
                };
                let inner = native
                    .object_mut()
                    .as_any_mut()
                    .downcast_mut::<T>()
                    .ok_or_else(|| RuntimeError::invalid_argument("native type mismatch"))?;
                Ok(f(inner))
            }
            Handle::Weak(weak) => {
                let host = weak.upgrade()?;
                let mut obj = host.try_borrow_mut().map_err(|_| RuntimeError::Borrowed)?;
                let inner = (*obj)
                    .as_any_mut()
                    .downcast_mut::<T>()
                    .ok_or_else(|| RuntimeError::invalid_argument("native type mismatch"))?;
                Ok(f(inner))
            }
            _ => Err(RuntimeError::invalid_argument("not a native object")),
        }
    }
}

impl From<i64> for Handle {
    fn from(value: i64) -> Self {
        Handle::Int(value)
    }
}

impl From<f64> for Handle {
    fn from(value: f64) -> Self {
        Handle::Float(value)
    }
}

impl From<Gc> for Handle {
    fn from(gc: Gc) -> Self {
        Handle::Object(gc)
    }
}

/// Handles compare by identity, see [`Handle::identical`].
impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Null => write!(f, "null"),
            Handle::Int(v) => write!(f, "{}", v),
            Handle::Float(v) => write!(f, "{:?}", v),
            Handle::Object(gc) => {
                if let Some(text) = self.to_string_lossy() {
                    write!(f, "{:?}", text)
                } else {
                    write!(f, "<{} #{}>", gc.class_id(), gc.id())
                }
            }
            Handle::Weak(weak) => {
                let state = if weak.is_alive() { "alive" } else { "dead" };
                write!(f, "<weak {} {}>", weak.class_id(), state)
            }
        }
    }
}
