//! Built-in object types
//!
//! Each built-in is both a plain Rust container and a [`NativeType`]
//! registered under a fixed [`ClassId`], so scripts reach it through the same
//! member-call protocol as any native extension.

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::native::{CallContext, NativeType};
use crate::value::{ClassId, Object};

pub mod array;
pub mod delegate;
pub mod list;
pub mod string;
pub mod table;

/// Built-in types with their fixed class ids, in registration order.
pub(crate) fn builtin_types() -> Vec<(ClassId, Rc<dyn NativeType>)> {
    vec![
        (ClassId::STRING, Rc::new(string::StringType)),
        (ClassId::ARRAY, Rc::new(array::ArrayType)),
        (ClassId::LIST, Rc::new(list::ListType)),
        (ClassId::ITERATOR, Rc::new(list::IteratorType)),
        (ClassId::TABLE, Rc::new(table::TableType)),
        (ClassId::DELEGATE, Rc::new(delegate::DelegateType)),
    ]
}

pub(crate) fn member_index(members: &[&str], name: &str) -> Option<usize> {
    members.iter().position(|member| *member == name)
}

/// Non-negative integer argument. Negative values read as 0.
pub(crate) fn index_arg(cx: &CallContext<'_>, index: usize) -> usize {
    usize::try_from(cx.arg_int(index)).unwrap_or(0)
}

pub(crate) fn this_or_invalid<R>(value: Option<R>, expected: &str) -> Result<R, RuntimeError> {
    value.ok_or_else(|| RuntimeError::invalid_argument(format!("expected {}", expected)))
}

/// Allocate `object` and make it the call's return value.
pub(crate) fn return_object(
    cx: &mut CallContext<'_>,
    object: impl Into<Object>,
) -> Result<(), RuntimeError> {
    let handle = cx.runtime().alloc_object(object.into())?;
    cx.set_return(handle);
    Ok(())
}

macro_rules! into_object {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Object {
                fn from(value: $ty) -> Self {
                    Object::$variant(value)
                }
            }
        )*
    };
}

into_object! {
    string::ScriptString => String,
    array::Array => Array,
    list::List => List,
    list::ListIterator => Iterator,
    table::Table => Table,
    delegate::Delegate => Delegate,
}
