//! Host callables as handles.
//!
//! A delegate lets comparators, visitors and merge functions travel through
//! the protocol like any other value. Bound handles are owned by the
//! delegate and marked with it.

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::gc::Marker;
use crate::native::{CallContext, NativeType};
use crate::value::Handle;

use super::member_index;

/// Host function behind a delegate. Receives the call (arguments and return
/// slot) plus the bound handles.
pub type DelegateFn = Rc<dyn Fn(&mut CallContext<'_>, &[Handle]) -> Result<(), RuntimeError>>;

pub struct Delegate {
    name: String,
    func: DelegateFn,
    bound: Vec<Handle>,
}

impl Delegate {
    pub fn new(name: impl Into<String>, func: DelegateFn) -> Self {
        Self::with_bound(name, func, Vec::new())
    }

    pub fn with_bound(name: impl Into<String>, func: DelegateFn, bound: Vec<Handle>) -> Self {
        Self {
            name: name.into(),
            func,
            bound,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> DelegateFn {
        Rc::clone(&self.func)
    }

    pub fn bound(&self) -> &[Handle] {
        &self.bound
    }

    pub(crate) fn set_bound(&mut self, bound: Vec<Handle>) {
        self.bound = bound;
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        marker.mark_all(&self.bound);
    }
}

const DECLARATION: &str = "\
class delegate {
    var call(...);
    string name();
}";

const MEMBERS: &[&str] = &["call", "name"];

/// Protocol entry of the built-in delegate type.
pub struct DelegateType;

impl NativeType for DelegateType {
    fn name(&self) -> &str {
        "delegate"
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

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let this = cx.this().clone();
        match MEMBERS.get(func).copied() {
            Some("call") => {
                let args = (0..cx.arg_count()).map(|i| cx.arg_handle(i)).collect();
                let result = cx.runtime().execute_function(&this, args)?;
                cx.set_return(result);
            }
            Some("name") => {
                let name = this.with_delegate(|d| d.name().to_string()).unwrap_or_default();
                cx.return_str(&name)?;
            }
            _ => return Err(RuntimeError::unsupported(format!("delegate member {}", func))),
        }
        Ok(())
    }
}
