//! Handle creation, inspection and calls.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ffi::c_char;
use core::ptr;

use crate::error::RuntimeError;
use crate::value::{ClassId, Handle};

use super::{
    CellContext, CellHandle, CellResult, CellValueResult, c_str_to_str, handle_ref,
    str_to_c_string,
};

// ============================================================================
// Creation
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_null() -> *mut CellHandle {
    CellHandle::boxed(Handle::Null)
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_int(value: i64) -> *mut CellHandle {
    CellHandle::boxed(Handle::Int(value))
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_float(value: f64) -> *mut CellHandle {
    CellHandle::boxed(Handle::Float(value))
}

/// New string object from a NUL-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_string(ctx: *mut CellContext, text: *const c_char) -> CellValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellValueResult::null_context();
    };
    let result = match unsafe { c_str_to_str(text) } {
        Some(text) => ctx.rt.new_string(text),
        None => Err(RuntimeError::invalid_argument("string is NULL or not UTF-8")),
    };
    CellValueResult::from_result(ctx, result)
}

/// Allocate an instance of a registered type.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_new_object(ctx: *mut CellContext, class: u32) -> CellValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellValueResult::null_context();
    };
    let result = ctx.rt.new_object(ClassId(class));
    CellValueResult::from_result(ctx, result)
}

// ============================================================================
// References
// ============================================================================

/// Release one reference.
///
/// # Safety
/// `h` must come from a cellvm function (or be NULL) and not be used
/// afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cellvm_handle_free(h: *mut CellHandle) {
    if !h.is_null() {
        // SAFETY: h was created by CellHandle::boxed
        unsafe { drop(Box::from_raw(h)) };
    }
}

/// A second reference to the same value.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_clone(h: *const CellHandle) -> *mut CellHandle {
    CellHandle::boxed(unsafe { handle_ref(h) })
}

/// Deep copy. Fails with the cannot-copy status for types without a copy
/// implementation.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_copy(ctx: *mut CellContext, h: *const CellHandle) -> CellValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellValueResult::null_context();
    };
    let result = ctx.rt.copy_deep(&unsafe { handle_ref(h) });
    CellValueResult::from_result(ctx, result)
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_ref_count(h: *const CellHandle) -> usize {
    unsafe { h.as_ref() }.map_or(0, |h| h.inner.ref_count())
}

// ============================================================================
// Inspection
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_class(h: *const CellHandle) -> u32 {
    unsafe { h.as_ref() }.map_or(ClassId::NULL.0, |h| h.inner.class_id().0)
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_is_null(h: *const CellHandle) -> bool {
    unsafe { h.as_ref() }.is_none_or(|h| h.inner.is_null())
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_to_int(h: *const CellHandle) -> i64 {
    unsafe { h.as_ref() }.map_or(0, |h| h.inner.to_int())
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_to_float(h: *const CellHandle) -> f64 {
    unsafe { h.as_ref() }.map_or(0.0, |h| h.inner.to_float())
}

/// Contents of a string handle as a new C string (free with
/// `cellvm_free_string`), NULL for other values.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_handle_to_string(h: *const CellHandle) -> *mut c_char {
    unsafe { h.as_ref() }
        .and_then(|h| h.inner.to_string_lossy())
        .map_or(ptr::null_mut(), |s| str_to_c_string(&s))
}

/// Registered name of a class as a new C string.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_class_name(ctx: *const CellContext, class: u32) -> *mut c_char {
    unsafe { ctx.as_ref() }.map_or(ptr::null_mut(), |ctx| {
        str_to_c_string(&ctx.rt.class_name(ClassId(class)))
    })
}

// ============================================================================
// Calls
// ============================================================================

/// Collect `argc` handles from `args`. NULL entries read as null.
fn collect_args(args: *const *const CellHandle, argc: usize) -> Vec<Handle> {
    if args.is_null() {
        return Vec::new();
    }
    (0..argc)
        // SAFETY: caller guarantees args holds argc entries
        .map(|i| unsafe { handle_ref(*args.add(i)) })
        .collect()
}

/// Call a member function of `this` by name.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_method(
    ctx: *mut CellContext,
    this: *const CellHandle,
    name: *const c_char,
    args: *const *const CellHandle,
    argc: usize,
) -> CellValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellValueResult::null_context();
    };
    let Some(name) = (unsafe { c_str_to_str(name) }) else {
        return CellValueResult::err(ctx, RuntimeError::invalid_argument("method name"));
    };
    let args = collect_args(args, argc);
    let result = ctx.rt.call_method(&unsafe { handle_ref(this) }, name, args);
    CellValueResult::from_result(ctx, result)
}

/// Call a static function of a registered type by name.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_static(
    ctx: *mut CellContext,
    class: u32,
    name: *const c_char,
    args: *const *const CellHandle,
    argc: usize,
) -> CellValueResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellValueResult::null_context();
    };
    let Some(name) = (unsafe { c_str_to_str(name) }) else {
        return CellValueResult::err(ctx, RuntimeError::invalid_argument("function name"));
    };
    let args = collect_args(args, argc);
    let result = ctx.rt.call_static_by_name(ClassId(class), name, args);
    CellValueResult::from_result(ctx, result)
}

// ============================================================================
// Globals
// ============================================================================

/// Store a value under `name` in the globals table. Globals are collector
/// roots.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_set_global(
    ctx: *mut CellContext,
    name: *const c_char,
    value: *const CellHandle,
) -> CellResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellResult::null_context();
    };
    let result = match unsafe { c_str_to_str(name) } {
        Some(name) => ctx.rt.set_global(name, unsafe { handle_ref(value) }),
        None => Err(RuntimeError::invalid_argument("global name")),
    };
    CellResult::from_result(ctx, result)
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_global(ctx: *const CellContext, name: *const c_char) -> *mut CellHandle {
    let value = match (unsafe { ctx.as_ref() }, unsafe { c_str_to_str(name) }) {
        (Some(ctx), Some(name)) => ctx.rt.global(name),
        _ => Handle::Null,
    };
    CellHandle::boxed(value)
}
