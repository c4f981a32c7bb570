//! C ABI for embedding the runtime and for independently compiled
//! extensions.
//!
//! All types are opaque pointers and all functions use C calling
//! conventions. Built with the `c-api` feature.
//!
//! # Thread Safety
//!
//! This library is NOT thread-safe. Use one `CellContext` per thread.
//!
//! # Memory Management
//!
//! - `CellContext`: created by `cellvm_new()`, freed by `cellvm_free()`
//! - `CellHandle`: one owned reference, freed by `cellvm_handle_free()`
//! - Error strings: valid until the next cellvm_* call on the same context
//! - Allocated strings (from `cellvm_handle_to_string`): freed by
//!   `cellvm_free_string()`

extern crate alloc;

mod native;
mod value;

use alloc::boxed::Box;
use alloc::ffi::CString;
use alloc::string::String;
use core::ffi::{CStr, c_char};
use core::ptr;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::value::Handle;

pub use native::{CellCall, CellTypeProc};

// ============================================================================
// Version
// ============================================================================

/// Library version string
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Returns the library version string.
///
/// The returned string is valid for the lifetime of the library.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque runtime context: the runtime plus error storage.
pub struct CellContext {
    pub(crate) rt: Runtime,
    pub(crate) last_error: Option<CString>,
}

impl CellContext {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        Self {
            rt: Runtime::with_config(config),
            last_error: None,
        }
    }

    /// Set the last error and return a pointer to it.
    /// The pointer is valid until the next call to this function.
    pub(crate) fn set_error(&mut self, error: String) -> *const c_char {
        let c_str = CString::new(error)
            .unwrap_or_else(|_| c"error message contained a null byte".to_owned());
        self.last_error.insert(c_str).as_ptr()
    }
}

/// Opaque owned reference to a value.
pub struct CellHandle {
    pub(crate) inner: Handle,
}

impl CellHandle {
    pub(crate) fn boxed(inner: Handle) -> *mut CellHandle {
        Box::into_raw(Box::new(CellHandle { inner }))
    }
}

/// Borrow the handle behind `h`, null for a NULL pointer.
///
/// # Safety
/// `h` must be NULL or a live pointer returned by [`CellHandle::boxed`].
pub(crate) unsafe fn handle_ref(h: *const CellHandle) -> Handle {
    // SAFETY: caller guarantees h is NULL or a live CellHandle
    unsafe { h.as_ref() }
        .map(|h| h.inner.clone())
        .unwrap_or_default()
}

// ============================================================================
// Result Types
// ============================================================================

/// Result for operations returning a value.
#[repr(C)]
pub struct CellValueResult {
    /// The value, or NULL on error.
    pub value: *mut CellHandle,
    /// Status code, 0 on success.
    pub status: i32,
    /// Error message, or NULL on success. Valid until next cellvm_* call.
    pub error: *const c_char,
}

impl CellValueResult {
    pub(crate) fn ok(value: Handle) -> Self {
        Self {
            value: CellHandle::boxed(value),
            status: 0,
            error: ptr::null(),
        }
    }

    pub(crate) fn err(ctx: &mut CellContext, error: RuntimeError) -> Self {
        Self {
            value: ptr::null_mut(),
            status: error.code(),
            error: ctx.set_error(error.to_string()),
        }
    }

    pub(crate) fn from_result(ctx: &mut CellContext, result: Result<Handle, RuntimeError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::err(ctx, error),
        }
    }

    pub(crate) fn null_context() -> Self {
        Self {
            value: ptr::null_mut(),
            status: RuntimeError::invalid_argument("").code(),
            error: c"NULL context".as_ptr(),
        }
    }
}

/// Result for operations returning nothing.
#[repr(C)]
pub struct CellResult {
    /// Status code, 0 on success.
    pub status: i32,
    /// Error message, or NULL on success. Valid until next cellvm_* call.
    pub error: *const c_char,
}

impl CellResult {
    pub(crate) fn success() -> Self {
        Self {
            status: 0,
            error: ptr::null(),
        }
    }

    pub(crate) fn err(ctx: &mut CellContext, error: RuntimeError) -> Self {
        Self {
            status: error.code(),
            error: ctx.set_error(error.to_string()),
        }
    }

    pub(crate) fn from_result(ctx: &mut CellContext, result: Result<(), RuntimeError>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(error) => Self::err(ctx, error),
        }
    }

    pub(crate) fn null_context() -> Self {
        Self {
            status: RuntimeError::invalid_argument("").code(),
            error: c"NULL context".as_ptr(),
        }
    }
}

// ============================================================================
// Context Lifecycle
// ============================================================================

/// Create a runtime context with default configuration.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_new() -> *mut CellContext {
    Box::into_raw(Box::new(CellContext::new(RuntimeConfig::default())))
}

/// Create a runtime context from a JSON configuration document. Returns
/// NULL when the configuration does not parse.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_new_with_config(json: *const c_char) -> *mut CellContext {
    let Some(text) = (unsafe { c_str_to_str(json) }) else {
        return ptr::null_mut();
    };
    match RuntimeConfig::from_json(text) {
        Ok(config) => Box::into_raw(Box::new(CellContext::new(config))),
        Err(err) => {
            log::warn!("rejected configuration: {}", err);
            ptr::null_mut()
        }
    }
}

/// Free a context. Native types receive terminate and unregister.
///
/// # Safety
/// `ctx` must come from `cellvm_new` (or be NULL) and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cellvm_free(ctx: *mut CellContext) {
    if !ctx.is_null() {
        // SAFETY: ctx was created by Box::into_raw in cellvm_new
        unsafe { drop(Box::from_raw(ctx)) };
    }
}

// ============================================================================
// Garbage Collection
// ============================================================================

/// Garbage collector statistics.
#[repr(C)]
pub struct CellGcStats {
    /// Heap slots ever created, live or free
    pub total_slots: usize,
    /// Slots waiting for reuse
    pub free_slots: usize,
    pub live_objects: usize,
    pub bytes_in_use: usize,
}

/// Run a collection. Fails with the locked status while a call is running.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_collect(ctx: *mut CellContext) -> CellResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return CellResult::null_context();
    };
    let result = ctx.rt.collect().map(|report| {
        log::debug!("collected {} of {} objects", report.collected, report.scanned);
    });
    CellResult::from_result(ctx, result)
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_gc_stats(ctx: *const CellContext) -> CellGcStats {
    match unsafe { ctx.as_ref() } {
        Some(ctx) => {
            let stats = ctx.rt.gc_stats();
            CellGcStats {
                total_slots: stats.total_slots,
                free_slots: stats.free_slots,
                live_objects: stats.live_objects,
                bytes_in_use: ctx.rt.memory_stats().bytes_in_use,
            }
        }
        None => CellGcStats {
            total_slots: 0,
            free_slots: 0,
            live_objects: 0,
            bytes_in_use: 0,
        },
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Free a string allocated by cellvm.
///
/// # Safety
/// `s` must be a pointer returned by a cellvm function (or NULL).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cellvm_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: s was allocated by a cellvm function using CString::into_raw
        unsafe { drop(CString::from_raw(s)) };
    }
}

/// Helper to convert C string to Rust &str.
pub(crate) unsafe fn c_str_to_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        None
    } else {
        // SAFETY: Caller guarantees s is a valid C string
        unsafe { CStr::from_ptr(s) }.to_str().ok()
    }
}

/// Helper to allocate a C string from Rust &str.
pub(crate) fn str_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}
