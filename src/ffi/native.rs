//! Native types implemented in C.
//!
//! A C extension is one type proc: `status proc(message, call, userdata)`.
//! The message is a [`MessageCode`] number, `call` is an opaque view of the
//! message's inputs and outputs read and written through the
//! `cellvm_call_*` functions, and the returned status is 0 or a negative
//! [`Status`](crate::error::Status) code. `-1` (unsupported) is always an
//! acceptable answer to an optional message.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ffi::{c_char, c_void};
use core::ptr;

use crate::error::RuntimeError;
use crate::gc::Marker;
use crate::native::{CallContext, MessageCode, NativeObject, NativeType};
use crate::runtime::Runtime;
use crate::runtime::copy::DeepCopy;
use crate::value::{ClassId, Handle};

use super::{CellContext, CellHandle, CellResult, c_str_to_str, handle_ref, str_to_c_string};

/// Type proc signature.
pub type CellTypeProc =
    unsafe extern "C" fn(message: i32, call: *mut CellCall, userdata: *mut c_void) -> i32;

/// Inputs and outputs of one message to a C type proc.
pub struct CellCall {
    class: ClassId,
    func: usize,
    this: Handle,
    args: Vec<Handle>,
    ret: Handle,
    text: Option<String>,
    /// Instance pointer of the receiving object, or the new instance
    instance: *mut c_void,
    marker: *mut Marker,
    copier: *mut c_void,
}

impl CellCall {
    fn new(class: ClassId) -> Self {
        Self {
            class,
            func: 0,
            this: Handle::Null,
            args: Vec::new(),
            ret: Handle::Null,
            text: None,
            instance: ptr::null_mut(),
            marker: ptr::null_mut(),
            copier: ptr::null_mut(),
        }
    }
}

#[derive(Clone, Copy)]
struct Proc {
    func: CellTypeProc,
    userdata: *mut c_void,
}

impl Proc {
    fn send(&self, code: MessageCode, call: &mut CellCall) -> Result<(), RuntimeError> {
        // SAFETY: the extension promised a valid proc at registration
        let status = unsafe { (self.func)(code as i32, call, self.userdata) };
        if status == 0 {
            Ok(())
        } else {
            Err(RuntimeError::from_code(status, &format!("{:?}", code)))
        }
    }

    fn text(&self, code: MessageCode, class: ClassId) -> Result<String, RuntimeError> {
        let mut call = CellCall::new(class);
        self.send(code, &mut call)?;
        call.text
            .ok_or_else(|| RuntimeError::unsupported(format!("{:?}", code)))
    }
}

/// [`NativeType`] over a C type proc.
struct ForeignType {
    name: String,
    class: core::cell::Cell<ClassId>,
    proc: Proc,
}

impl ForeignType {
    fn call(&self, code: MessageCode, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        let mut call = CellCall::new(self.class.get());
        call.func = func;
        call.this = cx.this().clone();
        call.args = (0..cx.arg_count()).map(|i| cx.arg_handle(i)).collect();
        if code == MessageCode::CallMember {
            call.instance = cx.with_this::<ForeignObject, _>(|o| o.instance)?;
        }
        self.proc.send(code, &mut call)?;
        cx.set_return(call.ret);
        Ok(())
    }
}

impl NativeType for ForeignType {
    fn name(&self) -> &str {
        &self.name
    }

    fn declaration(&self) -> Result<String, RuntimeError> {
        self.proc.text(MessageCode::GetDeclaration, self.class.get())
    }

    fn version(&self) -> Result<String, RuntimeError> {
        self.proc.text(MessageCode::GetVersion, self.class.get())
    }

    fn author(&self) -> Result<String, RuntimeError> {
        self.proc.text(MessageCode::GetAuthor, self.class.get())
    }

    fn base_name(&self) -> Result<String, RuntimeError> {
        self.proc.text(MessageCode::GetBaseName, self.class.get())
    }

    fn register(&self, class: ClassId) -> Result<(), RuntimeError> {
        self.class.set(class);
        self.proc.send(MessageCode::Register, &mut CellCall::new(class))
    }

    fn initialize(&self, _rt: &mut Runtime) -> Result<(), RuntimeError> {
        self.proc
            .send(MessageCode::Initialize, &mut CellCall::new(self.class.get()))
    }

    fn new_object(&self, rt: &mut Runtime, class: ClassId) -> Result<Handle, RuntimeError> {
        let mut call = CellCall::new(class);
        self.proc.send(MessageCode::NewObject, &mut call)?;
        if call.instance.is_null() {
            return Err(RuntimeError::invalid_argument(format!(
                "{} created no instance",
                self.name
            )));
        }
        rt.wrap_native(class, Box::new(ForeignObject::new(self.proc, class, call.instance)))
    }

    fn call_static(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        self.call(MessageCode::CallStatic, func, cx)
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        self.call(MessageCode::CallMember, func, cx)
    }

    fn terminate(&self, _rt: &mut Runtime) -> Result<(), RuntimeError> {
        self.proc
            .send(MessageCode::Terminate, &mut CellCall::new(self.class.get()))
    }

    fn unregister(&self) -> Result<(), RuntimeError> {
        self.proc
            .send(MessageCode::Unregister, &mut CellCall::new(self.class.get()))
    }
}

/// One C-side instance.
struct ForeignObject {
    proc: Proc,
    class: ClassId,
    instance: *mut c_void,
}

impl ForeignObject {
    fn new(proc: Proc, class: ClassId, instance: *mut c_void) -> Self {
        Self {
            proc,
            class,
            instance,
        }
    }

    fn call(&self) -> CellCall {
        let mut call = CellCall::new(self.class);
        call.instance = self.instance;
        call
    }
}

impl NativeObject for ForeignObject {
    fn mark(&self, marker: &mut Marker) -> Result<(), RuntimeError> {
        let mut call = self.call();
        call.marker = marker;
        self.proc.send(MessageCode::MarkChildren, &mut call)
    }

    fn copy(&self, cx: &mut DeepCopy<'_>) -> Result<Box<dyn NativeObject>, RuntimeError> {
        let mut call = self.call();
        call.copier = (cx as *mut DeepCopy<'_>).cast();
        self.proc.send(MessageCode::CopyObject, &mut call)?;
        if call.instance == self.instance || call.instance.is_null() {
            return Err(RuntimeError::cannot_copy(self.class.to_string()));
        }
        Ok(Box::new(ForeignObject::new(self.proc, self.class, call.instance)))
    }

    fn destroy(&mut self) {
        let mut call = self.call();
        if let Err(err) = self.proc.send(MessageCode::DestroyObject, &mut call) {
            log::warn!("destroying {} failed: {}", self.class, err);
        }
        self.instance = ptr::null_mut();
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Result of registering a C type.
#[repr(C)]
pub struct CellRegisterResult {
    /// Assigned class id, 0 on error.
    pub class: u32,
    pub status: i32,
    pub error: *const c_char,
}

/// Register a C type proc. The proc is asked for its name, then receives
/// register and initialize.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_register_type(
    ctx: *mut CellContext,
    proc: CellTypeProc,
    userdata: *mut c_void,
) -> CellRegisterResult {
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        let err = CellResult::null_context();
        return CellRegisterResult {
            class: 0,
            status: err.status,
            error: err.error,
        };
    };
    let proc = Proc {
        func: proc,
        userdata,
    };
    let result = proc
        .text(MessageCode::GetName, ClassId::NULL)
        .and_then(|name| {
            ctx.rt.register_type(Box::new(ForeignType {
                name,
                class: core::cell::Cell::new(ClassId::NULL),
                proc,
            }))
        });
    match result {
        Ok(class) => CellRegisterResult {
            class: class.0,
            status: 0,
            error: ptr::null(),
        },
        Err(err) => CellRegisterResult {
            class: 0,
            status: err.code(),
            error: ctx.set_error(err.to_string()),
        },
    }
}

// ============================================================================
// Call Access
// ============================================================================

/// # Safety
/// `call` must be NULL or the pointer handed to a type proc, used only
/// while that proc runs.
unsafe fn call_ref<'a>(call: *const CellCall) -> Option<&'a CellCall> {
    unsafe { call.as_ref() }
}

/// # Safety
/// Same contract as [`call_ref`], and no other reference to the call may be
/// live.
unsafe fn call_mut<'a>(call: *mut CellCall) -> Option<&'a mut CellCall> {
    unsafe { call.as_mut() }
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_class(call: *const CellCall) -> u32 {
    unsafe { call_ref(call) }.map_or(0, |c| c.class.0)
}

/// Member or static function index of a call message.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_func(call: *const CellCall) -> usize {
    unsafe { call_ref(call) }.map_or(0, |c| c.func)
}

/// The receiving instance for member calls, mark, copy and destroy.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_instance(call: *const CellCall) -> *mut c_void {
    unsafe { call_ref(call) }.map_or(ptr::null_mut(), |c| c.instance)
}

/// Hand the runtime a new instance (new-object and copy-object).
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_set_instance(call: *mut CellCall, instance: *mut c_void) {
    if let Some(call) = unsafe { call_mut(call) } {
        call.instance = instance;
    }
}

/// Answer a metadata message. Copies `text`.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_set_text(call: *mut CellCall, text: *const c_char) {
    if let (Some(call), Some(text)) = (unsafe { call_mut(call) }, unsafe { c_str_to_str(text) }) {
        call.text = Some(text.to_string());
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_arg_count(call: *const CellCall) -> usize {
    unsafe { call_ref(call) }.map_or(0, |c| c.args.len())
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_arg_int(call: *const CellCall, index: usize) -> i64 {
    unsafe { call_ref(call) }
        .and_then(|c| c.args.get(index))
        .map_or(0, Handle::to_int)
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_arg_float(call: *const CellCall, index: usize) -> f64 {
    unsafe { call_ref(call) }
        .and_then(|c| c.args.get(index))
        .map_or(0.0, Handle::to_float)
}

/// String argument as a new C string (free with `cellvm_free_string`), NULL
/// when the argument is not a string.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_arg_str(call: *const CellCall, index: usize) -> *mut c_char {
    unsafe { call_ref(call) }
        .and_then(|c| c.args.get(index))
        .and_then(Handle::to_string_lossy)
        .map_or(ptr::null_mut(), |s| str_to_c_string(&s))
}

/// An owned reference to an argument (free with `cellvm_handle_free`).
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_arg_handle(call: *const CellCall, index: usize) -> *mut CellHandle {
    let arg = unsafe { call_ref(call) }
        .and_then(|c| c.args.get(index))
        .cloned()
        .unwrap_or_default();
    CellHandle::boxed(arg)
}

/// An owned reference to the receiver of a member call.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_this(call: *const CellCall) -> *mut CellHandle {
    CellHandle::boxed(unsafe { call_ref(call) }.map(|c| c.this.clone()).unwrap_or_default())
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_return_int(call: *mut CellCall, value: i64) {
    if let Some(call) = unsafe { call_mut(call) } {
        call.ret = Handle::Int(value);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_return_float(call: *mut CellCall, value: f64) {
    if let Some(call) = unsafe { call_mut(call) } {
        call.ret = Handle::Float(value);
    }
}

/// Return a handle. Takes over the caller's reference: `value` must not be
/// used or freed afterwards.
///
/// # Safety
/// `value` must come from a cellvm function (or be NULL).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cellvm_call_return_handle(call: *mut CellCall, value: *mut CellHandle) {
    if value.is_null() {
        return;
    }
    // SAFETY: value was created by CellHandle::boxed
    let value = unsafe { Box::from_raw(value) };
    if let Some(call) = unsafe { call_mut(call) } {
        call.ret = value.inner;
    }
}

/// Report a child handle during mark-children.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_mark(call: *mut CellCall, child: *const CellHandle) {
    let Some(call) = unsafe { call_mut(call) } else { return };
    // SAFETY: marker is set only for the duration of a mark-children message
    if let Some(marker) = unsafe { call.marker.as_mut() } {
        marker.mark(&unsafe { handle_ref(child) });
    }
}

/// Deep copy of a child handle during copy-object. Shared children and
/// cycles are copied once. Returns NULL outside copy-object or on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cellvm_call_copy_child(
    call: *mut CellCall,
    child: *const CellHandle,
) -> *mut CellHandle {
    let Some(call) = unsafe { call_mut(call) } else {
        return ptr::null_mut();
    };
    // SAFETY: copier is set only for the duration of a copy-object message
    let Some(copier) = (unsafe { call.copier.cast::<DeepCopy<'_>>().as_mut() }) else {
        return ptr::null_mut();
    };
    match copier.copy(&unsafe { handle_ref(child) }) {
        Ok(copy) => CellHandle::boxed(copy),
        Err(err) => {
            log::warn!("copying a child of {} failed: {}", call.class, err);
            ptr::null_mut()
        }
    }
}
