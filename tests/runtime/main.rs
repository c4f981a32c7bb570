//! Integration tests for the runtime core, organized by feature
//!
//! These tests exercise containers, the extension protocol and the collector
//! through the public API.

mod api;
mod array;
mod config;
mod gc;
mod list;
mod native;
mod string;

use cellvm::{Handle, Runtime, RuntimeError};

/// Integer view of an array handle's elements.
pub fn ints(array: &Handle) -> Vec<i64> {
    array
        .with_array(|a| a.iter().map(Handle::to_int).collect())
        .unwrap_or_default()
}

pub fn int_array(rt: &Runtime, values: &[i64]) -> Handle {
    rt.new_array_from(values.iter().copied().map(Handle::Int).collect())
        .unwrap()
}

pub fn text(handle: &Handle) -> String {
    handle.to_string_lossy().unwrap_or_default()
}

/// Three-way comparator delegate ordering integers high to low.
pub fn descending(rt: &Runtime) -> Handle {
    rt.new_delegate("descending", |cx, _| {
        let (a, b) = (cx.arg_int(0), cx.arg_int(1));
        cx.return_int(b.cmp(&a) as i64);
        Ok(())
    })
    .unwrap()
}

/// Delegate that fails with a callback status.
pub fn failing(rt: &Runtime, code: i32) -> Handle {
    rt.new_delegate("failing", move |_, _| Err(RuntimeError::callback(code, "refused")))
        .unwrap()
}
