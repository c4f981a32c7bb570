#![no_main]

use cellvm::{Handle, Runtime};
use libfuzzer_sys::fuzz_target;

const ITERATORS: usize = 3;

// Random list edits interleaved with moves of a few live iterators. The
// list must stay consistent however items disappear under them.
fuzz_target!(|data: &[u8]| {
    let mut rt = Runtime::new();
    let list = rt.new_list().unwrap();
    let iters: Vec<Handle> = (0..ITERATORS)
        .map(|_| rt.new_iterator(&list).unwrap())
        .collect();

    for pair in data.chunks(2) {
        let (op, arg) = (pair[0], pair.get(1).copied().unwrap_or(0));
        let iter = &iters[arg as usize % ITERATORS];
        let key = Handle::Int(i64::from(arg % 32));
        let _ = match op % 8 {
            0 | 1 => rt.call_method(&list, "add", vec![key, Handle::Int(i64::from(op))]),
            2 => rt.call_method(&list, "remove", vec![key]),
            3 => rt.call_method(iter, "next", vec![]),
            4 => rt.call_method(iter, "prev", vec![]),
            5 => rt.call_method(iter, "delete", vec![]),
            6 => rt.call_method(iter, "first", vec![]),
            _ => rt.call_method(&list, "sort", vec![Handle::Int(i64::from(arg % 4))]),
        };
        let len = list.with_list(|l| l.len()).unwrap();
        assert_eq!(list.with_list(|l| l.keys().len()), Some(len));
    }

    drop(iters);
    assert_eq!(list.with_list(|l| l.pending_count()), Some(0));
});
