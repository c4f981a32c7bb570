//! String tests

use cellvm::{Handle, Runtime, Status};

use super::text;

fn call(rt: &mut Runtime, this: &Handle, name: &str, args: Vec<Handle>) -> Handle {
    rt.call_method(this, name, args).unwrap()
}

#[test]
fn test_growth_follows_grain() {
    let rt = Runtime::new();
    let s = rt.new_string("").unwrap();
    assert_eq!(s.with_string(|s| s.capacity()), Some(0));

    s.with_string_mut(|s| s.append(b"abc")).unwrap().unwrap();
    assert_eq!(s.with_string(|s| s.capacity()), Some(32));

    // filling up to the reservation does not grow it
    let fill = vec![b'x'; 28];
    s.with_string_mut(|s| s.append(&fill)).unwrap().unwrap();
    assert_eq!(s.with_string(|s| (s.len(), s.capacity())), Some((31, 32)));

    s.with_string_mut(|s| s.append(b"y")).unwrap().unwrap();
    assert_eq!(s.with_string(|s| (s.len(), s.capacity())), Some((32, 64)));
    assert_eq!(s.with_string(|s| s.as_bytes_with_nul().last().copied()), Some(Some(0)));
}

#[test]
fn test_allocator_sees_string_growth() {
    let rt = Runtime::new();
    let before = rt.memory_stats().bytes_in_use;
    let s = rt.new_string(&"z".repeat(100)).unwrap();
    assert!(rt.memory_stats().bytes_in_use >= before + 128);
    drop(s);
    assert_eq!(rt.memory_stats().bytes_in_use, before);
}

#[test]
fn test_member_calls() {
    let mut rt = Runtime::new();
    let s = rt.new_string("  Hello, World  ").unwrap();
    let trimmed = call(&mut rt, &s, "trim", vec![]);
    assert_eq!(text(&trimmed), "Hello, World");

    let comma = rt.new_string(",").unwrap();
    assert_eq!(call(&mut rt, &trimmed, "find", vec![comma]).to_int(), 5);

    let upper = call(&mut rt, &trimmed, "toUpper", vec![]);
    assert_eq!(text(&upper), "HELLO, WORLD");

    let sub = call(&mut rt, &trimmed, "substring", vec![Handle::Int(7), Handle::Int(100)]);
    assert_eq!(text(&sub), "World");

    // derivations leave the receiver untouched
    assert_eq!(text(&s), "  Hello, World  ");
}

#[test]
fn test_split_and_join() {
    let mut rt = Runtime::new();
    let csv = rt.new_string("a,b,,c").unwrap();
    let comma = rt.new_string(",").unwrap();
    let parts = call(&mut rt, &csv, "split", vec![comma]);
    let texts: Vec<String> = parts
        .with_array(|a| a.iter().map(text).collect())
        .unwrap();
    assert_eq!(texts, vec!["a", "b", "", "c"]);

    let class = rt.class_of("string").unwrap();
    let dash = rt.new_string("-").unwrap();
    let joined = rt.call_static_by_name(class, "join", vec![parts, dash]).unwrap();
    assert_eq!(text(&joined), "a-b--c");
}

#[test]
fn test_numeric_conversion() {
    let mut rt = Runtime::new();
    let hex = rt.new_string("0x1f").unwrap();
    assert_eq!(call(&mut rt, &hex, "toInt", vec![]).to_int(), 31);
    let float = rt.new_string("2.5kg").unwrap();
    assert_eq!(call(&mut rt, &float, "toFloat", vec![]).to_float(), 2.5);
}

#[test]
fn test_append_member_mutates() {
    let mut rt = Runtime::new();
    let s = rt.new_string("ab").unwrap();
    let tail = rt.new_string("cd").unwrap();
    let same = call(&mut rt, &s, "append", vec![tail]);
    assert!(same.same_object(&s));
    assert_eq!(text(&s), "abcd");
    assert_eq!(call(&mut rt, &s, "length", vec![]).to_int(), 4);
}

#[test]
fn test_single_byte_appends_grow_in_grain_steps() {
    const APPENDS: usize = 1000;
    let rt = Runtime::new();
    let s = rt.new_string("").unwrap();
    let before = rt.memory_stats().allocations;
    for _ in 0..APPENDS {
        s.with_string_mut(|s| s.append(b"x")).unwrap().unwrap();
    }
    let grows = rt.memory_stats().allocations - before;
    // one reallocation per 32 bytes, counting the terminator
    assert_eq!(grows, (APPENDS + 1).div_ceil(32));
    assert_eq!(s.with_string(|s| s.len()), Some(APPENDS));
}

#[test]
fn test_unrepresentable_lengths_are_out_of_memory() {
    let mut rt = Runtime::new();
    let s = rt.new_string("abc").unwrap();
    let err = rt
        .call_method(&s, "repeat", vec![Handle::Int(i64::MAX)])
        .unwrap_err();
    assert_eq!(err.status(), Status::OutOfMemory);

    let class = rt.class_of("string").unwrap();
    let err = rt
        .call_static_by_name(class, "fill", vec![Handle::Int(b'x' as i64), Handle::Int(i64::MAX)])
        .unwrap_err();
    assert_eq!(err.status(), Status::OutOfMemory);
    assert_eq!(text(&s), "abc");
}
