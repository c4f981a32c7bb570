//! Array tests

use cellvm::{Handle, Runtime, RuntimeError};

use super::{descending, failing, int_array, ints, text};

#[test]
fn test_set_past_end_grows_once() {
    let rt = Runtime::new();
    let array = rt.new_array().unwrap();
    array.with_array_mut(|a| a.set(40, Handle::Int(7))).unwrap().unwrap();
    let (len, cap) = array.with_array(|a| (a.len(), a.max_size())).unwrap();
    assert_eq!(len, 41);
    assert_eq!(cap % 32, 0);
    assert!(cap >= 41);

    let bytes = rt.memory_stats().bytes_in_use;
    for _ in 0..10 {
        array.with_array_mut(|a| a.set(40, Handle::Int(8))).unwrap().unwrap();
    }
    assert_eq!(rt.memory_stats().bytes_in_use, bytes);
    assert_eq!(array.with_array(|a| a.len()), Some(41));
}

#[test]
fn test_get_never_grows() {
    let rt = Runtime::new();
    let array = int_array(&rt, &[1, 2]);
    assert!(array.with_array(|a| a.get(99)).unwrap().is_null());
    assert!(array.with_array(|a| a.get(-1)).unwrap().is_null());
    assert_eq!(array.with_array(|a| a.len()), Some(2));
}

#[test]
fn test_negative_set_is_ignored() {
    let rt = Runtime::new();
    let array = int_array(&rt, &[1]);
    array.with_array_mut(|a| a.set(-3, Handle::Int(9))).unwrap().unwrap();
    assert_eq!(ints(&array), vec![1]);
}

#[test]
fn test_push_splices_arrays() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[1]);
    let other = int_array(&rt, &[2, 3]);
    rt.call_method(&array, "push", vec![other.clone()]).unwrap();
    rt.call_method(&array, "push", vec![Handle::Int(4)]).unwrap();
    assert_eq!(ints(&array), vec![1, 2, 3, 4]);
    // spliced by reference: the source is untouched
    assert_eq!(ints(&other), vec![2, 3]);
}

#[test]
fn test_append_copy_is_independent() {
    let mut rt = Runtime::new();
    let inner = rt.new_table().unwrap();
    let array = rt.new_array().unwrap();
    rt.call_method(&array, "appendCopy", vec![inner.clone()]).unwrap();
    let copied = array.with_array(|a| a.get(0)).unwrap();
    assert!(!copied.same_object(&inner));
    assert_eq!(copied.class_id(), inner.class_id());
}

#[test]
fn test_sort_default_and_delegate() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[3, 1, 2]);
    rt.call_method(&array, "sort", vec![Handle::Null]).unwrap();
    assert_eq!(ints(&array), vec![1, 2, 3]);
    let cmp = descending(&rt);
    rt.array_sort(&array, &cmp).unwrap();
    assert_eq!(ints(&array), vec![3, 2, 1]);
}

#[test]
fn test_sort_is_stable() {
    let mut rt = Runtime::new();
    let keyed: Vec<Handle> = [(1, "a"), (0, "b"), (1, "c"), (0, "d")]
        .iter()
        .map(|(k, tag)| {
            let tag = rt.new_string(tag).unwrap();
            rt.new_array_from(vec![Handle::Int(*k), tag]).unwrap()
        })
        .collect();
    let array = rt.new_array_from(keyed).unwrap();
    let by_first = rt
        .new_delegate("by_first", |cx, _| {
            let a = cx.arg_handle(0).with_array(|a| a.get(0).to_int()).unwrap_or(0);
            let b = cx.arg_handle(1).with_array(|a| a.get(0).to_int()).unwrap_or(0);
            cx.return_int(a.cmp(&b) as i64);
            Ok(())
        })
        .unwrap();
    rt.array_sort(&array, &by_first).unwrap();
    let tags: Vec<String> = array
        .with_array(|a| a.iter().map(|pair| text(&pair.with_array(|p| p.get(1)).unwrap())).collect())
        .unwrap();
    assert_eq!(tags, vec!["b", "d", "a", "c"]);
}

#[test]
fn test_sort_error_propagates_and_keeps_elements() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[3, 1, 2]);
    let cmp = failing(&rt, -100);
    let err = rt.array_sort(&array, &cmp).unwrap_err();
    assert_eq!(err.code(), -100);
    let mut values = ints(&array);
    values.sort();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn test_index_of_by_value_and_identity() {
    let rt = Runtime::new();
    let s = rt.new_string("x").unwrap();
    let same_text = rt.new_string("x").unwrap();
    let array = rt
        .new_array_from(vec![Handle::Int(5), Handle::Float(1.5), s.clone()])
        .unwrap();
    assert_eq!(array.with_array(|a| a.index_of(&Handle::Int(5))), Some(0));
    assert_eq!(array.with_array(|a| a.index_of(&Handle::Float(1.5))), Some(1));
    assert_eq!(array.with_array(|a| a.index_of(&s)), Some(2));
    assert_eq!(array.with_array(|a| a.index_of(&same_text)), Some(-1));
}

#[test]
fn test_shrink_releases_memory() {
    let rt = Runtime::new();
    let array = rt.new_array_with_size(1000).unwrap();
    let grown = rt.memory_stats().bytes_in_use;
    array.with_array_mut(|a| a.resize(1)).unwrap().unwrap();
    assert!(rt.memory_stats().bytes_in_use < grown);
}

#[test]
fn test_range_operations_return_new_arrays() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[1, 2, 3, 4]);
    let removed = rt
        .call_method(&array, "remove", vec![Handle::Int(1), Handle::Int(2)])
        .unwrap();
    assert_eq!(ints(&removed), vec![1, 4]);
    let source = int_array(&rt, &[9, 9]);
    let inserted = rt
        .call_method(&array, "insert", vec![Handle::Int(2), source])
        .unwrap();
    assert_eq!(ints(&inserted), vec![1, 2, 9, 9, 3, 4]);
    let sub = rt
        .call_method(&array, "subArray", vec![Handle::Int(3), Handle::Int(10)])
        .unwrap();
    assert_eq!(ints(&sub), vec![4]);
    assert_eq!(ints(&array), vec![1, 2, 3, 4]);
}

#[test]
fn test_enumerate_stops_at_first_error() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[1, 2, 3]);
    let seen = rt.new_array().unwrap();
    let visit = rt
        .new_delegate_bound(
            "visit",
            |cx, bound| {
                let value = cx.arg_int(1);
                if value == 2 {
                    return Err(RuntimeError::callback(-50, "stop"));
                }
                if let Some(seen) = bound.first() {
                    seen.with_array_mut(|a| a.push(Handle::Int(value)))
                        .unwrap_or(Ok(()))?;
                }
                Ok(())
            },
            vec![seen.clone()],
        )
        .unwrap();
    let err = rt.array_enumerate(&array, &visit).unwrap_err();
    assert_eq!(err.code(), -50);
    assert_eq!(ints(&seen), vec![1]);
}

#[test]
fn test_join_and_static_create() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[1, 2, 3]);
    let sep = rt.new_string("-").unwrap();
    let joined = rt.call_method(&array, "join", vec![sep]).unwrap();
    assert_eq!(text(&joined), "1-2-3");

    let class = rt.class_of("array").unwrap();
    let created = rt
        .call_static_by_name(class, "create", vec![Handle::Int(4)])
        .unwrap();
    assert_eq!(created.with_array(|a| a.len()), Some(4));
}

#[test]
fn test_unrepresentable_sizes_are_out_of_memory() {
    let mut rt = Runtime::new();
    let array = int_array(&rt, &[1]);
    for index in [i64::MAX, 1 << 62] {
        let err = rt
            .call_method(&array, "set", vec![Handle::Int(index), Handle::Int(1)])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::OutOfMemory { .. }), "set({}) gave {}", index, err);
    }
    let err = rt
        .call_method(&array, "resize", vec![Handle::Int(i64::MAX)])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::OutOfMemory { .. }));
    assert_eq!(ints(&array), vec![1]);

    let class = rt.class_of("array").unwrap();
    let err = rt
        .call_static_by_name(class, "create", vec![Handle::Int(i64::MAX)])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::OutOfMemory { .. }));
}
