//! List and iterator tests

use cellvm::{Handle, Runtime, SortOrder};

use super::{descending, failing, text};

fn list_of(rt: &Runtime, pairs: &[(i64, i64)]) -> Handle {
    let list = rt.new_list().unwrap();
    for (k, v) in pairs {
        list.with_list_mut(|l| l.add(Handle::Int(*k), Handle::Int(*v)))
            .unwrap()
            .unwrap();
    }
    list
}

fn keys(list: &Handle) -> Vec<i64> {
    list.with_list(|l| l.keys().iter().map(Handle::to_int).collect())
        .unwrap_or_default()
}

fn iter_call(rt: &mut Runtime, iter: &Handle, name: &str) -> Handle {
    rt.call_method(iter, name, vec![]).unwrap()
}

#[test]
fn test_delete_under_second_iterator() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
    let a = rt.new_iterator(&list).unwrap();
    let b = rt.new_iterator(&list).unwrap();
    for _ in 0..2 {
        iter_call(&mut rt, &a, "next");
        iter_call(&mut rt, &b, "next");
    }
    assert_eq!(iter_call(&mut rt, &a, "key").to_int(), 3);
    assert_eq!(iter_call(&mut rt, &b, "key").to_int(), 3);

    assert_eq!(iter_call(&mut rt, &a, "delete").to_int(), 1);
    assert_eq!(keys(&list), vec![1, 2, 4, 5]);
    assert_eq!(list.with_list(|l| l.len()), Some(4));
    // b still holds the item
    assert_eq!(list.with_list(|l| l.pending_count()), Some(1));

    assert_eq!(iter_call(&mut rt, &b, "key").to_int(), 3);
    assert_eq!(iter_call(&mut rt, &b, "value").to_int(), 30);
    assert_eq!(iter_call(&mut rt, &b, "isValid").to_int(), 1);
    assert_eq!(list.with_list(|l| l.pending_count()), Some(1));

    assert_eq!(iter_call(&mut rt, &b, "next").to_int(), 1);
    assert_eq!(iter_call(&mut rt, &b, "key").to_int(), 4);
    assert_eq!(list.with_list(|l| l.pending_count()), Some(0));

    // a lands on the same successor
    assert_eq!(iter_call(&mut rt, &a, "next").to_int(), 1);
    assert_eq!(iter_call(&mut rt, &a, "key").to_int(), 4);
}

#[test]
fn test_pending_item_releases_its_value_with_last_cursor() {
    let mut rt = Runtime::new();
    let list = rt.new_list().unwrap();
    let payload = rt.new_string("payload").unwrap();
    list.with_list_mut(|l| l.add(Handle::Int(1), payload.clone()))
        .unwrap()
        .unwrap();
    let a = rt.new_iterator(&list).unwrap();
    let b = rt.new_iterator(&list).unwrap();
    iter_call(&mut rt, &a, "delete");
    // list slot gone, b keeps the value alive
    assert_eq!(payload.ref_count(), 2);
    assert_eq!(text(&iter_call(&mut rt, &b, "value")), "payload");
    drop(b);
    assert_eq!(payload.ref_count(), 1);
    assert_eq!(list.with_list(|l| l.pending_count()), Some(0));
}

#[test]
fn test_iterator_stored_in_its_own_list_releases_its_item() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 10), (2, 20)]);
    let it = rt.new_iterator(&list).unwrap();
    let holder = rt.new_string("holder").unwrap();
    rt.call_method(&list, "add", vec![holder.clone(), it]).unwrap();

    // the iterator dies inside the list's own remove
    rt.call_method(&list, "remove", vec![holder]).unwrap();
    rt.call_method(&list, "remove", vec![Handle::Int(1)]).unwrap();

    assert_eq!(keys(&list), vec![2]);
    assert_eq!(list.with_list(|l| l.pending_count()), Some(0));
}

#[test]
fn test_iterator_dropped_while_list_is_borrowed() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 10), (2, 20)]);
    let it = rt.new_iterator(&list).unwrap();
    iter_call(&mut rt, &it, "next");
    list.with_list_mut(|l| {
        assert!(l.remove(&Handle::Int(2)));
        assert_eq!(l.pending_count(), 1);
        // the release is queued until this borrow ends
        drop(it);
        assert_eq!(l.pending_count(), 1);
    })
    .unwrap();
    assert_eq!(list.with_list(|l| l.pending_count()), Some(0));
    assert_eq!(keys(&list), vec![1]);
}

#[test]
fn test_delete_then_next_lands_on_successor() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 10), (2, 20), (3, 30)]);
    let it = rt.new_iterator(&list).unwrap();
    iter_call(&mut rt, &it, "delete");
    assert!(iter_call(&mut rt, &it, "key").is_null());
    // a second delete does nothing
    assert_eq!(iter_call(&mut rt, &it, "delete").to_int(), 0);
    assert_eq!(iter_call(&mut rt, &it, "next").to_int(), 1);
    assert_eq!(iter_call(&mut rt, &it, "key").to_int(), 2);
    assert_eq!(iter_call(&mut rt, &it, "isFirst").to_int(), 1);
    assert_eq!(keys(&list), vec![2, 3]);
}

#[test]
fn test_delete_every_item_while_walking() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 1), (2, 2), (3, 3), (4, 4)]);
    let watcher = rt.new_iterator(&list).unwrap();
    iter_call(&mut rt, &watcher, "last");
    let it = rt.new_iterator(&list).unwrap();
    let mut deleted = 0;
    while iter_call(&mut rt, &it, "isValid").to_int() == 1 {
        iter_call(&mut rt, &it, "delete");
        deleted += 1;
        iter_call(&mut rt, &it, "next");
    }
    assert_eq!(deleted, 4);
    assert_eq!(list.with_list(|l| l.len()), Some(0));
    assert_eq!(list.with_list(|l| l.pending_count()), Some(1));
    drop(watcher);
    assert_eq!(list.with_list(|l| l.pending_count()), Some(0));
}

#[test]
fn test_moving_past_either_end_invalidates() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 1), (2, 2)]);
    let it = rt.new_iterator(&list).unwrap();
    assert_eq!(iter_call(&mut rt, &it, "prev").to_int(), 0);
    assert_eq!(iter_call(&mut rt, &it, "isValid").to_int(), 0);
    assert_eq!(iter_call(&mut rt, &it, "last").to_int(), 1);
    assert_eq!(iter_call(&mut rt, &it, "isLast").to_int(), 1);
    assert_eq!(iter_call(&mut rt, &it, "next").to_int(), 0);
}

#[test]
fn test_iterator_inserts() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 1), (3, 3)]);
    let it = rt.new_iterator(&list).unwrap();
    rt.call_method(&it, "insertAfter", vec![Handle::Int(2), Handle::Int(2)])
        .unwrap();
    rt.call_method(&it, "insertBefore", vec![Handle::Int(0), Handle::Int(0)])
        .unwrap();
    assert_eq!(keys(&list), vec![0, 1, 2, 3]);
    assert_eq!(iter_call(&mut rt, &it, "key").to_int(), 1);
}

#[test]
fn test_key_operations() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 10), (2, 20), (3, 30)]);
    rt.call_method(&list, "addOrSet", vec![Handle::Int(2), Handle::Int(99)])
        .unwrap();
    assert_eq!(
        rt.call_method(&list, "get", vec![Handle::Int(2)]).unwrap().to_int(),
        99
    );
    rt.call_method(&list, "swap", vec![Handle::Int(1), Handle::Int(3)])
        .unwrap();
    assert_eq!(keys(&list), vec![3, 2, 1]);
    rt.call_method(&list, "moveToFirst", vec![Handle::Int(1)]).unwrap();
    assert_eq!(keys(&list), vec![1, 3, 2]);
    rt.call_method(&list, "moveToLast", vec![Handle::Int(1)]).unwrap();
    assert_eq!(keys(&list), vec![3, 2, 1]);
    let missing = rt
        .call_method(&list, "insertBefore", vec![Handle::Int(7), Handle::Int(8), Handle::Int(9)])
        .unwrap();
    assert_eq!(missing.to_int(), 0);
}

#[test]
fn test_string_keys_match_by_content() {
    let rt = Runtime::new();
    let list = rt.new_list().unwrap();
    let key = rt.new_string("name").unwrap();
    list.with_list_mut(|l| l.add(key, Handle::Int(1))).unwrap().unwrap();
    let lookup = rt.new_string("name").unwrap();
    assert_eq!(list.with_list(|l| l.get(&lookup).to_int()), Some(1));
}

#[test]
fn test_sort_orders() {
    let rt = Runtime::new();
    let list = list_of(&rt, &[(2, 1), (1, 3), (3, 2)]);
    list.with_list_mut(|l| l.sort(SortOrder::KeyAscending)).unwrap();
    assert_eq!(keys(&list), vec![1, 2, 3]);
    list.with_list_mut(|l| l.sort(SortOrder::ValueDescending)).unwrap();
    assert_eq!(keys(&list), vec![1, 3, 2]);
    list.with_list_mut(|l| l.sort(SortOrder::KeyDescending)).unwrap();
    assert_eq!(keys(&list), vec![3, 2, 1]);
}

#[test]
fn test_sort_keeps_cursor_on_its_item() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(2, 0), (1, 0), (3, 0)]);
    let it = rt.new_iterator(&list).unwrap();
    list.with_list_mut(|l| l.sort(SortOrder::KeyAscending)).unwrap();
    assert_eq!(iter_call(&mut rt, &it, "key").to_int(), 2);
    assert_eq!(iter_call(&mut rt, &it, "next").to_int(), 1);
    assert_eq!(iter_call(&mut rt, &it, "key").to_int(), 3);
}

#[test]
fn test_deep_copy_keeps_iterator_position() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 1), (2, 2), (3, 3)]);
    let it = rt.new_iterator(&list).unwrap();
    iter_call(&mut rt, &it, "next");
    let copy = rt.copy_deep(&it).unwrap();
    assert_eq!(iter_call(&mut rt, &copy, "key").to_int(), 2);
    let copied_list = copy.with_iterator(|i| i.list().clone()).unwrap();
    assert!(!copied_list.same_object(&list));
    assert_eq!(keys(&copied_list), vec![1, 2, 3]);
}

#[test]
fn test_sort_with_comparator() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(2, 0), (5, 0), (1, 0), (4, 0)]);
    let compare = descending(&rt);
    rt.call_method(&list, "sort", vec![Handle::Int(0), compare.clone()])
        .unwrap();
    assert_eq!(keys(&list), vec![5, 4, 2, 1]);
    // a descending order reverses the comparator
    rt.list_sort(&list, SortOrder::KeyDescending, &compare).unwrap();
    assert_eq!(keys(&list), vec![1, 2, 4, 5]);
}

#[test]
fn test_sort_by_value_breaks_ties_on_key() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(3, 1), (1, 2), (2, 1)]);
    rt.list_sort(&list, SortOrder::ValueAscending, &Handle::Null).unwrap();
    assert_eq!(keys(&list), vec![2, 3, 1]);
}

#[test]
fn test_sort_comparator_error_aborts() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(3, 0), (1, 0), (2, 0)]);
    let compare = failing(&rt, -41);
    let err = rt
        .call_method(&list, "sort", vec![Handle::Int(0), compare])
        .unwrap_err();
    assert_eq!(err.code(), -41);
    assert_eq!(keys(&list), vec![3, 1, 2]);
}

#[test]
fn test_enumerate_aborts_on_callback_error() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 10), (2, 20), (3, 30)]);
    let seen = std::rc::Rc::new(std::cell::Cell::new(0));
    let count = std::rc::Rc::clone(&seen);
    let stop_at_two = rt
        .new_delegate("stop_at_two", move |cx, _| {
            count.set(count.get() + 1);
            if cx.arg_int(0) == 2 {
                return Err(cellvm::RuntimeError::callback(-9, "stop"));
            }
            Ok(())
        })
        .unwrap();
    let err = rt.list_enumerate(&list, &stop_at_two).unwrap_err();
    assert_eq!(err.code(), -9);
    assert_eq!(seen.get(), 2);
}

#[test]
fn test_deep_copy_of_iterator_held_by_its_list() {
    let mut rt = Runtime::new();
    let list = list_of(&rt, &[(1, 1), (2, 2)]);
    let it = rt.new_iterator(&list).unwrap();
    iter_call(&mut rt, &it, "next");
    let self_key = rt.new_string("self").unwrap();
    rt.call_method(&list, "add", vec![self_key.clone(), it.clone()])
        .unwrap();

    let copy = rt.copy_deep(&it).unwrap();
    let copied_list = copy.with_iterator(|i| i.list().clone()).unwrap();
    assert!(!copied_list.same_object(&list));
    // the copied list holds the copied iterator, not a second copy
    let stored = copied_list.with_list(|l| l.get(&self_key)).unwrap();
    assert!(stored.same_object(&copy));
    assert_eq!(iter_call(&mut rt, &copy, "key").to_int(), 2);

    // break the cycles so the lists can go
    rt.call_method(&list, "remove", vec![self_key.clone()]).unwrap();
    rt.call_method(&copied_list, "remove", vec![self_key]).unwrap();
}
