//! Collector tests: cycles, roots and failure modes

use std::cell::RefCell;
use std::rc::Rc;

use cellvm::{
    GcParticipant, Handle, Marker, NativeObject, NativeType, Runtime, RuntimeError, Status,
};

/// Two arrays referencing each other. Returns both handles.
fn cycle(rt: &Runtime) -> (Handle, Handle) {
    let a = rt.new_array().unwrap();
    let b = rt.new_array().unwrap();
    a.with_array_mut(|arr| arr.set(0, b.clone())).unwrap().unwrap();
    b.with_array_mut(|arr| arr.set(0, a.clone())).unwrap().unwrap();
    (a, b)
}

fn live(rt: &Runtime) -> usize {
    rt.gc_stats().live_objects
}

#[test]
fn test_unreachable_cycle_is_freed() {
    let mut rt = Runtime::new();
    let baseline = live(&rt);
    let bytes = rt.memory_stats().bytes_in_use;
    let (a, b) = cycle(&rt);
    drop((a, b));
    // reference counting alone cannot free them
    assert_eq!(live(&rt), baseline + 2);

    let report = rt.collect().unwrap();
    assert_eq!(report.collected, 2);
    assert_eq!(live(&rt), baseline);
    assert_eq!(rt.memory_stats().bytes_in_use, bytes);
}

#[test]
fn test_host_held_cycle_survives() {
    let mut rt = Runtime::new();
    let (a, b) = cycle(&rt);
    drop(b);
    let report = rt.collect().unwrap();
    assert_eq!(report.collected, 0);
    let inner = a.with_array(|arr| arr.get(0)).unwrap();
    let back = inner.with_array(|arr| arr.get(0)).unwrap();
    assert!(back.same_object(&a));
}

#[test]
fn test_globals_are_roots() {
    let mut rt = Runtime::new();
    let (a, b) = cycle(&rt);
    rt.set_global("keep", a).unwrap();
    drop(b);
    let before = live(&rt);
    rt.collect().unwrap();
    assert_eq!(live(&rt), before);
    assert_eq!(rt.global("keep").with_array(|arr| arr.len()), Some(1));

    rt.set_global("keep", Handle::Null).unwrap();
    let report = rt.collect().unwrap();
    assert_eq!(report.collected, 2);
}

#[test]
fn test_user_data_slots_are_roots() {
    let mut rt = Runtime::new();
    let baseline = live(&rt);
    let (a, b) = cycle(&rt);
    rt.set_user_data(0, a).unwrap();
    drop(b);
    rt.collect().unwrap();
    assert_eq!(live(&rt), baseline + 2);

    rt.set_user_data(0, Handle::Null).unwrap();
    rt.collect().unwrap();
    assert_eq!(live(&rt), baseline);
}

struct Holder {
    handles: RefCell<Vec<Handle>>,
    fail: bool,
}

impl GcParticipant for Holder {
    fn mark(&self, marker: &mut Marker) -> Result<(), RuntimeError> {
        if self.fail {
            return Err(RuntimeError::callback(-9, "participant refused"));
        }
        marker.mark_all(self.handles.borrow().iter());
        Ok(())
    }
}

#[test]
fn test_participant_roots_and_removal() {
    let mut rt = Runtime::new();
    let baseline = live(&rt);
    let (a, b) = cycle(&rt);
    let holder = Rc::new(Holder {
        handles: RefCell::new(vec![a]),
        fail: false,
    });
    drop(b);
    let id = rt.add_participant(holder.clone());
    rt.collect().unwrap();
    assert_eq!(live(&rt), baseline + 2);

    assert!(rt.remove_participant(id));
    assert!(!rt.remove_participant(id));
    holder.handles.borrow_mut().clear();
    rt.collect().unwrap();
    assert_eq!(live(&rt), baseline);
}

#[test]
fn test_failing_participant_releases_nothing() {
    let mut rt = Runtime::new();
    let baseline = live(&rt);
    drop(cycle(&rt));
    rt.add_participant(Rc::new(Holder {
        handles: RefCell::new(Vec::new()),
        fail: true,
    }));
    let err = rt.collect().unwrap_err();
    assert_eq!(err.code(), -9);
    assert_eq!(live(&rt), baseline + 2);
}

struct Faulty;

impl NativeObject for Faulty {
    fn mark(&self, _marker: &mut Marker) -> Result<(), RuntimeError> {
        Err(RuntimeError::unsupported("mark"))
    }
}

struct FaultyType;

impl NativeType for FaultyType {
    fn name(&self) -> &str {
        "faulty"
    }
}

#[test]
fn test_mark_failure_aborts_before_sweep() {
    let mut rt = Runtime::new();
    let class = rt.register_type(Box::new(FaultyType)).unwrap();
    let baseline = live(&rt);
    drop(cycle(&rt));
    let faulty = rt.wrap_native(class, Box::new(Faulty)).unwrap();

    match rt.collect() {
        Err(RuntimeError::MarkFailed { type_name, .. }) => assert_eq!(type_name, "faulty"),
        other => panic!("expected a mark failure, got {:?}", other),
    }
    assert_eq!(live(&rt), baseline + 3);

    drop(faulty);
    let report = rt.collect().unwrap();
    assert_eq!(report.collected, 2);
    assert_eq!(live(&rt), baseline);
}

#[test]
fn test_collect_is_locked_while_executing() {
    let mut rt = Runtime::new();
    let check = rt
        .new_delegate("check", |cx, _| {
            let code = match cx.runtime().collect() {
                Ok(_) => 0,
                Err(err) => err.code(),
            };
            cx.return_int(i64::from(code));
            Ok(())
        })
        .unwrap();
    let code = rt.execute_function(&check, vec![]).unwrap().to_int();
    assert_eq!(code, i64::from(Status::Locked.code()));
    assert!(!rt.is_executing());
    assert!(rt.collect().is_ok());
}

#[test]
fn test_delegate_bound_handles_are_traced() {
    let mut rt = Runtime::new();
    let baseline = live(&rt);
    let array = rt.new_array().unwrap();
    let delegate = rt
        .new_delegate_bound("bound", |_, _| Ok(()), vec![array.clone()])
        .unwrap();
    array
        .with_array_mut(|arr| arr.set(0, delegate.clone()))
        .unwrap()
        .unwrap();
    drop(array);

    // held through the delegate
    assert_eq!(rt.collect().unwrap().collected, 0);
    assert_eq!(live(&rt), baseline + 2);

    drop(delegate);
    assert_eq!(rt.collect().unwrap().collected, 2);
    assert_eq!(live(&rt), baseline);
}

#[test]
fn test_list_and_table_cycles_are_freed() {
    let mut rt = Runtime::new();
    let baseline = live(&rt);
    let list = rt.new_list().unwrap();
    let table = rt.new_table().unwrap();
    list.with_list_mut(|l| l.add(Handle::Int(1), table.clone()))
        .unwrap()
        .unwrap();
    table
        .with_table_mut(|t| t.set(b"list", list.clone()))
        .unwrap()
        .unwrap();
    let iter = rt.new_iterator(&list).unwrap();
    drop((list, table));
    rt.collect().unwrap();
    // the iterator keeps its list, and so the table, alive
    assert_eq!(live(&rt), baseline + 3);

    drop(iter);
    rt.collect().unwrap();
    assert_eq!(live(&rt), baseline);
}

#[test]
fn test_acyclic_graph_frees_itself_without_collect() {
    let rt = Runtime::new();
    let baseline = live(&rt);
    let bytes = rt.memory_stats().bytes_in_use;
    {
        let array = rt.new_array().unwrap();
        for i in 0..8 {
            let table = rt.new_table().unwrap();
            let name = rt.new_string(&format!("entry {}", i)).unwrap();
            table.with_table_mut(|t| t.set(b"name", name)).unwrap().unwrap();
            array.with_array_mut(|a| a.set(i, table)).unwrap().unwrap();
        }
        assert_eq!(live(&rt), baseline + 17);
        assert!(rt.memory_stats().bytes_in_use > bytes);
    }
    // released by reference counting alone
    assert_eq!(live(&rt), baseline);
    assert_eq!(rt.memory_stats().bytes_in_use, bytes);
}
