//! Native extension protocol tests

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cellvm::{
    CallContext, ClassId, DeepCopy, Handle, HostObject, Marker, Message, NativeObject, NativeType,
    Reply, Runtime, RuntimeError, Status,
};

/// Counter object owning one child handle.
struct Counter {
    value: i64,
    child: Handle,
    destroyed: Rc<Cell<usize>>,
}

impl NativeObject for Counter {
    fn mark(&self, marker: &mut Marker) -> Result<(), RuntimeError> {
        marker.mark(&self.child);
        Ok(())
    }

    fn copy(&self, cx: &mut DeepCopy<'_>) -> Result<Box<dyn NativeObject>, RuntimeError> {
        Ok(Box::new(Counter {
            value: self.value,
            child: cx.copy(&self.child)?,
            destroyed: Rc::clone(&self.destroyed),
        }))
    }

    fn destroy(&mut self) {
        self.destroyed.set(self.destroyed.get() + 1);
    }
}

const MEMBERS: &[&str] = &["add", "get", "setChild"];

struct CounterType {
    name: &'static str,
    destroyed: Rc<Cell<usize>>,
    events: Rc<RefCell<Vec<String>>>,
    fail_initialize: bool,
}

impl CounterType {
    fn new(name: &'static str, events: &Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            name,
            destroyed: Rc::new(Cell::new(0)),
            events: Rc::clone(events),
            fail_initialize: false,
        }
    }

    fn log(&self, event: &str) {
        self.events.borrow_mut().push(format!("{} {}", event, self.name));
    }
}

impl NativeType for CounterType {
    fn name(&self) -> &str {
        self.name
    }

    fn declaration(&self) -> Result<String, RuntimeError> {
        Ok(format!("class {} {{ add(n); get(); setChild(h); }}", self.name))
    }

    fn register(&self, _class: ClassId) -> Result<(), RuntimeError> {
        self.log("register");
        Ok(())
    }

    fn initialize(&self, _rt: &mut Runtime) -> Result<(), RuntimeError> {
        self.log("initialize");
        if self.fail_initialize {
            return Err(RuntimeError::callback(-40, "no resources"));
        }
        Ok(())
    }

    fn new_object(&self, rt: &mut Runtime, class: ClassId) -> Result<Handle, RuntimeError> {
        rt.wrap_native(
            class,
            Box::new(Counter {
                value: 0,
                child: Handle::Null,
                destroyed: Rc::clone(&self.destroyed),
            }),
        )
    }

    fn member_index(&self, name: &str) -> Option<usize> {
        MEMBERS.iter().position(|m| *m == name)
    }

    fn call_member(&self, func: usize, cx: &mut CallContext<'_>) -> Result<(), RuntimeError> {
        match MEMBERS.get(func).copied() {
            Some("add") => {
                let n = cx.arg_int(0);
                let value = cx.with_this(|c: &mut Counter| {
                    c.value += n;
                    c.value
                })?;
                cx.return_int(value);
            }
            Some("get") => {
                let value = cx.with_this(|c: &mut Counter| c.value)?;
                cx.return_int(value);
            }
            Some("setChild") => {
                let child = cx.arg_handle(0);
                cx.with_this(|c: &mut Counter| c.child = child)?;
            }
            _ => return Err(RuntimeError::unsupported("counter member")),
        }
        Ok(())
    }

    fn terminate(&self, _rt: &mut Runtime) -> Result<(), RuntimeError> {
        self.log("terminate");
        Ok(())
    }

    fn unregister(&self) -> Result<(), RuntimeError> {
        self.log("unregister");
        Ok(())
    }
}

fn setup() -> (Runtime, ClassId, Rc<Cell<usize>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let ty = CounterType::new("counter", &events);
    let destroyed = Rc::clone(&ty.destroyed);
    let mut rt = Runtime::new();
    let class = rt.register_type(Box::new(ty)).unwrap();
    (rt, class, destroyed)
}

#[test]
fn test_register_and_call_members() {
    let (mut rt, class, _) = setup();
    assert!(class >= ClassId::FIRST_NATIVE);
    assert_eq!(rt.class_of("counter"), Some(class));

    let counter = rt.new_object(class).unwrap();
    assert_eq!(rt.type_name(&counter), "counter");
    rt.call_method(&counter, "add", vec![Handle::Int(5)]).unwrap();
    let total = rt.call_method(&counter, "add", vec![Handle::Int(2)]).unwrap();
    assert_eq!(total.to_int(), 7);

    let err = rt.call_method(&counter, "missing", vec![]).unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn test_destroy_runs_once_on_release() {
    let (mut rt, class, destroyed) = setup();
    let counter = rt.new_object(class).unwrap();
    let alias = counter.clone();
    drop(counter);
    assert_eq!(destroyed.get(), 0);
    drop(alias);
    assert_eq!(destroyed.get(), 1);
    rt.collect().unwrap();
    assert_eq!(destroyed.get(), 1);
}

#[test]
fn test_destroy_runs_once_when_collected() {
    let (mut rt, class, destroyed) = setup();
    let counter = rt.new_object(class).unwrap();
    let array = rt.new_array_from(vec![counter.clone()]).unwrap();
    rt.call_method(&counter, "setChild", vec![array.clone()]).unwrap();
    drop((counter, array));
    assert_eq!(destroyed.get(), 0);

    assert_eq!(rt.collect().unwrap().collected, 2);
    assert_eq!(destroyed.get(), 1);
    rt.collect().unwrap();
    assert_eq!(destroyed.get(), 1);
}

#[test]
fn test_copy_goes_through_the_type() {
    let (mut rt, class, destroyed) = setup();
    let counter = rt.new_object(class).unwrap();
    let child = rt.new_string("child").unwrap();
    rt.call_method(&counter, "add", vec![Handle::Int(3)]).unwrap();
    rt.call_method(&counter, "setChild", vec![child.clone()]).unwrap();

    let copy = rt.copy_deep(&counter).unwrap();
    assert!(!copy.same_object(&counter));
    assert_eq!(rt.call_method(&copy, "get", vec![]).unwrap().to_int(), 3);
    rt.call_method(&copy, "add", vec![Handle::Int(1)]).unwrap();
    assert_eq!(rt.call_method(&counter, "get", vec![]).unwrap().to_int(), 3);

    let copied_child = copy.with_native(|c: &mut Counter| c.child.clone()).unwrap();
    assert!(!copied_child.same_object(&child));
    assert_eq!(copied_child.to_string_lossy().as_deref(), Some("child"));

    drop(copy);
    assert_eq!(destroyed.get(), 1);
}

#[test]
fn test_copy_of_cyclic_native_is_refused() {
    let (mut rt, class, _) = setup();
    let counter = rt.new_object(class).unwrap();
    let array = rt.new_array_from(vec![counter.clone()]).unwrap();
    rt.call_method(&counter, "setChild", vec![array.clone()]).unwrap();
    let err = rt.copy_deep(&counter).unwrap_err();
    assert_eq!(err.status(), Status::CannotCopy);
    rt.call_method(&counter, "setChild", vec![Handle::Null]).unwrap();
}

struct Opaque;

impl NativeObject for Opaque {
    fn mark(&self, _marker: &mut Marker) -> Result<(), RuntimeError> {
        Ok(())
    }
}

struct OpaqueType;

impl NativeType for OpaqueType {
    fn name(&self) -> &str {
        "opaque"
    }
}

#[test]
fn test_copy_without_support_is_cannot_copy() {
    let mut rt = Runtime::new();
    let class = rt.register_type(Box::new(OpaqueType)).unwrap();
    let object = rt.wrap_native(class, Box::new(Opaque)).unwrap();
    let err = rt.copy_deep(&object).unwrap_err();
    assert_eq!(err.status(), Status::CannotCopy);
    assert!(err.to_string().contains("opaque"));

    // optional messages the type does not implement
    assert!(rt.new_object(class).unwrap_err().is_unsupported());
    let info = rt.type_info(class).unwrap();
    assert_eq!(info.version, "0");
    assert_eq!(info.declaration, "");
    assert_eq!(info.base_name, None);
}

#[test]
fn test_wrap_native_requires_registration() {
    let rt = Runtime::new();
    let err = rt.wrap_native(ClassId(9999), Box::new(Opaque)).unwrap_err();
    assert_eq!(err.status(), Status::UnknownType);
}

#[test]
fn test_weak_handle_reports_dead_reference() {
    let (mut rt, class, destroyed) = setup();
    let host: HostObject = Rc::new(RefCell::new(Counter {
        value: 11,
        child: Handle::Null,
        destroyed: Rc::clone(&destroyed),
    }));
    let weak = rt.wrap_weak(class, &host);
    assert!(weak.is_weak());
    assert_eq!(weak.class_id(), class);
    assert_eq!(rt.call_method(&weak, "get", vec![]).unwrap().to_int(), 11);

    // copies of a weak handle refer to the same host object
    let copy = rt.copy_deep(&weak).unwrap();
    assert!(copy.same_object(&weak));

    drop(host);
    // the host owns the object, so the runtime never destroys it
    assert_eq!(destroyed.get(), 0);
    let err = rt.call_method(&weak, "get", vec![]).unwrap_err();
    assert_eq!(err.status(), Status::DeadReference);
    let err = weak.with_native(|c: &mut Counter| c.value).unwrap_err();
    assert_eq!(err.status(), Status::DeadReference);
}

#[test]
fn test_failed_initialize_undoes_registration() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut ty = CounterType::new("broken", &events);
    ty.fail_initialize = true;
    let mut rt = Runtime::new();
    let err = rt.register_type(Box::new(ty)).unwrap_err();
    assert_eq!(err.code(), -40);
    assert_eq!(rt.class_of("broken"), None);
    assert_eq!(*events.borrow(), vec!["register broken", "initialize broken"]);

    let ty = CounterType::new("broken", &events);
    assert!(rt.register_type(Box::new(ty)).is_ok());
}

#[test]
fn test_duplicate_names_are_rejected() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new();
    rt.register_type(Box::new(CounterType::new("twice", &events))).unwrap();
    let err = rt
        .register_type(Box::new(CounterType::new("twice", &events)))
        .unwrap_err();
    assert_eq!(err.status(), Status::DuplicateType);
    let err = rt.register_type(Box::new(OpaqueNamed("array"))).unwrap_err();
    assert_eq!(err.status(), Status::DuplicateType);
}

struct OpaqueNamed(&'static str);

impl NativeType for OpaqueNamed {
    fn name(&self) -> &str {
        self.0
    }
}

#[test]
fn test_teardown_runs_in_reverse_registration_order() {
    let events = Rc::new(RefCell::new(Vec::new()));
    {
        let mut rt = Runtime::new();
        rt.register_type(Box::new(CounterType::new("first", &events))).unwrap();
        rt.register_type(Box::new(CounterType::new("second", &events))).unwrap();
        events.borrow_mut().clear();
    }
    assert_eq!(
        *events.borrow(),
        vec![
            "terminate second",
            "unregister second",
            "terminate first",
            "unregister first",
        ]
    );
}

#[test]
fn test_unregister_one_type() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut rt = Runtime::new();
    let class = rt
        .register_type(Box::new(CounterType::new("gone", &events)))
        .unwrap();
    rt.unregister_type(class).unwrap();
    assert_eq!(rt.class_of("gone"), None);
    assert_eq!(rt.new_object(class).unwrap_err().status(), Status::UnknownType);

    let array = rt.class_of("array").unwrap();
    assert_eq!(
        rt.unregister_type(array).unwrap_err().status(),
        Status::InvalidArgument
    );
}

#[test]
fn test_mark_children_message() {
    let (mut rt, class, _) = setup();
    let counter = rt.new_object(class).unwrap();
    let child = rt.new_list().unwrap();
    rt.call_method(&counter, "setChild", vec![child]).unwrap();
    let reply = rt
        .send_message(class, Message::MarkChildren(counter.clone()))
        .unwrap();
    assert_eq!(reply, Reply::Marked(1));
    let reply = rt.send_message(class, Message::GetName).unwrap();
    assert_eq!(reply, Reply::Text("counter".to_string()));
}

#[test]
fn test_cycle_through_native_back_reference_is_collected() {
    let (mut rt, class, destroyed) = setup();
    let baseline = rt.gc_stats().live_objects;
    let bytes = rt.memory_stats().bytes_in_use;

    let list = rt.new_list().unwrap();
    let table = rt.new_table().unwrap();
    let owner = rt.new_object(class).unwrap();
    rt.call_method(&owner, "setChild", vec![list.clone()]).unwrap();
    table
        .with_table_mut(|t| t.set(b"owner", owner.clone()))
        .unwrap()
        .unwrap();
    list.with_list_mut(|l| l.add(Handle::Int(1), table.clone()))
        .unwrap()
        .unwrap();
    drop((list, table, owner));
    assert_eq!(rt.gc_stats().live_objects, baseline + 3);
    assert_eq!(destroyed.get(), 0);

    let report = rt.collect().unwrap();
    assert_eq!(report.collected, 3);
    assert_eq!(destroyed.get(), 1);
    assert_eq!(rt.gc_stats().live_objects, baseline);
    assert_eq!(rt.memory_stats().bytes_in_use, bytes);
}
