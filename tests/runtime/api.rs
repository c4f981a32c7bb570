//! Runtime-level API: messages, metadata, executor hook

use std::cell::Cell;
use std::rc::Rc;

use cellvm::{ClassId, Executor, Handle, Message, Reply, Runtime, RuntimeError, Status};

use super::{int_array, ints};

#[test]
fn test_builtin_metadata() {
    let mut rt = Runtime::new();
    for name in ["string", "array", "list", "iterator", "table"] {
        let class = rt.class_of(name).unwrap();
        assert!(class < ClassId::FIRST_NATIVE);
        let info = rt.type_info(class).unwrap();
        assert_eq!(info.name, name);
        assert!(info.declaration.contains(name));
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));

        let reply = rt.send_message(class, Message::GetName).unwrap();
        assert_eq!(reply, Reply::Text(name.to_string()));
    }
    assert_eq!(rt.class_name(ClassId::INT), "int");
    assert_eq!(rt.type_name(&Handle::Null), "null");
}

#[test]
fn test_messages_dispatch_to_typed_calls() {
    let mut rt = Runtime::new();
    let class = rt.class_of("array").unwrap();
    let Reply::Handle(array) = rt.send_message(class, Message::NewObject).unwrap() else {
        panic!("new-object should answer with a handle");
    };
    let length = rt
        .send_message(
            class,
            Message::CallMember {
                func: 0,
                this: array.clone(),
                args: vec![],
            },
        )
        .unwrap();
    assert_eq!(length, Reply::Handle(Handle::Int(0)));

    rt.call_method(&array, "push", vec![Handle::Int(4)]).unwrap();
    let Reply::Handle(copy) = rt
        .send_message(class, Message::CopyObject(array.clone()))
        .unwrap()
    else {
        panic!("copy-object should answer with a handle");
    };
    assert_eq!(ints(&copy), ints(&array));
    assert!(!copy.same_object(&array));

    let reply = rt.send_message(class, Message::MarkChildren(Handle::Int(1)));
    assert_eq!(reply.unwrap_err().status(), Status::InvalidArgument);
}

#[test]
fn test_unknown_class_is_reported() {
    let mut rt = Runtime::new();
    let err = rt.send_message(ClassId(4242), Message::GetName).unwrap_err();
    assert_eq!(err.status(), Status::UnknownType);
    assert_eq!(err.code(), Status::UnknownType.code());
}

/// Executor for string "functions": `neg` negates its argument, `cmp`
/// compares two integers ascending.
struct Scripted {
    calls: Rc<Cell<usize>>,
}

impl Executor for Scripted {
    fn execute(
        &self,
        rt: &mut Runtime,
        function: &Handle,
        args: Vec<Handle>,
    ) -> Result<Handle, RuntimeError> {
        self.calls.set(self.calls.get() + 1);
        assert!(rt.is_executing());
        let first = args.first().map_or(0, Handle::to_int);
        let second = args.get(1).map_or(0, Handle::to_int);
        match function.to_string_lossy().as_deref() {
            Some("neg") => Ok(Handle::Int(-first)),
            Some("cmp") => Ok(Handle::Int(first.cmp(&second) as i64)),
            Some("locked") => match rt.collect() {
                Err(err) => Err(err),
                Ok(_) => Ok(Handle::Null),
            },
            _ => Err(RuntimeError::unsupported("unknown script function")),
        }
    }
}

#[test]
fn test_executor_runs_non_delegate_functions() {
    let mut rt = Runtime::new();
    let neg = rt.new_string("neg").unwrap();
    let err = rt.execute_function(&neg, vec![Handle::Int(3)]).unwrap_err();
    assert!(err.is_unsupported());

    let calls = Rc::new(Cell::new(0));
    rt.set_executor(Rc::new(Scripted {
        calls: Rc::clone(&calls),
    }));
    let result = rt.execute_function(&neg, vec![Handle::Int(3)]).unwrap();
    assert_eq!(result.to_int(), -3);
    assert_eq!(calls.get(), 1);
    assert!(!rt.is_executing());

    let locked = rt.new_string("locked").unwrap();
    let err = rt.execute_function(&locked, vec![]).unwrap_err();
    assert_eq!(err.status(), Status::Locked);
}

#[test]
fn test_executor_comparator_sorts() {
    let mut rt = Runtime::new();
    rt.set_executor(Rc::new(Scripted {
        calls: Rc::new(Cell::new(0)),
    }));
    let array = int_array(&rt, &[3, 1, 2]);
    let cmp = rt.new_string("cmp").unwrap();
    rt.array_sort(&array, &cmp).unwrap();
    assert_eq!(ints(&array), vec![1, 2, 3]);
}

#[test]
fn test_delegates_bypass_the_executor() {
    let mut rt = Runtime::new();
    let calls = Rc::new(Cell::new(0));
    rt.set_executor(Rc::new(Scripted {
        calls: Rc::clone(&calls),
    }));
    let bound = rt
        .new_delegate_bound(
            "first_bound",
            |cx, bound| {
                cx.set_return(bound.first().cloned().unwrap_or_default());
                Ok(())
            },
            vec![Handle::Int(9)],
        )
        .unwrap();
    assert_eq!(rt.execute_function(&bound, vec![]).unwrap().to_int(), 9);
    assert_eq!(calls.get(), 0);
}
