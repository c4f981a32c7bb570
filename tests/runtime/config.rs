//! Configuration and memory accounting

use std::rc::Rc;

use cellvm::{CountingAllocator, Handle, MemoryRef, Runtime, RuntimeConfig, Status};

fn cycle(rt: &Runtime) {
    let a = rt.new_array().unwrap();
    let b = rt.new_array_from(vec![a.clone()]).unwrap();
    a.with_array_mut(|arr| arr.set(0, b)).unwrap().unwrap();
}

#[test]
fn test_config_from_json() {
    let config = RuntimeConfig::from_json(
        r#"{"memory_limit": 65536, "user_data_slots": 2, "collect_on_drop": false}"#,
    )
    .unwrap();
    assert_eq!(config, RuntimeConfig::new()
        .with_memory_limit(65536)
        .with_user_data_slots(2)
        .with_collect_on_drop(false));

    let rt = Runtime::with_config(config);
    assert_eq!(rt.user_data_slots(), 2);
    assert_eq!(rt.config().memory_limit, Some(65536));
}

#[test]
fn test_unknown_fields_are_rejected() {
    let err = RuntimeConfig::from_json(r#"{"memory": 1}"#).unwrap_err();
    assert_eq!(err.status(), Status::InvalidConfig);
    let err = RuntimeConfig::from_json("not json").unwrap_err();
    assert_eq!(err.status(), Status::InvalidConfig);
}

#[test]
fn test_memory_limit_fails_allocation() {
    let rt = Runtime::with_config(RuntimeConfig::new().with_memory_limit(4096));
    let array = rt.new_array().unwrap();
    let mut pushed = 0;
    let err = loop {
        match array.with_array_mut(|a| a.push(Handle::Int(pushed))).unwrap() {
            Ok(()) => pushed += 1,
            Err(err) => break err,
        }
        assert!(pushed < 100_000, "limit never reached");
    };
    assert_eq!(err.status(), Status::OutOfMemory);
    // the failed push left the array as it was
    assert_eq!(array.with_array(|a| a.len()), Some(pushed as usize));
    assert!(rt.memory_stats().bytes_in_use <= 4096);
    assert!(rt.memory_stats().peak_bytes <= 4096);
}

#[test]
fn test_oversized_string_is_refused() {
    let rt = Runtime::with_config(RuntimeConfig::new().with_memory_limit(1024));
    let err = rt.new_string(&"x".repeat(4096)).unwrap_err();
    assert_eq!(err.status(), Status::OutOfMemory);
    assert!(rt.new_string("small").is_ok());
}

#[test]
fn test_collect_on_drop_frees_cycles() {
    let mem: MemoryRef = Rc::new(CountingAllocator::new());
    {
        let rt = Runtime::with_allocator(RuntimeConfig::default(), Rc::clone(&mem));
        cycle(&rt);
        assert!(mem.stats().bytes_in_use > 0);
    }
    assert_eq!(mem.stats().bytes_in_use, 0);

    let leaky = RuntimeConfig::default().with_collect_on_drop(false);
    {
        let rt = Runtime::with_allocator(leaky, Rc::clone(&mem));
        cycle(&rt);
    }
    // nothing broke the cycle
    assert!(mem.stats().bytes_in_use > 0);
}
