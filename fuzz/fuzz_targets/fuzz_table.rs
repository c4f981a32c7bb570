#![no_main]

use std::collections::BTreeMap;

use cellvm::{Handle, Runtime};
use libfuzzer_sys::fuzz_target;

// Each op is: tag byte, key length byte, key bytes.
fuzz_target!(|data: &[u8]| {
    let rt = Runtime::new();
    let table = rt.new_table().unwrap();
    let mut model: BTreeMap<Vec<u8>, i64> = BTreeMap::new();

    let mut rest = data;
    let mut counter = 0i64;
    while let [tag, len, tail @ ..] = rest {
        let len = (*len as usize % 8).min(tail.len());
        let (key, tail) = tail.split_at(len);
        rest = tail;
        counter += 1;
        match tag % 4 {
            0 | 1 => {
                table.with_table_mut(|t| t.set(key, Handle::Int(counter))).unwrap().unwrap();
                model.insert(key.to_vec(), counter);
            }
            2 => {
                let removed = table.with_table_mut(|t| t.remove(key)).unwrap();
                assert_eq!(removed, model.remove(key).is_some());
            }
            _ => table.with_table_mut(|t| t.cleanup()).unwrap().unwrap(),
        }
        assert_eq!(table.with_table(|t| t.len()), Some(model.len()));
    }

    for (key, value) in &model {
        assert_eq!(table.with_table(|t| t.get(key).to_int()), Some(*value));
    }
    let mut keys = table.with_table(|t| t.keys()).unwrap();
    keys.sort();
    assert_eq!(keys, model.keys().cloned().collect::<Vec<_>>());

    for key in model.keys() {
        table.with_table_mut(|t| t.remove(key)).unwrap();
    }
    table.with_table_mut(|t| t.cleanup()).unwrap().unwrap();
    assert_eq!(table.with_table(|t| t.node_count()), Some(1));
});
