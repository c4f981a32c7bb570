//! Conversion between handles and `serde_json` values for hosts.
//!
//! Strings, arrays, lists and managed tables convert structurally. Objects
//! with no JSON shape (iterators, delegates, natives, weak handles) become
//! `null`, as does an object met again while it is still being converted.

use serde_json::{Map, Number, Value};

use crate::error::RuntimeError;
use crate::prelude::FxHashSet;
use crate::runtime::Runtime;
use crate::runtime::builtins::table::TableMode;
use crate::value::{Handle, Object};

impl Runtime {
    pub fn to_json(&self, handle: &Handle) -> Result<Value, RuntimeError> {
        let mut path = FxHashSet::default();
        to_json_inner(handle, &mut path)
    }

    /// Build handles from JSON. Booleans become 0/1, objects become managed
    /// tables.
    pub fn value_from_json(&self, json: &Value) -> Result<Handle, RuntimeError> {
        Ok(match json {
            Value::Null => Handle::Null,
            Value::Bool(b) => Handle::Int(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Handle::Int(i),
                None => Handle::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => self.new_string(s)?,
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.value_from_json(item))
                    .collect::<Result<Vec<_>, _>>()?;
                self.new_array_from(items)?
            }
            Value::Object(map) => {
                let table = self.new_table()?;
                for (key, value) in map {
                    let value = self.value_from_json(value)?;
                    table
                        .with_table_mut(|t| t.set(key.as_bytes(), value))
                        .ok_or(RuntimeError::Borrowed)??;
                }
                table
            }
        })
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn to_json_inner(handle: &Handle, path: &mut FxHashSet<usize>) -> Result<Value, RuntimeError> {
    let gc = match handle {
        Handle::Null | Handle::Weak(_) => return Ok(Value::Null),
        Handle::Int(i) => return Ok(Value::Number(Number::from(*i))),
        Handle::Float(f) => return Ok(float_to_json(*f)),
        Handle::Object(gc) => gc,
    };
    if !path.insert(gc.addr()) {
        return Ok(Value::Null);
    }
    let children = {
        let obj = gc.try_borrow()?;
        match &*obj {
            Object::String(s) => Shape::Text(s.to_string_lossy()),
            Object::Array(a) => Shape::Array(a.as_slice().to_vec()),
            Object::List(l) => Shape::Pairs(l.pairs()),
            Object::Table(t) if t.mode() == TableMode::Managed => Shape::Object(t.pairs()),
            _ => Shape::Opaque,
        }
    };
    let value = match children {
        Shape::Text(text) => Value::String(text),
        Shape::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| to_json_inner(item, path))
                .collect::<Result<_, _>>()?,
        ),
        Shape::Pairs(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (key, value) in &pairs {
                out.push(Value::Array(vec![
                    to_json_inner(key, path)?,
                    to_json_inner(value, path)?,
                ]));
            }
            Value::Array(out)
        }
        Shape::Object(pairs) => {
            let mut map = Map::new();
            for (key, value) in &pairs {
                let key = String::from_utf8_lossy(key).into_owned();
                map.insert(key, to_json_inner(value, path)?);
            }
            Value::Object(map)
        }
        Shape::Opaque => Value::Null,
    };
    path.remove(&gc.addr());
    Ok(value)
}

enum Shape {
    Text(String),
    Array(Vec<Handle>),
    /// List items as `[key, value]` arrays
    Pairs(Vec<(Handle, Handle)>),
    Object(Vec<(Vec<u8>, Handle)>),
    Opaque,
}
