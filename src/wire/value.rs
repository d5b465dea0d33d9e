//! Conversions between msgpack values and JSON values.
//!
//! The engine works in `serde_json::Value` regardless of backend; the rpc
//! backend converts at the edge.

use rmpv::Value as MsgValue;
use serde_json::{Map, Number, Value};

/// Converts a decoded msgpack value into JSON.
///
/// Binary payloads become lossy UTF-8 strings. Extension values (Neovim's
/// buffer, window and tabpage handles) are unwrapped to the msgpack value they
/// carry, which is the handle number.
pub fn to_json(value: MsgValue) -> Value {
    match value {
        MsgValue::Nil => Value::Null,
        MsgValue::Boolean(b) => Value::Bool(b),
        MsgValue::Integer(i) => {
            if let Some(n) = i.as_i64() {
                Value::from(n)
            } else if let Some(n) = i.as_u64() {
                Value::from(n)
            } else {
                Value::Null
            }
        }
        MsgValue::F32(f) => float(f64::from(f)),
        MsgValue::F64(f) => float(f),
        MsgValue::String(s) => match s.into_str() {
            Some(s) => Value::String(s),
            None => Value::Null,
        },
        MsgValue::Binary(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        MsgValue::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        MsgValue::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    MsgValue::String(s) => s.into_str().unwrap_or_default(),
                    other => to_json(other).to_string(),
                };
                map.insert(key, to_json(v));
            }
            Value::Object(map)
        }
        MsgValue::Ext(_, data) => match rmpv::decode::read_value(&mut data.as_slice()) {
            Ok(inner) => to_json(inner),
            Err(_) => Value::Null,
        },
    }
}

/// Converts a JSON value into msgpack.
pub fn from_json(value: &Value) -> MsgValue {
    match value {
        Value::Null => MsgValue::Nil,
        Value::Bool(b) => MsgValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MsgValue::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                MsgValue::Integer(u.into())
            } else {
                MsgValue::F64(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => MsgValue::String(s.as_str().into()),
        Value::Array(items) => MsgValue::Array(items.iter().map(from_json).collect()),
        Value::Object(map) => MsgValue::Map(
            map.iter()
                .map(|(k, v)| (MsgValue::String(k.as_str().into()), from_json(v)))
                .collect(),
        ),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
