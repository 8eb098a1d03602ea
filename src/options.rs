//! Typed lookups over a loosely typed configuration map.
//!
//! Values are coerced leniently: numeric strings parse, booleans count as
//! `0`/`1`, scalars stringify, and `null` is the zero value of a scalar.
//! Anything else that cannot be coerced, including a `null` map, yields
//! [`OptionError::TypeMismatch`]; an absent key yields [`OptionError::Missing`].

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::OptionError;

/// Untyped key/value configuration, as loaded from JSON, YAML or built inline.
pub type ConfigMap = Map<String, Value>;

type OptionResult<T> = std::result::Result<T, OptionError>;

fn lookup<'a>(options: &'a ConfigMap, key: &str) -> OptionResult<&'a Value> {
    options.get(key).ok_or_else(|| OptionError::Missing {
        key: key.to_owned(),
    })
}

fn mismatch(key: &str, expected: &'static str) -> OptionError {
    OptionError::TypeMismatch {
        key: key.to_owned(),
        expected,
    }
}

/// Resolves `key` as a string.
pub fn get_string(options: &ConfigMap, key: &str) -> OptionResult<String> {
    match lookup(options, key)? {
        Value::String(value) => Ok(value.clone()),
        Value::Number(value) => Ok(value.to_string()),
        Value::Bool(value) => Ok(value.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(mismatch(key, "string")),
    }
}

/// Resolves `key` as an integer. Floats are truncated, `null` is zero.
pub fn get_int(options: &ConfigMap, key: &str) -> OptionResult<i64> {
    match lookup(options, key)? {
        Value::Number(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|float| float.trunc() as i64))
            .ok_or_else(|| mismatch(key, "int")),
        Value::String(value) => value.trim().parse().map_err(|_| mismatch(key, "int")),
        Value::Bool(value) => Ok(i64::from(*value)),
        Value::Null => Ok(0),
        _ => Err(mismatch(key, "int")),
    }
}

/// Resolves `key` as a millisecond count. Negative values clamp to zero.
pub fn get_millis(options: &ConfigMap, key: &str) -> OptionResult<Duration> {
    get_int(options, key).map(|millis| Duration::from_millis(millis.max(0) as u64))
}

/// Resolves `key` as a float.
pub fn get_float(options: &ConfigMap, key: &str) -> OptionResult<f64> {
    match lookup(options, key)? {
        Value::Number(value) => value.as_f64().ok_or_else(|| mismatch(key, "float")),
        Value::String(value) => value.trim().parse().map_err(|_| mismatch(key, "float")),
        Value::Bool(value) => Ok(if *value { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        _ => Err(mismatch(key, "float")),
    }
}

/// Resolves `key` as a nested map.
///
/// A string holding a JSON object is accepted as well. `null` is a mismatch.
pub fn get_map(options: &ConfigMap, key: &str) -> OptionResult<ConfigMap> {
    match lookup(options, key)? {
        Value::Object(map) => Ok(map.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(mismatch(key, "map")),
        },
        _ => Err(mismatch(key, "map")),
    }
}

/// Resolves `key` as a nested map and stringifies every value.
pub fn get_string_map(options: &ConfigMap, key: &str) -> OptionResult<HashMap<String, String>> {
    get_map(options, key).map(|map| stringify_map(&map))
}

/// Stringifies every value of `map`: strings verbatim, other scalars via
/// their display form, `null` as the empty string.
pub fn stringify_map(map: &ConfigMap) -> HashMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), stringify(value)))
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
