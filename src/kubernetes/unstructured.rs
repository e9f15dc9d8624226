// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Structural access to untyped objects.
//!
//! Constraints and their status records follow a schema owned by Gatekeeper
//! and the policy authors, so they are read field by field instead of being
//! deserialized into fixed types. A missing field is `Ok(None)`; walking
//! through something that is not an object is a `MalformedObject` error.

use crate::error::{OperatorError, Result};
use serde_json::{Map, Value};

/// Look up `path` inside `value`.
pub fn get_nested_field<'a>(value: &'a Value, path: &[&str]) -> Result<Option<&'a Value>> {
    let mut current = value;
    for (depth, segment) in path.iter().enumerate() {
        match current {
            Value::Object(map) => match map.get(*segment) {
                Some(next) => current = next,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            other => {
                return Err(OperatorError::MalformedObject(format!(
                    "{} is a {}, not an object",
                    path[..depth].join("."),
                    type_name(other)
                )))
            }
        }
    }
    Ok(Some(current))
}

pub fn get_nested_str<'a>(value: &'a Value, path: &[&str]) -> Result<Option<&'a str>> {
    match get_nested_field(value, path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(mismatch(path, "string", other)),
    }
}

pub fn get_nested_i64(value: &Value, path: &[&str]) -> Result<Option<i64>> {
    match get_nested_field(value, path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| mismatch(path, "integer", &Value::Number(n.clone()))),
        Some(other) => Err(mismatch(path, "integer", other)),
    }
}

pub fn get_nested_slice<'a>(value: &'a Value, path: &[&str]) -> Result<Option<&'a Vec<Value>>> {
    match get_nested_field(value, path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(mismatch(path, "list", other)),
    }
}

/// Every element must be a string, otherwise the whole field is malformed.
pub fn get_nested_string_slice(value: &Value, path: &[&str]) -> Result<Option<Vec<String>>> {
    let Some(items) = get_nested_slice(value, path)? else {
        return Ok(None);
    };

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(mismatch(path, "list of strings", other)),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Set `path` to `new`, creating intermediate objects as needed.
pub fn set_nested_field(value: &mut Value, path: &[&str], new: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *value = new;
        return Ok(());
    };

    let mut current = value;
    for segment in parents {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            other => return Err(mismatch(path, "object", other)),
        };
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), new);
            Ok(())
        }
        other => Err(mismatch(path, "object", other)),
    }
}

fn mismatch(path: &[&str], expected: &str, found: &Value) -> OperatorError {
    OperatorError::MalformedObject(format!(
        "{} should be a {}, found {}",
        path.join("."),
        expected,
        type_name(found)
    ))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
