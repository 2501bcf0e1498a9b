//! Input assembly rules (§4.3): `setInput`, `addInput`, `resetInputData`, and the
//! `ALL_PORTS` wildcard-forwarding special case.

use serde_json::{Map, Value};

use crate::schema::PortSchema;

/// The wildcard port name a task's schema can expose to receive an entire upstream
/// payload as a map, rather than per-port values (§4.3 "ALL_PORTS forwarding").
pub const ALL_PORTS: &str = "*";

/// Merge `partial` onto `current`, dropping keys the schema doesn't recognise unless
/// `additionalProperties` is set (§4.3 `setInput`). Top-level only: `current` and
/// `partial` are both expected to be JSON objects.
pub fn set_input(schema: &PortSchema, current: &Value, partial: &Value) -> Value {
    let Value::Object(current_obj) = current else {
        return partial.clone();
    };
    let Value::Object(partial_obj) = partial else {
        return current.clone();
    };
    let mut merged = current_obj.clone();
    for (key, value) in partial_obj {
        let known = schema.properties.contains_key(key) || key == ALL_PORTS;
        if known || schema.additional_properties {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Write an edge-delivered `value` into `(port)` of `current`, following the
/// array-accumulation rule (§4.3 `addInput`): if the port's declared type is `array`,
/// or the current value under that port is already an array, the incoming value is
/// appended; otherwise it replaces. Returns `(new_value, changed)` — `changed` is
/// `false` under deep equality, so a no-op write never re-triggers readiness.
pub fn add_input(port_schema: Option<&PortSchema>, current: &Value, port: &str, incoming: &Value) -> (Value, bool) {
    let Value::Object(current_obj) = current else {
        let mut map = Map::new();
        map.insert(port.to_string(), incoming.clone());
        return (Value::Object(map), true);
    };
    let mut merged = current_obj.clone();
    let existing = merged.get(port).cloned();
    let is_array_port = port_schema.map(|s| s.schema_type == crate::schema::SchemaType::Array).unwrap_or(false)
        || matches!(existing, Some(Value::Array(_)));

    let new_value = if is_array_port {
        let mut arr = match existing {
            Some(Value::Array(a)) => a,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        arr.push(incoming.clone());
        Value::Array(arr)
    } else {
        incoming.clone()
    };

    let changed = existing.as_ref() != Some(&new_value);
    merged.insert(port.to_string(), new_value);
    (Value::Object(merged), changed)
}

/// Merge `ALL_PORTS` forwarding: when the target schema exposes the wildcard port,
/// the full upstream payload is merged into the task's input as a map under that
/// port name (§4.3).
pub fn forward_all_ports(schema: &PortSchema, current: &Value, payload: &Value) -> Value {
    if !schema.properties.contains_key(ALL_PORTS) {
        return current.clone();
    }
    let Value::Object(current_obj) = current else {
        let mut map = Map::new();
        map.insert(ALL_PORTS.to_string(), payload.clone());
        return Value::Object(map);
    };
    let mut merged = current_obj.clone();
    merged.insert(ALL_PORTS.to_string(), payload.clone());
    Value::Object(merged)
}

/// Smart-clone `defaults` for `resetInputData` (§4.3): `serde_json::Value` is a tree
/// with no representation for an opaque handle or a circular reference, so a
/// structural `Value::clone()` already satisfies "deep-copy plain objects/arrays,
/// preserve opaque handles by reference" — handles live outside the JSON tree
/// entirely, as string tokens resolved via [`crate::registry::ServiceRegistry`]
/// (§9 "Resolved handles"), and a JSON tree cannot contain a cycle. This function
/// exists to name the operation at call sites and as the place future handle-bearing
/// extensions of the value model would plug in smart-clone logic.
pub fn reset_input_data(defaults: &Value) -> Value {
    defaults.clone()
}
