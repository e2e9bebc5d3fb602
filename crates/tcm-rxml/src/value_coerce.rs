//! C3 — the generic, schema-driven value coercer (§4.3).
//!
//! Unlike `coerce.rs` (which walks an XML `Element` tree directly and is
//! `tcm-rxml`'s original, XML-fused coercion path), this module operates on
//! a plain `serde_json::Value` with no knowledge of where that value came
//! from. It is the piece every protocol needs regardless of wire format:
//! the JSON-in-tag protocols hand it a `serde_json::Value` parsed straight
//! out of a `{"name":...,"arguments":{...}}` payload (arguments whose leaves
//! are still strings — `"a": "10"` — because the model wrote plain text);
//! the morph-XML protocol hands it the *naive*, schema-oblivious value
//! built from the element tree (`object_from_element`, below) so that the
//! central "unwrap-wrapper" rule — converting an object into an array when
//! the schema expects one — runs in one place for every protocol.
//!
//! `coerce_value` never fails: per §7(iii), schema mismatches are swallowed
//! and the best-effort value is returned; the caller decides whether to
//! report anything through `onError`.

use crate::schema::{Schema, SchemaType};
use crate::tokenizer::Element;
use serde_json::{Map, Number, Value};

/// Build the naive, schema-oblivious value a bare XML element implies:
/// repeated same-named children become an array, a lone child becomes a
/// nested object, and a childless element becomes its raw text. No
/// type inference happens here — that's `coerce_value`'s job once it has
/// a schema to consult.
pub fn object_from_element(elem: &Element) -> Value {
    let children: Vec<&Element> = elem.child_elements().collect();
    if children.is_empty() {
        return Value::String(elem.text_content());
    }
    let mut out = Map::new();
    for child in children {
        let value = object_from_element(child);
        match out.get_mut(&child.tag_name) {
            Some(Value::Array(arr)) => arr.push(value),
            Some(existing) => {
                let prior = existing.clone();
                *existing = Value::Array(vec![prior, value]);
            }
            None => {
                out.insert(child.tag_name.clone(), value);
            }
        }
    }
    Value::Object(out)
}

/// Coerce `value` to satisfy `schema`, per the full contract of §4.3.
pub fn coerce_value(value: &Value, schema: Schema<'_>) -> Value {
    match schema.schema_type() {
        SchemaType::Object => coerce_to_object(value, schema),
        SchemaType::Array => coerce_to_array(value, schema),
        SchemaType::String => coerce_to_string(value),
        SchemaType::Number => coerce_to_number(value, false),
        SchemaType::Integer => coerce_to_number(value, true),
        SchemaType::Boolean => coerce_to_boolean(value),
        SchemaType::Null => Value::Null,
        SchemaType::Unknown => coerce_unknown(value, schema),
    }
}

fn coerce_to_string(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Null => Value::String(String::new()),
        other => Value::String(other.to_string()),
    }
}

/// Parse a numeric-looking string per §4.3's regex
/// `-?\d+(\.\d+)?([eE][+-]?\d+)?`; digit strings too large to fit remain
/// strings rather than silently becoming `Infinity`.
fn looks_numeric(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    let mut chars = s.chars().peekable();
    if matches!(chars.peek(), Some('-')) {
        chars.next();
    }
    let mut saw_digit = false;
    while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
        chars.next();
        saw_digit = true;
    }
    if !saw_digit {
        return false;
    }
    if matches!(chars.peek(), Some('.')) {
        chars.next();
        let mut saw_frac = false;
        while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
            chars.next();
            saw_frac = true;
        }
        if !saw_frac {
            return false;
        }
    }
    if matches!(chars.peek(), Some('e') | Some('E')) {
        chars.next();
        if matches!(chars.peek(), Some('+') | Some('-')) {
            chars.next();
        }
        let mut saw_exp = false;
        while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
            chars.next();
            saw_exp = true;
        }
        if !saw_exp {
            return false;
        }
    }
    chars.next().is_none()
}

fn coerce_to_number(value: &Value, integer: bool) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if !looks_numeric(trimmed) {
                return value.clone();
            }
            if integer {
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Value::Number(i.into());
                }
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => {
                    if integer && f.fract() == 0.0 {
                        Value::Number((f as i64).into())
                    } else {
                        Number::from_f64(f).map(Value::Number).unwrap_or_else(|| value.clone())
                    }
                }
                // Overflowed to Infinity, or unparsable despite looking
                // numeric (huge digit strings) — stays a string (§4.3).
                _ => value.clone(),
            }
        }
        _ => value.clone(),
    }
}

fn coerce_to_boolean(value: &Value) -> Value {
    match value {
        Value::Bool(_) => value.clone(),
        Value::String(s) => {
            if s.eq_ignore_ascii_case("true") {
                Value::Bool(true)
            } else if s.eq_ignore_ascii_case("false") {
                Value::Bool(false)
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

/// Tolerant JSON-parse of a string: real `serde_json` first, then a
/// single-quote-substitution fallback for models that write JS-object-
/// literal-style single-quoted strings instead of JSON's double quotes.
fn try_parse_json_string(s: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(s) {
        return Some(v);
    }
    let swapped = swap_quotes(s);
    serde_json::from_str(&swapped).ok()
}

fn swap_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_single = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_single => {
                in_single = true;
                out.push('"');
            }
            '\'' if in_single => {
                in_single = false;
                out.push('"');
            }
            '"' if in_single => {
                out.push('\\');
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}

fn coerce_to_object(value: &Value, schema: Schema<'_>) -> Value {
    let obj = match value {
        Value::Object(map) => map.clone(),
        Value::String(s) => match try_parse_json_string(s) {
            Some(Value::Object(map)) => map,
            Some(other) => return coerce_value(&other, schema),
            None => return value.clone(),
        },
        _ => return value.clone(),
    };

    let mut out = Map::new();
    for (key, val) in &obj {
        let resolved_key = resolve_key(key, &obj, schema);
        let child_schema = schema
            .property(&resolved_key)
            .or_else(|| schema.pattern_property_for(&resolved_key))
            .or_else(|| schema.additional_properties());
        let coerced = match child_schema {
            Some(cs) => coerce_value(val, cs),
            None if schema.additional_properties_allowed() => coerce_unknown_value(val),
            None => continue,
        };
        out.insert(resolved_key, coerced);
    }
    Value::Object(out)
}

/// Strict-object key renaming (§4.3): snake↔camel, leading-underscore
/// strip, and singular↔plural when the target property is array-typed.
/// Purely semantic aliases are never performed.
fn resolve_key(key: &str, obj: &Map<String, Value>, schema: Schema<'_>) -> String {
    if schema.has_property(key) {
        return key.to_string();
    }
    if !schema.is_strict_object() {
        return key.to_string();
    }
    let Some(props) = schema.properties() else {
        return key.to_string();
    };
    let stripped = key.trim_start_matches('_');
    let candidates: Vec<&String> = props
        .keys()
        .filter(|candidate| !obj.contains_key(candidate.as_str()))
        .collect();

    let mut matches = candidates.iter().filter(|candidate| {
        let c = candidate.as_str();
        if c.eq_ignore_ascii_case(key) || to_snake(c) == to_snake(key) {
            return true;
        }
        if to_snake(c) == to_snake(stripped) {
            return true;
        }
        let target_schema = Schema::new(&props[c.as_str()]);
        if matches!(target_schema.schema_type(), SchemaType::Array) {
            return singular(c) == singular(key) || pluralize(key) == *c || pluralize(stripped) == *c;
        }
        false
    });

    match (matches.next(), matches.next()) {
        (Some(only), None) => (*only).clone(),
        _ => key.to_string(),
    }
}

fn to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn singular(s: &str) -> String {
    s.strip_suffix('s').unwrap_or(s).to_string()
}

fn pluralize(s: &str) -> String {
    format!("{s}s")
}

fn coerce_unknown_value(value: &Value) -> Value {
    value.clone()
}

fn coerce_to_array(value: &Value, schema: Schema<'_>) -> Value {
    match value {
        Value::Array(items) => coerce_array_items(items, schema),
        Value::Object(map) => coerce_object_as_array(map, schema),
        Value::String(s) => match try_parse_json_string(s) {
            Some(v) => coerce_to_array(&v, schema),
            None => Value::Array(vec![coerce_primitive_into_item(value, schema)]),
        },
        _ => Value::Array(vec![coerce_primitive_into_item(value, schema)]),
    }
}

fn coerce_primitive_into_item(value: &Value, schema: Schema<'_>) -> Value {
    let item_schema = schema
        .prefix_items()
        .and_then(|p| p.into_iter().next())
        .or_else(|| schema.items());
    match item_schema {
        Some(s) => coerce_value(value, s),
        None => value.clone(),
    }
}

fn coerce_array_items(items: &[Value], schema: Schema<'_>) -> Value {
    if let Some(prefix_schemas) = schema.prefix_items() {
        let out: Vec<Value> = items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let s = prefix_schemas.get(i).copied().or_else(|| schema.items());
                match s {
                    Some(s) => coerce_value(v, s),
                    None => v.clone(),
                }
            })
            .collect();
        return Value::Array(out);
    }
    let item_schema = schema.items();
    let out: Vec<Value> = items
        .iter()
        .map(|v| match item_schema {
            Some(s) => coerce_value(v, s),
            None => v.clone(),
        })
        .collect();
    Value::Array(out)
}

/// The central "unwrap-wrapper" heuristic: the array schema was handed an
/// *object* value (the shape every tag-based wire format naturally produces
/// for anything that isn't a bare repeated tag). Decide what array that
/// object actually means (§4.3).
fn coerce_object_as_array(map: &Map<String, Value>, schema: Schema<'_>) -> Value {
    // (1) an `item` key: the array is `[T]` or `T[]`.
    if let Some(item_value) = map.get("item") {
        return match item_value {
            Value::Array(items) => coerce_array_items(items, schema),
            other => {
                let item_schema = schema.items();
                let coerced = match item_schema {
                    Some(s) => coerce_value(other, s),
                    None => other.clone(),
                };
                Value::Array(vec![coerced])
            }
        };
    }

    // (2) all-digit-string keys: a tuple encoded as `<0>…</0><1>…</1>`.
    if !map.is_empty() && map.keys().all(|k| k.chars().all(|c| c.is_ascii_digit())) {
        let mut entries: Vec<(u64, &Value)> = map
            .iter()
            .filter_map(|(k, v)| k.parse::<u64>().ok().map(|n| (n, v)))
            .collect();
        entries.sort_by_key(|(n, _)| *n);
        let items: Vec<Value> = entries.into_iter().map(|(_, v)| v.clone()).collect();
        return coerce_array_items(&items, schema);
    }

    // (3) exactly one key: unwrap iff the item schema doesn't itself accept
    // a property of that name (an unconstrained items schema disables
    // unwrapping entirely).
    if map.len() == 1 {
        let (key, val) = map.iter().next().unwrap();
        let item_schema = schema.items();
        let item_accepts_key = match item_schema {
            Some(s) => s.is_unconstrained() || s.accepts_property(key),
            None => false,
        };
        if !item_accepts_key {
            return match val {
                Value::Array(items) => coerce_array_items(items, schema),
                other => {
                    let coerced = match item_schema {
                        Some(s) => coerce_value(other, s),
                        None => other.clone(),
                    };
                    Value::Array(vec![coerced])
                }
            };
        }
    }

    // (4) strict object-of-parallel-arrays: every value is an array of
    // equal length >= 1, and the item schema is itself a strict object —
    // expand column-wise into an array of objects.
    if let Some(item_schema) = schema.items() {
        if item_schema.is_strict_object() {
            if let Some(expanded) = try_parallel_arrays(map, item_schema) {
                return expanded;
            }
        }
    }

    // (5) otherwise, wrap the whole object as a single-element array.
    let item_schema = schema.items();
    let coerced = match item_schema {
        Some(s) => coerce_value(&Value::Object(map.clone()), s),
        None => Value::Object(map.clone()),
    };
    Value::Array(vec![coerced])
}

pub(crate) fn try_parallel_arrays(map: &Map<String, Value>, item_schema: Schema<'_>) -> Option<Value> {
    let mut len: Option<usize> = None;
    for v in map.values() {
        let Value::Array(arr) = v else {
            return None;
        };
        if arr.is_empty() {
            return None;
        }
        match len {
            None => len = Some(arr.len()),
            Some(l) if l != arr.len() => return None,
            _ => {}
        }
    }
    let len = len?;

    let mut rows = Vec::with_capacity(len);
    for i in 0..len {
        let mut row = Map::new();
        for (key, v) in map {
            let Value::Array(arr) = v else { return None };
            let cell = &arr[i];
            let cell_schema = item_schema.property(key);
            let coerced = match cell_schema {
                Some(s) => coerce_value(cell, s),
                None => cell.clone(),
            };
            row.insert(key.clone(), coerced);
        }
        rows.push(Value::Object(row));
    }
    Some(Value::Array(rows))
}

/// No concrete schema type (an unconstrained or union schema). Best-effort:
/// try each `anyOf`/`oneOf` branch, falling back to the value unchanged.
fn coerce_unknown(value: &Value, schema: Schema<'_>) -> Value {
    if let Some(branches) = schema.any_of().or_else(|| schema.one_of()) {
        for branch in branches {
            if !matches!(branch.schema_type(), SchemaType::Unknown) {
                return coerce_value(value, branch);
            }
        }
    }
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s(v: &Value) -> Schema<'_> {
        Schema::new(v)
    }

    #[test]
    fn coerces_string_args_to_typed_values() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "boolean"}}});
        let value = json!({"a": "10", "b": "false"});
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, json!({"a": 10.0, "b": false}));
    }

    #[test]
    fn huge_digit_string_stays_a_string_number() {
        let schema = json!({"type": "number"});
        let huge = "9".repeat(400);
        let value = Value::String(huge.clone());
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, Value::String(huge));
    }

    #[test]
    fn unwrap_wrapper_single_key_not_in_item_schema() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "properties": {"city": {"type": "string"}}, "additionalProperties": false}
        });
        let value = json!({"location": {"city": "Paris"}});
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, json!([{"city": "Paris"}]));
    }

    #[test]
    fn unconstrained_items_schema_disables_unwrap() {
        let schema = json!({"type": "array", "items": true});
        let value = json!({"anything": 1});
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, json!([{"anything": 1}]));
    }

    #[test]
    fn item_key_unwraps_to_array() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        let value = json!({"item": ["a", "b"]});
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, json!(["a", "b"]));
    }

    #[test]
    fn digit_keys_sort_numerically_into_tuple() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        let value = json!({"1": "b", "0": "a"});
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, json!(["a", "b"]));
    }

    #[test]
    fn strict_object_of_parallel_arrays_expands_column_wise() {
        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {"field": {"type": "string"}, "op": {"type": "string"}, "value": {"type": "string"}},
                "additionalProperties": false
            }
        });
        let value = json!({
            "field": ["status", "amount"],
            "op": ["=", ">"],
            "value": ["paid", "100"]
        });
        let out = coerce_value(&value, s(&schema));
        assert_eq!(
            out,
            json!([
                {"field": "status", "op": "=", "value": "paid"},
                {"field": "amount", "op": ">", "value": "100"}
            ])
        );
    }

    #[test]
    fn object_from_xml_element_builds_naive_value() {
        use crate::tokenizer::{tokenize, Node, TokenizeOptions};
        let nodes = tokenize(
            "<op><field>status</field><field>amount</field><op>=</op><op>&gt;</op><value>paid</value><value>100</value></op>",
            &TokenizeOptions::default(),
        )
        .unwrap();
        let elem = nodes
            .into_iter()
            .find_map(|n| match n {
                Node::Element(e) => Some(e),
                _ => None,
            })
            .unwrap();
        let naive = object_from_element(&elem);
        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {"field": {"type": "string"}, "op": {"type": "string"}, "value": {"type": "string"}},
                "additionalProperties": false
            }
        });
        let out = coerce_value(&naive, s(&schema));
        assert_eq!(
            out,
            json!([
                {"field": "status", "op": "=", "value": "paid"},
                {"field": "amount", "op": ">", "value": "100"}
            ])
        );
    }

    #[test]
    fn idempotent_on_already_coerced_values() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "number"}}});
        let value = json!({"a": "10"});
        let once = coerce_value(&value, s(&schema));
        let twice = coerce_value(&once, s(&schema));
        assert_eq!(once, twice);
    }

    #[test]
    fn renames_plural_array_property() {
        let schema = json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "items": {"type": "string"}}},
            "additionalProperties": false
        });
        let value = json!({"tag": ["a", "b"]});
        let out = coerce_value(&value, s(&schema));
        assert_eq!(out, json!({"tags": ["a", "b"]}));
    }
}
