//! C3 — schema-aware coercion of tokenizer output into JSON values.
//!
//! XML has no native types: every leaf is text. `coerce` walks a
//! `tokenizer::Node` tree alongside a `schema::Schema` and produces the
//! `serde_json::Value` a tool handler actually expects — numbers parsed out
//! of text, `"true"`/`"false"` turned into booleans, single child elements
//! folded into scalars vs. arrays depending on what the schema says, and a
//! handful of forgiving heuristics (§4.3) for the gap between "what the
//! model wrote" and "what the schema demands".

use crate::error::RxmlError;
use crate::schema::{Schema, SchemaType};
use crate::tokenizer::{Element, Node};
use serde_json::{Map, Value};

/// Coerce a single element's content into a JSON value matching `schema`.
///
/// `src` is the exact text that was tokenized into `elem` (post-repair): the
/// `String` arm below reads straight out of it via `inner_range` rather than
/// `text_content()`, because §4.4 requires a string-typed leaf's value to be
/// the raw source byte range (entities left undecoded, CDATA markers
/// stripped but content otherwise untouched) instead of the generic,
/// entity-decoded text every other (non-string) leaf gets.
pub fn coerce_element(src: &str, elem: &Element, schema: Schema<'_>) -> Result<Value, RxmlError> {
    match schema.schema_type() {
        SchemaType::Object => coerce_object(src, elem, schema),
        SchemaType::Array => coerce_array(src, elem, schema),
        SchemaType::String => Ok(Value::String(unwrap_then_raw(src, elem, schema))),
        SchemaType::Number => coerce_number(&text_or_unwrapped(elem, schema), false),
        SchemaType::Integer => coerce_number(&text_or_unwrapped(elem, schema), true),
        SchemaType::Boolean => Ok(coerce_boolean(&text_or_unwrapped(elem, schema))),
        SchemaType::Null => Ok(Value::Null),
        SchemaType::Unknown => coerce_unknown(src, elem, schema),
    }
}

/// Coerce parsed-but-schemaless text (no tool schema available — e.g. an
/// unrecognised tool name) into the best-guess JSON the raw text implies:
/// numbers and booleans recognised textually, everything else a string.
pub fn coerce_text_best_effort(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

fn text_or_unwrapped(elem: &Element, schema: Schema<'_>) -> String {
    unwrap_then(elem, schema, |e| e.text_content())
}

/// Some models wrap a scalar leaf in a spurious extra element — e.g.
/// `<city><value>Paris</value></city>` where the schema says `city` is a
/// plain string. When an element expected to be a scalar instead has
/// exactly one child element and no useful direct text, unwrap into that
/// child before reading text (§4.3 unwrap-wrapper heuristic).
fn unwrap_then<T>(elem: &Element, schema: Schema<'_>, read: impl Fn(&Element) -> T) -> T
where
    T: AsRef<str>,
{
    let direct = read(elem);
    if !direct.as_ref().trim().is_empty() {
        return direct;
    }
    let children: Vec<&Element> = elem.child_elements().collect();
    if children.len() == 1 && !matches!(schema.schema_type(), SchemaType::Object | SchemaType::Array) {
        return read(children[0]);
    }
    direct
}

/// The string-typed twin of `unwrap_then`: reads the raw source slice
/// (`raw_text_of`) instead of the entity-decoded `text_content()`.
fn unwrap_then_raw(src: &str, elem: &Element, schema: Schema<'_>) -> String {
    let direct = raw_text_of(src, elem);
    if !direct.trim().is_empty() {
        return direct;
    }
    let children: Vec<&Element> = elem.child_elements().collect();
    if children.len() == 1 && !matches!(schema.schema_type(), SchemaType::Object | SchemaType::Array) {
        return raw_text_of(src, children[0]);
    }
    direct
}

/// The raw source slice an element's `inner_range` spans — CDATA markers
/// already stripped by the tokenizer, entities left undecoded, exactly §4.4's
/// "raw inner text ... extracted from the original source byte range".
fn raw_text_of(src: &str, elem: &Element) -> String {
    match elem.inner_range {
        Some((start, end)) => src[start..end].to_string(),
        None => String::new(),
    }
}

fn coerce_number(text: &str, integer: bool) -> Result<Value, RxmlError> {
    let trimmed = text.trim();
    if integer {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        // Tolerate "3.0"-shaped integers.
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.fract() == 0.0 {
                return Ok(Value::Number((f as i64).into()));
            }
        }
    } else if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Ok(Value::Number(n));
        }
    }
    Err(RxmlError::SchemaCoercion {
        path: String::new(),
        message: format!("{trimmed:?} is not a valid {}", if integer { "integer" } else { "number" }),
    })
}

fn coerce_boolean(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        Value::Bool(true)
    } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        Value::Bool(false)
    } else {
        Value::String(text.to_string())
    }
}

fn coerce_object(src: &str, elem: &Element, schema: Schema<'_>) -> Result<Value, RxmlError> {
    let mut out = Map::new();
    for child in elem.child_elements() {
        let key = resolve_object_key(&child.tag_name, schema);
        let value = match schema.property(&key) {
            Some(child_schema) => coerce_element(src, child, child_schema)?,
            None if schema.additional_properties_allowed() => {
                match schema.additional_properties() {
                    Some(ap_schema) => coerce_element(src, child, ap_schema)?,
                    None => coerce_unknown(src, child, schema)?,
                }
            }
            None => continue,
        };
        insert_allowing_repeats(&mut out, key, value);
    }
    Ok(Value::Object(out))
}

/// Strict-object key renaming: if the schema names a property that differs
/// from the tag only in case or `snake_case`/`camelCase` convention, map
/// onto the schema's spelling rather than rejecting the field outright
/// (§4.3).
fn resolve_object_key(tag: &str, schema: Schema<'_>) -> String {
    if schema.has_property(tag) {
        return tag.to_string();
    }
    if let Some(props) = schema.properties() {
        for key in props.keys() {
            if key.eq_ignore_ascii_case(tag) || to_snake_case(key) == to_snake_case(tag) {
                return key.clone();
            }
        }
    }
    tag.to_string()
}

fn to_snake_case(s: &str) -> String {
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

/// When the same key appears twice under an object (e.g. repeated child
/// tags that should really have been an array), promote it into an array
/// on the second occurrence rather than silently overwriting — unless the
/// schema marks the field as a plain string, in which case the duplicate
/// is a caller-visible error (handled upstream by the duplicate-string-tag
/// check before `coerce` ever runs).
fn insert_allowing_repeats(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(arr)) => arr.push(value),
        Some(existing) => {
            let prior = existing.clone();
            *existing = Value::Array(vec![prior, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

fn coerce_array(src: &str, elem: &Element, schema: Schema<'_>) -> Result<Value, RxmlError> {
    let children: Vec<&Element> = elem.child_elements().collect();

    // Strict object-of-parallel-arrays (§4.3): the children aren't a single
    // repeated tag naming one array item, they're several distinct tags —
    // `<field>..<field>..<op>..<op>..<value>..<value>` — each holding one
    // column of the eventual array of objects. Detect that shape up front
    // and hand it to the generic column-wise expander.
    if let Some(item_schema) = schema.items() {
        if item_schema.is_strict_object() {
            let mut distinct_tags: Vec<&str> = Vec::new();
            for c in &children {
                if !distinct_tags.contains(&c.tag_name.as_str()) {
                    distinct_tags.push(c.tag_name.as_str());
                }
            }
            if distinct_tags.len() > 1 && distinct_tags.iter().all(|t| item_schema.has_property(t)) {
                let mut columns = Map::new();
                for tag in &distinct_tags {
                    let col_schema = item_schema.property(tag);
                    let values: Vec<Value> = children
                        .iter()
                        .filter(|c| c.tag_name == *tag)
                        .map(|c| match col_schema {
                            Some(s) => coerce_element(src, c, s).unwrap_or_else(|_| Value::String(c.text_content())),
                            None => Value::String(c.text_content()),
                        })
                        .collect();
                    columns.insert(tag.to_string(), Value::Array(values));
                }
                if let Some(expanded) = crate::value_coerce::try_parallel_arrays(&columns, item_schema) {
                    return Ok(expanded);
                }
            }
        }
    }

    if let Some(prefix_schemas) = schema.prefix_items() {
        let mut items = Vec::with_capacity(children.len());
        for (i, child) in children.iter().enumerate() {
            let item_schema = prefix_schemas
                .get(i)
                .copied()
                .or_else(|| schema.items());
            items.push(match item_schema {
                Some(s) => coerce_element(src, child, s)?,
                None => coerce_unknown(src, child, schema)?,
            });
        }
        return Ok(Value::Array(items));
    }

    let item_schema = schema.items();
    let mut items = Vec::with_capacity(children.len());
    for child in &children {
        items.push(match item_schema {
            Some(s) => coerce_element(src, child, s)?,
            None => coerce_unknown(src, child, schema)?,
        });
    }

    // A lone array-typed element with no item children but text content —
    // some protocols flatten a single-element array to a bare scalar.
    if items.is_empty() {
        let text = elem.text_content();
        if !text.trim().is_empty() {
            return Ok(Value::Array(vec![coerce_text_best_effort(&text)]));
        }
    }

    Ok(Value::Array(items))
}

/// No concrete schema type to guide us (an `anyOf`/`oneOf` union, or a
/// schema-less additional property). Try each branch of a union in turn,
/// falling back to best-effort text coercion.
fn coerce_unknown(src: &str, elem: &Element, schema: Schema<'_>) -> Result<Value, RxmlError> {
    if let Some(branches) = schema.any_of().or_else(|| schema.one_of()) {
        for branch in branches {
            if let Ok(value) = coerce_element(src, elem, branch) {
                return Ok(value);
            }
        }
    }
    if elem.children.is_empty() {
        return Ok(Value::Null);
    }
    if elem.child_elements().next().is_some() {
        let mut out = Map::new();
        for child in elem.child_elements() {
            insert_allowing_repeats(&mut out, child.tag_name.clone(), coerce_node_best_effort(child));
        }
        return Ok(Value::Object(out));
    }
    Ok(coerce_text_best_effort(&elem.text_content()))
}

fn coerce_node_best_effort(elem: &Element) -> Value {
    if elem.child_elements().next().is_some() {
        let mut out = Map::new();
        for child in elem.child_elements() {
            insert_allowing_repeats(&mut out, child.tag_name.clone(), coerce_node_best_effort(child));
        }
        Value::Object(out)
    } else {
        coerce_text_best_effort(&elem.text_content())
    }
}

/// Canonicalise a leaf string value against a schema `enum`, per §4.3. Call
/// this after `coerce_element` has already produced a `String` for a
/// string-typed field with an `enum` constraint.
pub fn canonicalize_enum(value: Value, schema: Schema<'_>) -> Value {
    if let Value::String(s) = &value {
        if let Some(canonical) = schema.canonical_enum_match(s) {
            return Value::String(canonical.to_string());
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{tokenize, TokenizeOptions};
    use serde_json::json;

    fn parse_one(xml: &str) -> Element {
        let nodes = tokenize(xml, &TokenizeOptions::default()).unwrap();
        nodes
            .into_iter()
            .find_map(|n| match n {
                Node::Element(e) => Some(e),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn coerces_scalar_leaves() {
        let schema_val = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "ratio": {"type": "number"},
                "active": {"type": "boolean"},
                "name": {"type": "string"}
            }
        });
        let src = "<args><count>3</count><ratio>1.5</ratio><active>true</active><name>x</name></args>";
        let elem = parse_one(src);
        let out = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        assert_eq!(out["count"], json!(3));
        assert_eq!(out["ratio"], json!(1.5));
        assert_eq!(out["active"], json!(true));
        assert_eq!(out["name"], json!("x"));
    }

    #[test]
    fn unwraps_spurious_wrapper_element() {
        let schema_val = json!({"type": "object", "properties": {"city": {"type": "string"}}});
        let src = "<args><city><value>Paris</value></city></args>";
        let elem = parse_one(src);
        let out = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        assert_eq!(out["city"], json!("Paris"));
    }

    #[test]
    fn renames_key_by_case_convention() {
        let schema_val = json!({"type": "object", "properties": {"cityName": {"type": "string"}}});
        let src = "<args><city_name>Paris</city_name></args>";
        let elem = parse_one(src);
        let out = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        assert_eq!(out["cityName"], json!("Paris"));
    }

    #[test]
    fn repeated_children_promote_to_array() {
        let schema_val = json!({
            "type": "object",
            "properties": {"items": {"type": "array", "items": {"type": "string"}}}
        });
        let src = "<args><items>a</items><items>b</items></args>";
        let elem = parse_one(src);
        let out = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        assert_eq!(out["items"], json!(["a", "b"]));
    }

    #[test]
    fn enum_canonicalisation_ignores_case() {
        let schema_val = json!({"type": "string", "enum": ["celsius", "fahrenheit"]});
        let src = "<unit>Celsius</unit>";
        let elem = parse_one(src);
        let raw = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        let canon = canonicalize_enum(raw, Schema::new(&schema_val));
        assert_eq!(canon, json!("celsius"));
    }

    #[test]
    fn prefix_items_coerce_positionally() {
        let schema_val = json!({
            "type": "array",
            "prefixItems": [{"type": "integer"}, {"type": "string"}]
        });
        let src = "<pair><a>1</a><b>two</b></pair>";
        let elem = parse_one(src);
        let out = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        assert_eq!(out, json!([1, "two"]));
    }

    #[test]
    fn string_leaf_preserves_raw_entities_while_siblings_decode() {
        let schema_val = json!({
            "type": "object",
            "properties": {"op": {"type": "string"}, "count": {"type": "integer"}}
        });
        let src = "<args><op>a &gt; b</op><count>3</count></args>";
        let elem = parse_one(src);
        let out = coerce_element(src, &elem, Schema::new(&schema_val)).unwrap();
        assert_eq!(out["op"], json!("a &gt; b"));
        assert_eq!(out["count"], json!(3));
    }
}
