//! A thin read-only accessor over a JSON-Schema `serde_json::Value`.
//!
//! `tcm-core`'s protocol implementations hand each tool's `inputSchema`
//! straight through to `rxml::parse`/`coerce` as an opaque JSON value —
//! this wrapper is the only place that actually reads into its shape, so
//! every other component stays oblivious to JSON-Schema's dialect quirks
//! (e.g. the `{"type": "array", "items": {...}}` vs tuple-`items` split).

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
    /// No `type` keyword present, or an unrecognised one — treat the value
    /// as opaque and pass it through uncoerced.
    Unknown,
}

/// A borrowed view over one schema node. Cheap to construct; never
/// allocates beyond what `.to_owned()` calls explicitly ask for.
#[derive(Debug, Clone, Copy)]
pub struct Schema<'a> {
    value: &'a Value,
}

impl<'a> Schema<'a> {
    pub fn new(value: &'a Value) -> Self {
        // Tools described via a wrapping `{"jsonSchema": {...}}` envelope
        // (some SDKs serialize tool parameter schemas this way) are
        // unwrapped transparently here so every accessor below just sees
        // the real schema.
        match value.get("jsonSchema") {
            Some(inner) if inner.is_object() => Schema { value: inner },
            _ => Schema { value },
        }
    }

    pub fn value(&self) -> &'a Value {
        self.value
    }

    pub fn schema_type(&self) -> SchemaType {
        match self.value.get("type").and_then(Value::as_str) {
            Some("string") => SchemaType::String,
            Some("number") => SchemaType::Number,
            Some("integer") => SchemaType::Integer,
            Some("boolean") => SchemaType::Boolean,
            Some("object") => SchemaType::Object,
            Some("array") => SchemaType::Array,
            Some("null") => SchemaType::Null,
            _ => {
                // No explicit `type` keyword: infer from shape (§4.3 "type
                // inference"). Object wins over array when a schema somehow
                // carries both sets of keywords — `properties` is a
                // stronger signal of "this is a record" than `items` is.
                if self.value.get("properties").is_some()
                    || self.value.get("patternProperties").is_some()
                    || matches!(self.value.get("additionalProperties"), Some(v) if v.is_object())
                {
                    SchemaType::Object
                } else if self.value.get("items").is_some() || self.value.get("prefixItems").is_some() {
                    SchemaType::Array
                } else {
                    SchemaType::Unknown
                }
            }
        }
    }

    pub fn properties(&self) -> Option<&'a serde_json::Map<String, Value>> {
        self.value.get("properties").and_then(Value::as_object)
    }

    pub fn property(&self, name: &str) -> Option<Schema<'a>> {
        self.properties()
            .and_then(|props| props.get(name))
            .map(Schema::new)
    }

    /// True when the schema names `name` among `properties`, including
    /// through a single level of `allOf`/`anyOf` merge — used by callers
    /// who need to know "would this tag name make sense here" without
    /// fully coercing (e.g. the unwrap-wrapper heuristic in `coerce.rs`).
    pub fn has_property(&self, name: &str) -> bool {
        if self.properties().map_or(false, |p| p.contains_key(name)) {
            return true;
        }
        for combinator in ["allOf", "anyOf", "oneOf"] {
            if let Some(Value::Array(variants)) = self.value.get(combinator) {
                for variant in variants {
                    if Schema::new(variant).has_property(name) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn required(&self) -> Vec<&'a str> {
        self.value
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn additional_properties(&self) -> Option<Schema<'a>> {
        match self.value.get("additionalProperties") {
            Some(v) if v.is_object() => Some(Schema::new(v)),
            _ => None,
        }
    }

    pub fn additional_properties_allowed(&self) -> bool {
        match self.value.get("additionalProperties") {
            Some(Value::Bool(b)) => *b,
            _ => true,
        }
    }

    pub fn pattern_properties(&self) -> Option<&'a serde_json::Map<String, Value>> {
        self.value.get("patternProperties").and_then(Value::as_object)
    }

    /// The `patternProperties` schema whose pattern matches `key`, if any.
    pub fn pattern_property_for(&self, key: &str) -> Option<Schema<'a>> {
        let patterns = self.pattern_properties()?;
        for (pattern, schema) in patterns {
            if let Ok(re) = regex::Regex::new(pattern) {
                if re.is_match(key) {
                    return Some(Schema::new(schema));
                }
            }
        }
        None
    }

    /// A "strict object": `additionalProperties: false` with a `properties`
    /// map — the schema shape that unlocks the array-of-parallel-arrays
    /// column-wise expansion (§4.3) and disables unwrap for ambiguous keys.
    pub fn is_strict_object(&self) -> bool {
        matches!(self.value.get("additionalProperties"), Some(Value::Bool(false)))
            && self.properties().is_some()
    }

    /// True when this schema imposes no constraint at all — `true`, `{}`,
    /// or `null` — the "unconstrained schema" convention from §9 that
    /// permits any property and disables the unwrap-wrapper heuristic.
    pub fn is_unconstrained(&self) -> bool {
        match self.value {
            Value::Bool(b) => *b,
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Would this schema accept a property named `key`, considering
    /// `properties`, `patternProperties`, `additionalProperties`, and every
    /// branch of `anyOf`/`oneOf`/`allOf` (§9's `schemaHasProperty`)?
    pub fn accepts_property(&self, key: &str) -> bool {
        if self.is_unconstrained() {
            return true;
        }
        if self.has_property(key) {
            return true;
        }
        if self.pattern_property_for(key).is_some() {
            return true;
        }
        if self.properties().is_some() || self.pattern_properties().is_some() {
            if self.additional_properties_allowed() {
                return true;
            }
        }
        for combinator in ["anyOf", "oneOf", "allOf"] {
            if let Some(Value::Array(variants)) = self.value.get(combinator) {
                if variants.iter().any(|v| Schema::new(v).accepts_property(key)) {
                    return true;
                }
            }
        }
        false
    }

    /// Single-schema `items` (list validation). Tuple-style `prefixItems`
    /// is handled separately by `prefix_items`.
    pub fn items(&self) -> Option<Schema<'a>> {
        match self.value.get("items") {
            Some(v) if v.is_object() => Some(Schema::new(v)),
            _ => None,
        }
    }

    pub fn prefix_items(&self) -> Option<Vec<Schema<'a>>> {
        self.value
            .get("prefixItems")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Schema::new).collect())
    }

    pub fn enum_values(&self) -> Option<&'a Vec<Value>> {
        self.value.get("enum").and_then(Value::as_array)
    }

    /// Case-insensitive lookup against `enum`, for the enum-canonicalisation
    /// heuristic (§4.3) that forgives a model emitting `"Paris"` when the
    /// schema only allows `"paris"`.
    pub fn canonical_enum_match(&self, candidate: &str) -> Option<&'a str> {
        self.enum_values()?.iter().find_map(|v| {
            let s = v.as_str()?;
            if s.eq_ignore_ascii_case(candidate) {
                Some(s)
            } else {
                None
            }
        })
    }

    pub fn any_of(&self) -> Option<Vec<Schema<'a>>> {
        self.value
            .get("anyOf")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Schema::new).collect())
    }

    pub fn one_of(&self) -> Option<Vec<Schema<'a>>> {
        self.value
            .get("oneOf")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Schema::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_json_schema_envelope() {
        let wrapped = json!({"jsonSchema": {"type": "string"}});
        let schema = Schema::new(&wrapped);
        assert_eq!(schema.schema_type(), SchemaType::String);
    }

    #[test]
    fn has_property_descends_allof() {
        let schema_val = json!({
            "allOf": [
                {"properties": {"city": {"type": "string"}}},
            ]
        });
        let schema = Schema::new(&schema_val);
        assert!(schema.has_property("city"));
        assert!(!schema.has_property("country"));
    }

    #[test]
    fn canonical_enum_match_is_case_insensitive() {
        let schema_val = json!({"enum": ["celsius", "fahrenheit"]});
        let schema = Schema::new(&schema_val);
        assert_eq!(schema.canonical_enum_match("Celsius"), Some("celsius"));
        assert_eq!(schema.canonical_enum_match("kelvin"), None);
    }

    #[test]
    fn infers_object_type_from_properties_without_type_keyword() {
        let schema_val = json!({"properties": {"x": {"type": "number"}}});
        let schema = Schema::new(&schema_val);
        assert_eq!(schema.schema_type(), SchemaType::Object);
    }
}
