//! C4 — the public facade tying C1-C3 together: `parse` turns raw XML-ish
//! text plus a schema into a coerced JSON value — string-typed leaves read
//! straight from the post-repair source via `coerce_element`'s `src`
//! parameter, so they carry the raw byte range (undecoded entities, CDATA
//! unwrapped) rather than the generic entity-decoded text every other leaf
//! gets — `stringify` goes the other direction for protocols that need to
//! *render* XML (the morph-XML protocol's prompt examples), and `raw_inner`
//! is the standalone version of that same raw-extraction for callers that
//! want a whole top-level tag's literal text without running coercion at
//! all (e.g. a `path` argument that must preserve exact whitespace).

use crate::coerce::{canonicalize_enum, coerce_element};
use crate::error::RxmlError;
use crate::repair::{default_pipeline, repair_against_schema, run_pipeline};
use crate::schema::{Schema, SchemaType};
use crate::tokenizer::{tokenize, Element, Node, TokenizeOptions};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub tokenize: TokenizeOptions,
    /// Run the heuristic repair pipeline (C2) before tokenizing. Disable
    /// for already-well-formed input (e.g. re-parsing output this crate
    /// itself produced).
    pub repair: bool,
    /// §4.4: throw `DuplicateStringTagError` when two top-level elements
    /// share a tag name the schema declares `string`-typed. Defaults to
    /// `true`, matching the provider-options default (§6).
    pub throw_on_duplicate_string_tags: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            tokenize: TokenizeOptions::default(),
            repair: true,
            throw_on_duplicate_string_tags: true,
        }
    }
}

/// Parse `root_tag`'s content out of `src` against `schema`, applying the
/// repair pipeline first (unless disabled) and schema-aware coercion after
/// tokenizing.
pub fn parse(src: &str, root_tag: &str, schema: &Value, opts: &ParseOptions) -> Result<Value, RxmlError> {
    let repaired = if opts.repair {
        let schema_view = Schema::new(schema);
        let pipeline = default_pipeline();
        let stage1 = run_pipeline(src, &pipeline);
        repair_against_schema(&stage1, &schema_view)
    } else {
        src.to_string()
    };

    let nodes = tokenize(&repaired, &opts.tokenize)?;
    let root = find_element(&nodes, root_tag).ok_or_else(|| RxmlError::Parse {
        line: 0,
        column: 0,
        message: format!("root element <{root_tag}> not found after repair"),
    })?;

    let schema_view = Schema::new(schema);
    if opts.throw_on_duplicate_string_tags {
        check_duplicate_string_tags(root, schema_view)?;
    }
    let pruned;
    let root_for_coercion = if opts.throw_on_duplicate_string_tags {
        root
    } else {
        pruned = keep_first_string_tag(root, schema_view);
        &pruned
    };
    let value = coerce_element(&repaired, root_for_coercion, schema_view)?;
    Ok(apply_enum_canonicalisation(value, schema_view))
}

/// First-wins deduplication for string-typed top-level tags (§8's literal
/// scenario: `throwOnDuplicateStringTags:false` keeps the first value
/// rather than folding repeats into an array the way a genuinely
/// array-typed repeated tag would).
fn keep_first_string_tag(root: &Element, schema: Schema<'_>) -> Element {
    use std::collections::HashSet;
    let mut seen: HashSet<String> = HashSet::new();
    let mut children = Vec::with_capacity(root.children.len());
    for node in &root.children {
        if let Node::Element(child) = node {
            let is_string_prop = schema
                .property(&child.tag_name)
                .map_or(false, |s| matches!(s.schema_type(), SchemaType::String));
            if is_string_prop {
                if !seen.insert(child.tag_name.clone()) {
                    continue;
                }
            }
        }
        children.push(node.clone());
    }
    Element {
        tag_name: root.tag_name.clone(),
        attributes: root.attributes.clone(),
        children,
        inner_range: root.inner_range,
    }
}

/// §4.4: a top-level tag the schema says is a plain string must appear at
/// most once among `root`'s direct children — if a model repeats a
/// free-text field (most often because a heuristic couldn't tell it apart
/// from a genuinely repeated array tag), that's ambiguous enough to refuse
/// rather than silently pick one.
fn check_duplicate_string_tags(root: &Element, schema: Schema<'_>) -> Result<(), RxmlError> {
    use std::collections::HashMap;
    let mut seen: HashMap<&str, &Element> = HashMap::new();
    for child in root.child_elements() {
        let Some(child_schema) = schema.property(&child.tag_name) else {
            continue;
        };
        if !matches!(child_schema.schema_type(), SchemaType::String) {
            continue;
        }
        if let Some(first) = seen.get(child.tag_name.as_str()) {
            return Err(RxmlError::DuplicateStringTag {
                tag: child.tag_name.clone(),
                first: first.text_content(),
                second: child.text_content(),
            });
        }
        seen.insert(&child.tag_name, child);
    }
    Ok(())
}

/// Parse without any schema (best-effort typing only) — used when a
/// protocol sees a tool name it has no schema for (§4.6's "unknown tool"
/// case still needs *some* structured output for `onError` diagnostics).
pub fn parse_untyped(src: &str, root_tag: &str, opts: &ParseOptions) -> Result<Value, RxmlError> {
    let repaired = if opts.repair {
        run_pipeline(src, &default_pipeline())
    } else {
        src.to_string()
    };
    let nodes = tokenize(&repaired, &opts.tokenize)?;
    let root = find_element(&nodes, root_tag).ok_or_else(|| RxmlError::Parse {
        line: 0,
        column: 0,
        message: format!("root element <{root_tag}> not found after repair"),
    })?;
    let mut out = serde_json::Map::new();
    for child in root.child_elements() {
        out.insert(
            child.tag_name.clone(),
            crate::coerce::coerce_text_best_effort(&child.text_content()),
        );
    }
    Ok(Value::Object(out))
}

fn apply_enum_canonicalisation(value: Value, schema: Schema<'_>) -> Value {
    match (&value, schema.schema_type()) {
        (Value::String(_), _) if schema.enum_values().is_some() => canonicalize_enum(value, schema),
        (Value::Object(map), SchemaType::Object) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let child_schema = schema.property(k);
                out.insert(
                    k.clone(),
                    match child_schema {
                        Some(cs) => apply_enum_canonicalisation(v.clone(), cs),
                        None => v.clone(),
                    },
                );
            }
            Value::Object(out)
        }
        _ => value,
    }
}

fn find_element<'a>(nodes: &'a [Node], tag: &str) -> Option<&'a Element> {
    nodes.iter().find_map(|n| match n {
        Node::Element(e) if e.tag_name.eq_ignore_ascii_case(tag) => Some(e),
        _ => None,
    })
}

/// Extract an element's inner text verbatim (no coercion, no trimming
/// beyond what the tokenizer itself does), using the tracked `inner_range`
/// so the original source slice — including any literal whitespace or
/// special characters — is returned untouched.
pub fn raw_inner(src: &str, root_tag: &str, opts: &TokenizeOptions) -> Result<String, RxmlError> {
    let nodes = tokenize(src, opts)?;
    let root = find_element(&nodes, root_tag).ok_or_else(|| RxmlError::Parse {
        line: 0,
        column: 0,
        message: format!("root element <{root_tag}> not found"),
    })?;
    match root.inner_range {
        Some((start, end)) => Ok(src[start..end].to_string()),
        None => Ok(String::new()),
    }
}

/// Render a JSON value back into an XML element for `tag_name`, the
/// inverse of `parse`, used by the morph-XML protocol when building
/// few-shot examples for the system prompt (C10). Deliberately simple —
/// this only ever renders well-formed values this crate itself produced or
/// validated, so none of the repair tolerance applies on the way out.
pub fn stringify(tag_name: &str, value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut inner = String::new();
            for (k, v) in map {
                inner.push_str(&stringify(k, v));
            }
            format!("<{tag_name}>{inner}</{tag_name}>")
        }
        Value::Array(items) => {
            let mut inner = String::new();
            for item in items {
                inner.push_str(&stringify(tag_name, item));
            }
            inner
        }
        Value::String(s) => format!("<{tag_name}>{}</{tag_name}>", escape_text(s)),
        Value::Number(n) => format!("<{tag_name}>{n}</{tag_name}>"),
        Value::Bool(b) => format!("<{tag_name}>{b}</{tag_name}>"),
        Value::Null => format!("<{tag_name}/>"),
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
