//! C1 — tolerant XML tokenizer.
//!
//! Scans a source string into a DOM of `Node`s without recursing per
//! element (an explicit stack survives pathologically deep nesting, per
//! §4.1). Tolerates `<!-- -->` comments, `<![CDATA[ ]]>` sections,
//! `<!DOCTYPE …>`, `<?…?>` processing instructions, both quote styles in
//! attribute values, and an unterminated quoted attribute value (which ends
//! at the next `>` rather than failing the whole parse).

use crate::error::RxmlError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag_name: String,
    pub attributes: BTreeMap<String, Option<String>>,
    pub children: Vec<Node>,
    /// Byte range of this element's *inner* content (between `>` of the
    /// open tag and `<` of the matching close tag) in the original source.
    /// `None` for self-closing elements. Used by the raw-inner extraction
    /// pass in `facade.rs`.
    pub inner_range: Option<(usize, usize)>,
}

impl Element {
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .map(|n| match n {
                Node::Text(t) => t.clone(),
                Node::Element(_) => String::new(),
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone)]
pub struct TokenizeOptions {
    pub keep_whitespace: bool,
    pub keep_comments: bool,
    /// Tags that are treated as childless (self-closing) even without an
    /// explicit `/>`.
    pub no_child_nodes: Vec<String>,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            keep_whitespace: true,
            keep_comments: false,
            no_child_nodes: vec![
                "br".to_string(),
                "hr".to_string(),
                "img".to_string(),
                "input".to_string(),
                "meta".to_string(),
                "link".to_string(),
            ],
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-' || c == '.'
}

struct Frame {
    tag_name: String,
    attributes: BTreeMap<String, Option<String>>,
    children: Vec<Node>,
    inner_start: usize,
}

/// Tokenize `src` into a top-level sequence of nodes.
pub fn tokenize(src: &str, opts: &TokenizeOptions) -> Result<Vec<Node>, RxmlError> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut roots: Vec<Node> = Vec::new();
    let mut pos = 0usize;
    let mut text_start = 0usize;

    let bytes = src.as_bytes();
    while pos < bytes.len() {
        match src[pos..].find('<') {
            None => {
                let text = &src[text_start..];
                emit_text(text, opts, &mut stack, &mut roots, &push_text_closure(opts));
                pos = bytes.len();
            }
            Some(rel) => {
                let lt = pos + rel;
                if lt > text_start {
                    let text = &src[text_start..lt];
                    emit_text(text, opts, &mut stack, &mut roots, &push_text_closure(opts));
                }

                if src[lt..].starts_with("<!--") {
                    let end = src[lt + 4..].find("-->").map(|e| lt + 4 + e + 3);
                    let end = end.unwrap_or(bytes.len());
                    if opts.keep_comments {
                        let comment = &src[lt + 4..(end.saturating_sub(3)).max(lt + 4)];
                        emit_text(
                            &format!("<!--{comment}-->"),
                            opts,
                            &mut stack,
                            &mut roots,
                            &push_text_closure(opts),
                        );
                    }
                    pos = end;
                    text_start = pos;
                    continue;
                }

                if src[lt..].starts_with("<![CDATA[") {
                    let end = src[lt + 9..]
                        .find("]]>")
                        .map(|e| lt + 9 + e)
                        .unwrap_or(bytes.len());
                    let content = &src[lt + 9..end];
                    append_child(&mut stack, &mut roots, Node::Text(content.to_string()));
                    pos = (end + 3).min(bytes.len());
                    text_start = pos;
                    continue;
                }

                if src[lt..].starts_with("<!DOCTYPE") || src[lt..].starts_with("<!doctype") {
                    let end = find_doctype_end(src, lt);
                    pos = end;
                    text_start = pos;
                    continue;
                }

                if src[lt..].starts_with("<?") {
                    let end = src[lt + 2..]
                        .find("?>")
                        .map(|e| lt + 2 + e + 2)
                        .unwrap_or(bytes.len());
                    pos = end;
                    text_start = pos;
                    continue;
                }

                if src[lt..].starts_with("</") {
                    let gt = src[lt..].find('>').map(|e| lt + e).unwrap_or(bytes.len());
                    let name = src[lt + 2..gt].trim();
                    close_element(&mut stack, &mut roots, name, lt)?;
                    pos = (gt + 1).min(bytes.len());
                    text_start = pos;
                    continue;
                }

                // Opening tag.
                let (elem_name, attributes, tag_end, self_closing) = parse_open_tag(src, lt)?;
                let is_void = self_closing
                    || opts
                        .no_child_nodes
                        .iter()
                        .any(|n| n.eq_ignore_ascii_case(&elem_name));

                if is_void {
                    append_child(
                        &mut stack,
                        &mut roots,
                        Node::Element(Element {
                            tag_name: elem_name,
                            attributes,
                            children: Vec::new(),
                            inner_range: None,
                        }),
                    );
                } else {
                    stack.push(Frame {
                        tag_name: elem_name,
                        attributes,
                        children: Vec::new(),
                        inner_start: tag_end,
                    });
                }
                pos = tag_end;
                text_start = pos;
            }
        }
    }

    // Unclosed elements at EOF: flush them as-is (tolerant behaviour — the
    // balance-tags repair heuristic handles the common case upstream of
    // this, but the tokenizer itself never hard-fails on it).
    while let Some(frame) = stack.pop() {
        let inner_end = bytes.len();
        let elem = Node::Element(Element {
            tag_name: frame.tag_name,
            attributes: frame.attributes,
            children: frame.children,
            inner_range: Some((frame.inner_start, inner_end)),
        });
        append_child(&mut stack, &mut roots, elem);
    }

    Ok(roots)
}

fn push_text_closure(opts: &TokenizeOptions) -> impl Fn(&str, &mut Vec<Node>) + '_ {
    move |text: &str, into: &mut Vec<Node>| {
        let decoded = decode_entities(text);
        let value = if opts.keep_whitespace {
            decoded
        } else {
            decoded.trim().to_string()
        };
        if !value.is_empty() {
            into.push(Node::Text(value));
        }
    }
}

/// Decode the five predefined XML entities plus numeric character references
/// (`&#NN;`, `&#xHH;`) in ordinary character data (§4.4: "entities decoded
/// ... in non-string-typed fields"). CDATA content bypasses this — it is
/// spliced straight from the source at its call site, never routed through
/// `push_text_closure` — so `<![CDATA[&amp;]]>` stays literal, per XML's own
/// CDATA semantics. An `&` not starting a recognised reference is left as-is.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let resolved = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_one_entity(&tail[1..semi]).map(|ch| (ch, semi)));
        match resolved {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_one_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ if name.starts_with('#') => {
            let digits = &name[1..];
            let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                digits.parse::<u32>().ok()
            };
            code.and_then(char::from_u32)
        }
        _ => None,
    }
}

fn emit_text(
    text: &str,
    _opts: &TokenizeOptions,
    stack: &mut [Frame],
    roots: &mut Vec<Node>,
    push: &impl Fn(&str, &mut Vec<Node>),
) {
    if text.is_empty() {
        return;
    }
    match stack.last_mut() {
        Some(frame) => push(text, &mut frame.children),
        None => push(text, roots),
    }
}

fn append_child(stack: &mut [Frame], roots: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(frame) => frame.children.push(node),
        None => roots.push(node),
    }
}

fn close_element(
    stack: &mut Vec<Frame>,
    roots: &mut Vec<Node>,
    name: &str,
    close_start: usize,
) -> Result<(), RxmlError> {
    // Tolerant match: close the nearest open frame with this name if one
    // exists; otherwise close the innermost frame regardless (a stray
    // mismatched close tag shouldn't abort the whole parse).
    let matching_depth = stack
        .iter()
        .rposition(|f| f.tag_name.eq_ignore_ascii_case(name));

    let depth = matching_depth.unwrap_or(stack.len().saturating_sub(1));
    if stack.is_empty() {
        return Ok(());
    }

    while stack.len() > depth + 1 {
        let frame = stack.pop().unwrap();
        let elem = Node::Element(Element {
            tag_name: frame.tag_name,
            attributes: frame.attributes,
            children: frame.children,
            inner_range: Some((frame.inner_start, close_start)),
        });
        append_child(stack, roots, elem);
    }

    if let Some(frame) = stack.pop() {
        let elem = Node::Element(Element {
            tag_name: frame.tag_name,
            attributes: frame.attributes,
            children: frame.children,
            inner_range: Some((frame.inner_start, close_start)),
        });
        append_child(stack, roots, elem);
    }

    Ok(())
}

fn find_doctype_end(src: &str, start: usize) -> usize {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => depth += 1,
            b']' => depth -= 1,
            b'>' if depth <= 0 => return i + 1,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Parse an opening tag starting at `lt` (the index of `<`). Returns the
/// tag name, attribute map, the byte index just past the tag's `>`, and
/// whether the tag was self-closing (`/>`).
fn parse_open_tag(
    src: &str,
    lt: usize,
) -> Result<(String, BTreeMap<String, Option<String>>, usize, bool), RxmlError> {
    let chars: Vec<(usize, char)> = src[lt + 1..].char_indices().collect();
    let mut idx = 0usize;

    // Tag name.
    let name_start = idx;
    while idx < chars.len() && is_name_char(chars[idx].1) {
        idx += 1;
    }
    if idx == name_start {
        return Err(RxmlError::Parse {
            line: 0,
            column: 0,
            message: format!("expected element name at byte {lt}"),
        });
    }
    let name_end_byte = chars.get(idx).map(|(b, _)| *b).unwrap_or(src.len() - lt - 1);
    let tag_name = src[lt + 1 + name_start..lt + 1 + name_end_byte].to_string();

    let mut attributes = BTreeMap::new();
    let mut self_closing = false;

    loop {
        // Skip whitespace.
        while idx < chars.len() && chars[idx].1.is_whitespace() {
            idx += 1;
        }
        if idx >= chars.len() {
            break;
        }
        let (byte_off, ch) = chars[idx];
        if ch == '/' {
            self_closing = true;
            idx += 1;
            continue;
        }
        if ch == '>' {
            let gt_abs = lt + 1 + byte_off;
            return Ok((tag_name, attributes, gt_abs + 1, self_closing));
        }
        if !is_name_start(ch) {
            // Unrecognised character inside the tag — skip it rather than
            // failing the whole parse (tolerant scanning).
            idx += 1;
            continue;
        }

        let attr_name_start = idx;
        while idx < chars.len() && is_name_char(chars[idx].1) {
            idx += 1;
        }
        let attr_name_end_byte = chars
            .get(idx)
            .map(|(b, _)| *b)
            .unwrap_or(src.len() - lt - 1);
        let attr_name_start_byte = chars[attr_name_start].0;
        let attr_name = src[lt + 1 + attr_name_start_byte..lt + 1 + attr_name_end_byte].to_string();

        while idx < chars.len() && chars[idx].1.is_whitespace() {
            idx += 1;
        }

        if idx < chars.len() && chars[idx].1 == '=' {
            idx += 1;
            while idx < chars.len() && chars[idx].1.is_whitespace() {
                idx += 1;
            }
            if idx < chars.len() && (chars[idx].1 == '"' || chars[idx].1 == '\'') {
                let quote = chars[idx].1;
                idx += 1;
                let value_start_byte = chars.get(idx).map(|(b, _)| *b).unwrap_or(chars.last().map(|(b,_)| *b + 1).unwrap_or(0));
                // Find the closing quote, or fall back to the next `>` if
                // the value is never terminated (§4.1: "an unterminated
                // quoted value ends at the next `>`").
                let mut value_end_idx = idx;
                let mut closed = false;
                while value_end_idx < chars.len() {
                    if chars[value_end_idx].1 == quote {
                        closed = true;
                        break;
                    }
                    if chars[value_end_idx].1 == '>' && !closed {
                        // Unterminated: stop here, value runs up to (not
                        // including) this '>'.
                        break;
                    }
                    value_end_idx += 1;
                }
                let value_end_byte = chars
                    .get(value_end_idx)
                    .map(|(b, _)| *b)
                    .unwrap_or(src.len() - lt - 1);
                let value = src[lt + 1 + value_start_byte..lt + 1 + value_end_byte].to_string();
                attributes.insert(attr_name, Some(value));
                idx = if closed { value_end_idx + 1 } else { value_end_idx };
            } else {
                // Unquoted value: read until whitespace or `>`.
                let value_start_byte = chars.get(idx).map(|(b, _)| *b).unwrap_or(0);
                while idx < chars.len() && !chars[idx].1.is_whitespace() && chars[idx].1 != '>' {
                    idx += 1;
                }
                let value_end_byte = chars
                    .get(idx)
                    .map(|(b, _)| *b)
                    .unwrap_or(src.len() - lt - 1);
                let value = src[lt + 1 + value_start_byte..lt + 1 + value_end_byte].to_string();
                attributes.insert(attr_name, Some(value));
            }
        } else {
            attributes.insert(attr_name, None);
        }
    }

    // Ran off the end without a closing `>`.
    Ok((tag_name, attributes, src.len(), self_closing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_element(nodes: &[Node]) -> &Element {
        nodes
            .iter()
            .find_map(|n| match n {
                Node::Element(e) => Some(e),
                _ => None,
            })
            .expect("expected at least one element")
    }

    #[test]
    fn parses_simple_element_with_text() {
        let nodes = tokenize("<op>hello</op>", &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.tag_name, "op");
        assert_eq!(el.text_content(), "hello");
    }

    #[test]
    fn parses_attributes_both_quote_styles() {
        let nodes = tokenize(r#"<a x="1" y='2'/>"#, &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.attributes.get("x"), Some(&Some("1".to_string())));
        assert_eq!(el.attributes.get("y"), Some(&Some("2".to_string())));
    }

    #[test]
    fn unterminated_quoted_value_ends_at_next_gt() {
        let nodes = tokenize(r#"<a x="unterminated>text"#, &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.attributes.get("x"), Some(&Some("unterminated".to_string())));
    }

    #[test]
    fn cdata_is_preserved_verbatim() {
        let nodes = tokenize("<a><![CDATA[<raw> & stuff]]></a>", &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.text_content(), "<raw> & stuff");
    }

    #[test]
    fn ordinary_text_decodes_entities() {
        let nodes = tokenize("<op>a &lt;&gt; b &amp; c &#65;&#x42;</op>", &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.text_content(), "a <> b & c AB");
    }

    #[test]
    fn stray_ampersand_is_left_alone() {
        let nodes = tokenize("<op>R&D</op>", &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.text_content(), "R&D");
    }

    #[test]
    fn comments_are_skipped_by_default() {
        let nodes = tokenize("<a><!-- hi --></a>", &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert!(el.children.is_empty());
    }

    #[test]
    fn doctype_and_pi_are_tolerated() {
        let nodes = tokenize(
            "<!DOCTYPE html><?xml version=\"1.0\"?><a>x</a>",
            &TokenizeOptions::default(),
        )
        .unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.text_content(), "x");
    }

    #[test]
    fn nested_same_name_tags_track_inner_range() {
        let src = "<a><a>inner</a></a>";
        let nodes = tokenize(src, &TokenizeOptions::default()).unwrap();
        let outer = first_element(&nodes);
        assert_eq!(outer.tag_name, "a");
        let inner = outer.child_elements().next().unwrap();
        let (s, e) = inner.inner_range.unwrap();
        assert_eq!(&src[s..e], "inner");
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let depth = 5000;
        let mut src = String::new();
        for _ in 0..depth {
            src.push_str("<a>");
        }
        src.push_str("x");
        for _ in 0..depth {
            src.push_str("</a>");
        }
        let nodes = tokenize(&src, &TokenizeOptions::default()).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn unclosed_tag_is_tolerated_not_fatal() {
        let nodes = tokenize("<a>text", &TokenizeOptions::default()).unwrap();
        let el = first_element(&nodes);
        assert_eq!(el.text_content(), "text");
    }
}
