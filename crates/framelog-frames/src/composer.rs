//! Builds documents from the YAML parser's event stream.
//!
//! Plain scalars are resolved the YAML 1.1 way (null, bool, int, float,
//! string); quoted scalars stay strings. Tagged scalars go through the core
//! tags or the tag registry. A failure inside a document is remembered and
//! reported when the document ends, so the parser can keep running past it.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};
use yaml_rust2::parser::{Event, Parser, Tag};
use yaml_rust2::scanner::TScalarStyle;

use framelog_types::Document;

use crate::error::{ComposeError, ExtractError, TagError};
use crate::tags::TagRegistry;

const CORE_TAG_PREFIX: &str = "tag:yaml.org,2002:";

static FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(\.[0-9]+|[0-9][0-9_]*(\.[0-9_]*)?)([eE][-+]?[0-9]+)?$")
        .expect("float pattern is valid")
});

static INF_NAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([-+]?\.(inf|Inf|INF)|\.(nan|NaN|NAN))$").expect("inf/nan pattern is valid")
});

enum Node {
    Seq {
        anchor: usize,
        items: Vec<Document>,
    },
    Map {
        anchor: usize,
        entries: Map<String, Value>,
        key: Option<String>,
    },
}

/// Event-driven document builder
#[derive(Default)]
pub struct Composer {
    stack: Vec<Node>,
    anchors: HashMap<usize, Document>,
    root: Option<Document>,
    error: Option<ComposeError>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new document, discarding any half-built one
    pub fn begin(&mut self) {
        self.stack.clear();
        self.anchors.clear();
        self.root = None;
        self.error = None;
    }

    /// Apply one node event. Stream and document events are the caller's.
    pub fn feed(&mut self, event: Event, registry: &TagRegistry) {
        match event {
            Event::Scalar(value, style, anchor, tag) => {
                let document = match resolve_scalar(value, style, tag.as_ref(), registry) {
                    Ok(document) => document,
                    Err(e) => {
                        self.fail(e);
                        Value::Null
                    }
                };
                self.remember(anchor, &document);
                self.insert(document);
            }
            Event::SequenceStart(anchor, tag) => {
                self.check_collection_tag(tag.as_ref(), &["!!seq", "!!omap", "!!pairs"]);
                self.stack.push(Node::Seq {
                    anchor,
                    items: Vec::new(),
                });
            }
            Event::MappingStart(anchor, tag) => {
                self.check_collection_tag(tag.as_ref(), &["!!map", "!!set"]);
                self.stack.push(Node::Map {
                    anchor,
                    entries: Map::new(),
                    key: None,
                });
            }
            Event::SequenceEnd => match self.stack.pop() {
                Some(Node::Seq { anchor, items }) => {
                    let document = Value::Array(items);
                    self.remember(anchor, &document);
                    self.insert(document);
                }
                other => self.unbalanced("sequence end", other),
            },
            Event::MappingEnd => match self.stack.pop() {
                Some(Node::Map { anchor, entries, .. }) => {
                    let document = Value::Object(entries);
                    self.remember(anchor, &document);
                    self.insert(document);
                }
                other => self.unbalanced("mapping end", other),
            },
            Event::Alias(id) => match self.anchors.get(&id).cloned() {
                Some(document) => self.insert(document),
                None => {
                    self.fail(ComposeError::UnknownAnchor(id));
                    self.insert(Value::Null);
                }
            },
            _ => {}
        }
    }

    /// Finish the current document
    pub fn finish(&mut self) -> Result<Document, ComposeError> {
        let root = self.root.take().unwrap_or(Value::Null);
        let error = self.error.take();
        let open = !self.stack.is_empty();
        self.stack.clear();
        self.anchors.clear();

        match error {
            Some(e) => Err(e),
            None if open => Err(ComposeError::Unbalanced("document end")),
            None => Ok(root),
        }
    }

    fn fail(&mut self, error: ComposeError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn unbalanced(&mut self, what: &'static str, popped: Option<Node>) {
        self.fail(ComposeError::Unbalanced(what));
        if let Some(node) = popped {
            self.stack.push(node);
        }
    }

    fn check_collection_tag(&mut self, tag: Option<&Tag>, allowed: &[&str]) {
        if let Some(tag) = tag {
            let name = tag_name(tag);
            if name != "!" && !allowed.contains(&name.as_str()) {
                self.fail(ComposeError::UnknownTag(name));
            }
        }
    }

    fn remember(&mut self, anchor: usize, document: &Document) {
        if anchor > 0 {
            self.anchors.insert(anchor, document.clone());
        }
    }

    fn insert(&mut self, document: Document) {
        match self.stack.last_mut() {
            None => self.root = Some(document),
            Some(Node::Seq { items, .. }) => items.push(document),
            Some(Node::Map { entries, key, .. }) => match key.take() {
                None => *key = Some(key_string(document)),
                Some(k) if k == "<<" => merge(entries, document),
                Some(k) => {
                    entries.insert(k, document);
                }
            },
        }
    }
}

/// `<<` merge key: entries already present win
fn merge(entries: &mut Map<String, Value>, source: Document) {
    match source {
        Value::Object(map) => {
            for (k, v) in map {
                entries.entry(k).or_insert(v);
            }
        }
        Value::Array(maps) => {
            for map in maps {
                merge(entries, map);
            }
        }
        other => {
            entries.insert("<<".to_string(), other);
        }
    }
}

fn key_string(key: Document) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// `!!str` for core tags however the parser spelled them, `!name` otherwise
pub(crate) fn tag_name(tag: &Tag) -> String {
    let full = format!("{}{}", tag.handle, tag.suffix);
    match full.strip_prefix(CORE_TAG_PREFIX) {
        Some(core) => format!("!!{}", core),
        None => full,
    }
}

fn resolve_scalar(
    value: String,
    style: TScalarStyle,
    tag: Option<&Tag>,
    registry: &TagRegistry,
) -> Result<Document, ComposeError> {
    let Some(tag) = tag else {
        return Ok(if matches!(style, TScalarStyle::Plain) {
            resolve_plain(&value)
        } else {
            Value::String(value)
        });
    };

    let name = tag_name(tag);
    let parsed = match name.as_str() {
        "!" | "!!str" | "!!binary" | "!!timestamp" => return Ok(Value::String(value)),
        "!!null" => Some(Value::Null),
        "!!bool" => parse_bool(&value).map(Value::Bool),
        "!!int" => parse_int(&value),
        "!!float" => parse_float(&value).or_else(|| {
            INF_NAN
                .is_match(&value)
                .then(|| Value::String(value.clone()))
        }),
        core if core.starts_with("!!") => return Err(ComposeError::UnknownTag(name)),
        _ => return registry.construct(&name, &value),
    };

    parsed.ok_or_else(|| ComposeError::Tag {
        source: TagError::new(format!("not a valid {}", &name[2..])),
        tag: name,
        value,
    })
}

/// Resolve an untagged plain scalar
pub(crate) fn resolve_plain(text: &str) -> Document {
    if matches!(text, "" | "~" | "null" | "Null" | "NULL") {
        return Value::Null;
    }
    if let Some(b) = parse_bool(text) {
        return Value::Bool(b);
    }
    parse_int(text)
        .or_else(|| parse_float(text))
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "true" | "True" | "TRUE" | "yes" | "Yes" | "YES" | "on" | "On" | "ON" => Some(true),
        "false" | "False" | "FALSE" | "no" | "No" | "NO" | "off" | "Off" | "OFF" => Some(false),
        _ => None,
    }
}

fn parse_int(text: &str) -> Option<Document> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if unsigned.starts_with('_') {
        return None;
    }
    let digits = unsigned.replace('_', "");
    let (radix, body) = if let Some(body) = digits.strip_prefix("0x") {
        (16, body)
    } else if let Some(body) = digits.strip_prefix("0o") {
        (8, body)
    } else if let Some(body) = digits.strip_prefix("0b") {
        (2, body)
    } else {
        (10, digits.as_str())
    };
    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let magnitude = u64::from_str_radix(body, radix).ok()?;
    if negative {
        0i64.checked_sub_unsigned(magnitude).map(Value::from)
    } else {
        Some(Value::from(magnitude))
    }
}

fn parse_float(text: &str) -> Option<Document> {
    if !FLOAT.is_match(text) {
        return None;
    }
    let value: f64 = text.replace('_', "").parse().ok()?;
    Number::from_f64(value).map(Value::Number)
}

/// Parse every document in `text`
pub fn compose_str(text: &str, registry: &TagRegistry) -> Result<Vec<Document>, ExtractError> {
    let mut parser = Parser::new(text.chars());
    let mut composer = Composer::new();
    let mut documents = Vec::new();

    loop {
        let (event, _) = parser.next_token()?;
        match event {
            Event::StreamEnd => break,
            Event::StreamStart | Event::Nothing => {}
            Event::DocumentStart { .. } => composer.begin(),
            Event::DocumentEnd => documents.push(composer.finish()?),
            other => composer.feed(other, registry),
        }
    }

    Ok(documents)
}
