use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};

use framelog_types::Document;

use crate::composer::compose_str;
use crate::error::{ComposeError, TagError};
use crate::prototxt::parse_prototxt;

/// Decodes the scalar text of a tagged node
pub type TagHandler = Arc<dyn Fn(&str, &TagRegistry) -> Result<Document, TagError> + Send + Sync>;

/// Local tags (`!name`) and the functions that decode them.
///
/// Handlers get the registry back so nested documents can use the same tags.
#[derive(Clone, Default)]
pub struct TagRegistry {
    handlers: HashMap<String, TagHandler>,
}

impl TagRegistry {
    /// An empty registry; any local tag makes a document malformed
    pub fn new() -> Self {
        Self::default()
    }

    /// `!complex`, `!path`, `!tensor`, `!pb2_message` and `!pb3_message`
    pub fn with_defaults() -> Self {
        Self::new()
            .with("!complex", |value, _| construct_complex(value))
            .with("!path", |value, _| construct_path(value))
            .with("!tensor", construct_tensor)
            .with("!pb2_message", |value, _| construct_pb_message(value))
            .with("!pb3_message", |value, _| construct_pb_message(value))
    }

    pub fn with<F>(mut self, tag: &str, handler: F) -> Self
    where
        F: Fn(&str, &TagRegistry) -> Result<Document, TagError> + Send + Sync + 'static,
    {
        self.register(tag, handler);
        self
    }

    /// Register or replace the handler for `tag` (written with its `!`)
    pub fn register<F>(&mut self, tag: &str, handler: F)
    where
        F: Fn(&str, &TagRegistry) -> Result<Document, TagError> + Send + Sync + 'static,
    {
        self.handlers.insert(tag.to_string(), Arc::new(handler));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    pub fn construct(&self, tag: &str, value: &str) -> Result<Document, ComposeError> {
        let handler = self
            .handlers
            .get(tag)
            .ok_or_else(|| ComposeError::UnknownTag(tag.to_string()))?;
        handler(value, self).map_err(|source| ComposeError::Tag {
            tag: tag.to_string(),
            value: value.to_string(),
            source,
        })
    }
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().collect();
        tags.sort();
        f.debug_struct("TagRegistry").field("tags", &tags).finish()
    }
}

/// Python complex literal: `1+2j`, `-2.5j`, `(1-1e3j)`, `3`
fn construct_complex(text: &str) -> Result<Document, TagError> {
    let text = text.trim();
    let text = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text)
        .trim();
    let invalid = || TagError::new(format!("invalid complex literal {:?}", text));

    let (re, im) = match text.strip_suffix(['j', 'J']) {
        None => (parse_component(text).ok_or_else(invalid)?, 0.0),
        Some(body) => match imaginary_split(body) {
            Some(split) => (
                parse_component(&body[..split]).ok_or_else(invalid)?,
                parse_imaginary(&body[split..]).ok_or_else(invalid)?,
            ),
            None => (0.0, parse_imaginary(body).ok_or_else(invalid)?),
        },
    };

    if !(re.is_finite() && im.is_finite()) {
        return Err(TagError::new("complex parts must be finite"));
    }
    Ok(json!({ "re": re, "im": im }))
}

/// Byte offset of the sign that starts the imaginary part, if there is a real part
fn imaginary_split(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    (1..bytes.len())
        .rev()
        .find(|&i| matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E'))
}

fn parse_component(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    text.parse().ok()
}

/// `j` alone means one
fn parse_imaginary(text: &str) -> Option<f64> {
    match text {
        "" | "+" => Some(1.0),
        "-" => Some(-1.0),
        _ => parse_component(text),
    }
}

fn construct_path(text: &str) -> Result<Document, TagError> {
    let path = Path::new(text.trim());
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| TagError::new(format!("cannot resolve relative path: {}", e)))?
            .join(path)
    };
    Ok(Value::String(normalize(&absolute).to_string_lossy().into_owned()))
}

/// Drop `.` and fold `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn construct_tensor(text: &str, registry: &TagRegistry) -> Result<Document, TagError> {
    let mut documents =
        compose_str(text, registry).map_err(|e| TagError::new(format!("tensor: {}", e)))?;
    Ok(match documents.len() {
        0 => Value::Null,
        1 => documents.remove(0),
        _ => Value::Array(documents),
    })
}

fn construct_pb_message(text: &str) -> Result<Document, TagError> {
    parse_prototxt(text)
        .map(Value::Object)
        .map_err(|e| TagError::new(format!("message: {}", e)))
}
