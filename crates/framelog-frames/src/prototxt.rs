//! Protobuf text format without a schema.
//!
//! Messages become mappings; a field that repeats collapses into a sequence.
//! Bare values resolve like plain YAML scalars, so enum names stay strings.

use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::composer::resolve_plain;

/// Deepest nesting of messages and lists accepted by the parser
pub const MAX_DEPTH: usize = 128;

static BARE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("bare word pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrototxtError {
    #[error("unexpected {found} at byte {offset}")]
    Unexpected { found: String, offset: usize },

    #[error("unexpected end of message")]
    UnexpectedEnd,

    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),

    #[error("only mappings can be written as messages")]
    NotAMessage,

    #[error("field {0:?} holds a nested sequence, which has no text form")]
    NestedList(String),

    #[error("nesting deeper than {} levels at byte {offset}", MAX_DEPTH)]
    TooDeep { offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Punct(char),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("word {:?}", w),
            Token::Str(s) => format!("string {:?}", s),
            Token::Punct(c) => format!("{:?}", c),
        }
    }
}

/// Parse a text-format message into a mapping
pub fn parse_prototxt(text: &str) -> Result<Map<String, Value>, PrototxtError> {
    let mut parser = TextParser {
        tokens: tokenize(text)?,
        pos: 0,
        depth: 0,
    };
    parser.message(None)
}

/// Write a mapping as a text-format message, two spaces per nesting level
pub fn to_prototxt(document: &Value) -> Result<String, PrototxtError> {
    let Value::Object(map) = document else {
        return Err(PrototxtError::NotAMessage);
    };
    let mut out = String::new();
    write_message(&mut out, map, 0)?;
    Ok(out)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, PrototxtError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '#' {
            while chars.next_if(|&(_, c)| c != '\n').is_some() {}
        } else if c == '"' || c == '\'' {
            chars.next();
            let s = read_string(&mut chars, c).ok_or(PrototxtError::UnterminatedString(offset))?;
            tokens.push((Token::Str(s), offset));
        } else if is_word_char(c) {
            let mut word = String::new();
            while let Some((_, c)) = chars.next_if(|&(_, c)| is_word_char(c)) {
                word.push(c);
            }
            tokens.push((Token::Word(word), offset));
        } else if "{}<>[]:,;".contains(c) {
            chars.next();
            tokens.push((Token::Punct(c), offset));
        } else {
            return Err(PrototxtError::Unexpected {
                found: format!("{:?}", c),
                offset,
            });
        }
    }

    Ok(tokens)
}

fn read_string(chars: &mut Peekable<CharIndices<'_>>, quote: char) -> Option<String> {
    let mut out = String::new();
    loop {
        let (_, c) = chars.next()?;
        match c {
            c if c == quote => return Some(out),
            '\\' => {
                let (_, escaped) = chars.next()?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'x' => {
                        let mut hex = String::new();
                        while hex.len() < 2 {
                            match chars.next_if(|&(_, c)| c.is_ascii_hexdigit()) {
                                Some((_, c)) => hex.push(c),
                                None => break,
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16).ok()?;
                        out.push(char::from_u32(code)?);
                    }
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }
}

struct TextParser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl TextParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Result<(Token, usize), PrototxtError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(PrototxtError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(&self) -> PrototxtError {
        match self.tokens.get(self.pos) {
            Some((token, offset)) => PrototxtError::Unexpected {
                found: token.describe(),
                offset: *offset,
            },
            None => PrototxtError::UnexpectedEnd,
        }
    }

    /// Run `parse` one nesting level down
    fn nested<T>(
        &mut self,
        offset: usize,
        parse: impl FnOnce(&mut Self) -> Result<T, PrototxtError>,
    ) -> Result<T, PrototxtError> {
        if self.depth >= MAX_DEPTH {
            return Err(PrototxtError::TooDeep { offset });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Fields up to `close`, or to the end of input for the top level
    fn message(&mut self, close: Option<char>) -> Result<Map<String, Value>, PrototxtError> {
        let mut map = Map::new();
        loop {
            match self.peek() {
                None if close.is_none() => return Ok(map),
                None => return Err(PrototxtError::UnexpectedEnd),
                Some(Token::Punct(c)) if Some(*c) == close => {
                    self.pos += 1;
                    return Ok(map);
                }
                Some(_) => {}
            }

            let name = match self.next()? {
                (Token::Word(name), _) => name,
                (token, offset) => {
                    return Err(PrototxtError::Unexpected {
                        found: token.describe(),
                        offset,
                    });
                }
            };
            let value = match self.peek() {
                Some(Token::Punct(':')) => {
                    self.pos += 1;
                    self.value()?
                }
                Some(Token::Punct('{' | '<')) => self.value()?,
                _ => return Err(self.unexpected()),
            };
            add_field(&mut map, name, value);

            if matches!(self.peek(), Some(Token::Punct(',' | ';'))) {
                self.pos += 1;
            }
        }
    }

    fn value(&mut self) -> Result<Value, PrototxtError> {
        let (token, offset) = self.next()?;
        match token {
            Token::Punct('{') => self.nested(offset, |p| p.message(Some('}')).map(Value::Object)),
            Token::Punct('<') => self.nested(offset, |p| p.message(Some('>')).map(Value::Object)),
            Token::Punct('[') => self.nested(offset, Self::list),
            Token::Str(mut s) => {
                // adjacent strings concatenate
                while let Some(Token::Str(more)) = self.peek() {
                    s.push_str(more);
                    self.pos += 1;
                }
                Ok(Value::String(s))
            }
            Token::Word(word) => Ok(resolve_plain(&word)),
            other => Err(PrototxtError::Unexpected {
                found: other.describe(),
                offset,
            }),
        }
    }

    fn list(&mut self) -> Result<Value, PrototxtError> {
        let mut items = Vec::new();
        if matches!(self.peek(), Some(Token::Punct(']'))) {
            self.pos += 1;
            return Ok(Value::Array(items));
        }
        loop {
            items.push(self.value()?);
            match self.next()? {
                (Token::Punct(','), _) => {}
                (Token::Punct(']'), _) => return Ok(Value::Array(items)),
                (token, offset) => {
                    return Err(PrototxtError::Unexpected {
                        found: token.describe(),
                        offset,
                    });
                }
            }
        }
    }
}

fn add_field(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        None => {
            map.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn write_message(
    out: &mut String,
    map: &Map<String, Value>,
    depth: usize,
) -> Result<(), PrototxtError> {
    for (name, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    if item.is_array() {
                        return Err(PrototxtError::NestedList(name.clone()));
                    }
                    write_field(out, name, item, depth)?;
                }
            }
            other => write_field(out, name, other, depth)?,
        }
    }
    Ok(())
}

fn write_field(
    out: &mut String,
    name: &str,
    value: &Value,
    depth: usize,
) -> Result<(), PrototxtError> {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            out.push_str(&format!("{}{} {{\n", indent, name));
            write_message(out, map, depth + 1)?;
            out.push_str(&format!("{}}}\n", indent));
        }
        Value::String(s) => out.push_str(&format!("{}{}: {}\n", indent, name, quote(s))),
        other => out.push_str(&format!("{}{}: {}\n", indent, name, other)),
    }
    Ok(())
}

/// Enum-like words stay bare; anything else is quoted
fn quote(s: &str) -> String {
    if BARE_WORD.is_match(s) && resolve_plain(s).is_string() {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Value {
        Value::Object(parse_prototxt(text).unwrap())
    }

    #[test]
    fn test_scalars_and_nesting() {
        let doc = parse(concat!(
            "name: \"net\"\n",
            "layer {\n",
            "  type: CONV  # comment\n",
            "  param < lr: 1.5 frozen: false >\n",
            "}\n",
            "count: -3\n",
        ));
        assert_eq!(
            doc,
            json!({
                "name": "net",
                "layer": {"type": "CONV", "param": {"lr": 1.5, "frozen": false}},
                "count": -3,
            })
        );
    }

    #[test]
    fn test_repeated_fields_collapse() {
        let doc = parse("dim: 1 dim: 2; dim: 3, shape { x: 1 } shape { x: 2 }");
        assert_eq!(doc, json!({"dim": [1, 2, 3], "shape": [{"x": 1}, {"x": 2}]}));
    }

    #[test]
    fn test_list_values_and_strings() {
        let doc = parse("v: [1, 2.5, ENUM] s: 'it\\'s' \" ok\\n\" e: [] m: { }");
        assert_eq!(
            doc,
            json!({"v": [1, 2.5, "ENUM"], "s": "it's ok\n", "e": [], "m": {}})
        );
    }

    #[test]
    fn test_hex_escape() {
        assert_eq!(parse(r#"s: "\x41\x62""#), json!({"s": "Ab"}));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_prototxt("a { b: 1"),
            Err(PrototxtError::UnexpectedEnd)
        ));
        assert!(matches!(
            parse_prototxt("a: \"open"),
            Err(PrototxtError::UnterminatedString(3))
        ));
        assert!(matches!(
            parse_prototxt("a 1"),
            Err(PrototxtError::Unexpected { offset: 2, .. })
        ));
        assert!(matches!(
            parse_prototxt("a: 1 }"),
            Err(PrototxtError::Unexpected { offset: 5, .. })
        ));
        assert!(matches!(
            parse_prototxt("a: @"),
            Err(PrototxtError::Unexpected { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}x: 1{}", "a { ".repeat(depth), " }".repeat(depth));
        assert!(parse_prototxt(&nested(MAX_DEPTH)).is_ok());
        assert!(matches!(
            parse_prototxt(&nested(MAX_DEPTH + 1)),
            Err(PrototxtError::TooDeep { .. })
        ));

        let deep = format!("a: {}1{}", "[".repeat(5000), "]".repeat(5000));
        assert!(matches!(parse_prototxt(&deep), Err(PrototxtError::TooDeep { .. })));
    }

    #[test]
    fn test_write_message() {
        let doc = json!({
            "name": "net",
            "note": "two words",
            "dim": [1, 2],
            "layer": {"type": "CONV", "on": true},
        });
        let text = to_prototxt(&doc).unwrap();
        assert_eq!(
            text,
            concat!(
                "name: net\n",
                "note: \"two words\"\n",
                "dim: 1\n",
                "dim: 2\n",
                "layer {\n",
                "  type: CONV\n",
                "  on: true\n",
                "}\n",
            )
        );
        assert_eq!(parse(&text), doc);
    }

    #[test]
    fn test_write_rejects_unrepresentable() {
        assert_eq!(to_prototxt(&json!([1])), Err(PrototxtError::NotAMessage));
        assert_eq!(
            to_prototxt(&json!({"m": [[1]]})),
            Err(PrototxtError::NestedList("m".to_string()))
        );
    }

    #[test]
    fn test_quoting_keeps_types() {
        let doc = json!({"a": "true", "b": "12", "c": "x\"y"});
        let text = to_prototxt(&doc).unwrap();
        assert_eq!(text, "a: \"true\"\nb: \"12\"\nc: \"x\\\"y\"\n");
        assert_eq!(parse(&text), doc);
    }
}
