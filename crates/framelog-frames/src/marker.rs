use std::sync::LazyLock;

use regex::Regex;

use framelog_types::Frame;

/// `--- # ---- <name>[: <index>] ---- # ---`, one whole line
static FRAME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--- #\s+-*\s+(.+)\s+-*\s+# ---\n$").expect("frame marker pattern is valid")
});

/// Parse a frame marker line (including its trailing newline).
///
/// A line without the newline is not a marker yet.
pub fn parse_marker(line: &str) -> Option<Frame> {
    let caps = FRAME_MARKER.captures(line)?;
    Some(make_frame(&caps[1]))
}

/// Split marker text into name and index.
///
/// `"Thread: 3"` has index 3; text whose suffix is not an integer is all name.
pub fn make_frame(text: &str) -> Frame {
    match text.split_once(": ") {
        Some((name, index)) => match index.trim().parse::<i64>() {
            Ok(index) => Frame::new(name, Some(index)),
            Err(_) => Frame::new(text, None),
        },
        None => Frame::new(text, None),
    }
}

/// Whether a line starts a new YAML document (`---` at column zero)
pub fn is_document_start(line: &str) -> bool {
    match line.strip_prefix("---") {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Whether a line can open a document: anything except blank lines,
/// comment-only lines and explicit document ends.
pub fn opens_content(line: &str) -> bool {
    let trimmed = line.trim();
    !(trimmed.is_empty() || trimmed.starts_with('#') || is_document_end(line))
}

fn is_document_end(line: &str) -> bool {
    match line.strip_prefix("...") {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}
