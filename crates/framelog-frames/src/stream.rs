//! Pull-based text adapter between the message stream and the YAML parser.
//!
//! The parser pulls characters; messages arrive as whole log bodies. The
//! adapter splits messages into lines, shows every line to the frame queue on
//! the way through, and hands out exactly the text it received. Its only
//! buffer is the unread remainder of the line fetched last.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use framelog_types::Frame;

use crate::error::BoxError;
use crate::marker::is_document_start;
use crate::queue::FrameQueue;

/// Lines kept for replaying the latest document after a parse failure
const MAX_REPLAY_LINES: usize = 4096;

pub struct TextStream<I> {
    upstream: I,
    exhausted: bool,
    upstream_error: Option<BoxError>,

    /// Complete lines split off upstream messages, not fetched yet
    lines: VecDeque<String>,

    /// Upstream text without a newline yet
    carry: String,

    /// Last fetched line and the read position in it
    line: String,
    pos: usize,

    /// A read of `n > 0` returns one line instead
    line_granular: bool,

    frames: FrameQueue,

    /// Number of document-start lines fetched so far
    boundaries: u64,

    /// Lines fetched since the latest document-start line, inclusive
    since_boundary: Vec<String>,

    /// Lines to hand out again before pulling upstream
    replay: VecDeque<String>,

    /// Drop lines until the next document start
    skipping: bool,
}

impl<I, E> TextStream<I>
where
    I: Iterator<Item = Result<String, E>>,
    E: Into<BoxError>,
{
    pub fn new(upstream: I) -> Self {
        Self {
            upstream,
            exhausted: false,
            upstream_error: None,
            lines: VecDeque::new(),
            carry: String::new(),
            line: String::new(),
            pos: 0,
            line_granular: false,
            frames: FrameQueue::new(),
            boundaries: 0,
            since_boundary: Vec::new(),
            replay: VecDeque::new(),
            skipping: false,
        }
    }

    /// Make every positive-size read return a single line
    pub fn line_granular(mut self, enabled: bool) -> Self {
        self.line_granular = enabled;
        self
    }

    /// Read up to `size` characters; `None` reads to the end of the stream.
    ///
    /// Fewer characters are returned only at the end of the stream.
    pub fn read(&mut self, size: Option<usize>) -> String {
        let size = match size {
            None => return self.read_to_end(),
            Some(0) => return String::new(),
            Some(size) => size,
        };
        if self.line_granular {
            return self.read_line();
        }

        let mut out = String::new();
        let mut count = 0;
        while count < size {
            match self.next_char() {
                Some(c) => {
                    out.push(c);
                    count += 1;
                }
                None => break,
            }
        }
        out
    }

    /// Read the rest of the current line, or the next full line
    pub fn read_line(&mut self) -> String {
        if self.pos < self.line.len() {
            let rest = self.line[self.pos..].to_string();
            self.pos = self.line.len();
            return rest;
        }
        match self.fetch_line() {
            Some(line) => {
                self.line.clear();
                self.pos = 0;
                line
            }
            None => String::new(),
        }
    }

    /// Read everything up to the end of the stream
    pub fn read_to_end(&mut self) -> String {
        let mut out = self.line[self.pos..].to_string();
        self.pos = self.line.len();
        while let Some(line) = self.fetch_line() {
            out.push_str(&line);
        }
        self.line.clear();
        self.pos = 0;
        out
    }

    pub fn next_char(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.line[self.pos..].chars().next() {
                self.pos += c.len_utf8();
                return Some(c);
            }
            self.line = self.fetch_line()?;
            self.pos = 0;
        }
    }

    pub fn frames(&self) -> &FrameQueue {
        &self.frames
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn reset_frames(&mut self) {
        self.frames.reset();
    }

    /// Number of document-start lines fetched so far
    pub fn boundaries(&self) -> u64 {
        self.boundaries
    }

    pub fn take_upstream_error(&mut self) -> Option<BoxError> {
        self.upstream_error.take()
    }

    pub fn has_upstream_error(&self) -> bool {
        self.upstream_error.is_some()
    }

    /// Drop the document that failed to parse and line up on the next one.
    ///
    /// `doc_boundaries` is the boundary count when the failed document
    /// started. If a later document has already begun, its lines are replayed
    /// from its first line; otherwise input is skipped up to the next
    /// document start. The frame queue is cleared either way; replayed marker
    /// lines push their frames again.
    pub fn resync(&mut self, doc_boundaries: u64) {
        self.frames.reset();
        self.line.clear();
        self.pos = 0;

        if self.boundaries > doc_boundaries && !self.since_boundary.is_empty() {
            let lines = std::mem::take(&mut self.since_boundary);
            tracing::debug!(lines = lines.len(), "replaying the next document");
            self.boundaries -= 1;
            for line in lines.into_iter().rev() {
                self.replay.push_front(line);
            }
        } else {
            tracing::debug!("skipping to the next document start");
            self.since_boundary.clear();
            self.skipping = true;
        }
    }

    /// Fetch the next whole line, inspecting it for frame markers
    fn fetch_line(&mut self) -> Option<String> {
        loop {
            let line = match self.replay.pop_front() {
                Some(line) => line,
                None => self.next_upstream_line()?,
            };

            if self.skipping {
                if !is_document_start(&line) {
                    tracing::trace!(line = line.trim_end(), "skipped");
                    continue;
                }
                self.skipping = false;
            }

            self.observe(&line);
            return Some(line);
        }
    }

    fn observe(&mut self, line: &str) {
        if is_document_start(line) {
            self.boundaries += 1;
            self.since_boundary.clear();
        }
        if self.boundaries > 0 {
            if self.since_boundary.len() >= MAX_REPLAY_LINES {
                self.since_boundary.clear();
            } else {
                self.since_boundary.push(line.to_string());
            }
        }
        self.frames.observe(line);
    }

    fn next_upstream_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Some(line);
            }
            if self.exhausted {
                if self.carry.is_empty() {
                    return None;
                }
                return Some(std::mem::take(&mut self.carry));
            }

            match self.upstream.next() {
                Some(Ok(text)) => {
                    for piece in text.split_inclusive('\n') {
                        self.carry.push_str(piece);
                        if piece.ends_with('\n') {
                            self.lines.push_back(std::mem::take(&mut self.carry));
                        }
                    }
                }
                Some(Err(e)) => {
                    self.upstream_error = Some(e.into());
                    self.exhausted = true;
                }
                None => self.exhausted = true,
            }
        }
    }
}

impl<I, E> Iterator for TextStream<I>
where
    I: Iterator<Item = Result<String, E>>,
    E: Into<BoxError>,
{
    type Item = char;

    fn next(&mut self) -> Option<char> {
        self.next_char()
    }
}

/// Shared handle to a [`TextStream`].
///
/// The YAML parser owns one handle as its character source while the
/// extractor keeps another to pop frames and to rebuild the parser after an
/// error. Both live on the same thread.
pub struct SharedStream<I> {
    inner: Rc<RefCell<TextStream<I>>>,
}

impl<I> Clone for SharedStream<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<I> SharedStream<I> {
    pub fn new(stream: TextStream<I>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(stream)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut TextStream<I>) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }
}

impl<I, E> Iterator for SharedStream<I>
where
    I: Iterator<Item = Result<String, E>>,
    E: Into<BoxError>,
{
    type Item = char;

    fn next(&mut self) -> Option<char> {
        self.inner.borrow_mut().next_char()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn stream(messages: &[&str]) -> TextStream<std::vec::IntoIter<Result<String, Infallible>>> {
        let messages: Vec<Result<String, Infallible>> =
            messages.iter().map(|m| Ok(m.to_string())).collect();
        TextStream::new(messages.into_iter())
    }

    #[test]
    fn test_chars_pass_through_verbatim() {
        let text: String = stream(&["a: 1\nb: ", "2\n", "c: ☃\n"]).collect();
        assert_eq!(text, "a: 1\nb: 2\nc: ☃\n");
    }

    #[test]
    fn test_sized_reads_never_drop_or_duplicate() {
        let messages = ["first line\nsecond", " line\n", "third\n", "tail"];
        let expected: String = messages.concat();
        for size in 1..20 {
            let mut s = stream(&messages);
            let mut out = String::new();
            loop {
                let chunk = s.read(Some(size));
                if chunk.is_empty() {
                    break;
                }
                assert!(chunk.chars().count() <= size);
                out.push_str(&chunk);
            }
            assert_eq!(out, expected, "read size {}", size);
        }
    }

    #[test]
    fn test_line_reads() {
        let mut s = stream(&["one\ntwo\n", "three"]);
        assert_eq!(s.read(Some(2)), "on");
        assert_eq!(s.read_line(), "e\n");
        assert_eq!(s.read_line(), "two\n");
        assert_eq!(s.read_line(), "three");
        assert_eq!(s.read_line(), "");
    }

    #[test]
    fn test_line_granular_reads() {
        let mut s = stream(&["one\ntwo\n"]).line_granular(true);
        assert_eq!(s.read(Some(1)), "one\n");
        assert_eq!(s.read(Some(100)), "two\n");
        assert_eq!(s.read(Some(0)), "");
        assert_eq!(s.read(Some(1)), "");
    }

    #[test]
    fn test_read_to_end_keeps_buffered_remainder() {
        let mut s = stream(&["abc\n", "def\n"]);
        assert_eq!(s.read(Some(1)), "a");
        assert_eq!(s.read(None), "bc\ndef\n");
    }

    #[test]
    fn test_frames_observed_per_line() {
        let mut s = stream(&["--- # -- A: 1 -- # ---\nx: 1\n--- # -- B: 2 -- # ---\n"]);
        assert_eq!(s.read_line(), "--- # -- A: 1 -- # ---\n");
        assert_eq!(s.frames().len(), 1);
        s.read_to_end();
        assert_eq!(s.frames().len(), 2);
        assert_eq!(s.boundaries(), 2);
        assert_eq!(s.pop_frame(), Some(Frame::new("A", Some(1))));
    }

    #[test]
    fn test_upstream_error_is_kept() {
        let messages: Vec<Result<String, String>> =
            vec![Ok("a\n".to_string()), Err("gone".to_string())];
        let mut s = TextStream::new(messages.into_iter());
        assert_eq!(s.read_to_end(), "a\n");
        assert!(s.has_upstream_error());
        assert_eq!(s.take_upstream_error().unwrap().to_string(), "gone");
    }

    #[test]
    fn test_resync_skips_to_next_document() {
        let mut s = stream(&["--- # -- A -- # ---\nbad: [\n", "more bad\n", "--- # -- B -- # ---\nok: 1\n"]);
        assert_eq!(s.read_line(), "--- # -- A -- # ---\n");
        let start = s.boundaries();
        assert_eq!(s.read(Some(3)), "bad");
        s.resync(start);
        assert!(s.frames().is_empty());
        assert_eq!(s.read_line(), "--- # -- B -- # ---\n");
        assert_eq!(s.frames().front(), Some(&Frame::new("B", None)));
        assert_eq!(s.read_line(), "ok: 1\n");
    }

    #[test]
    fn test_resync_replays_started_document() {
        let mut s = stream(&["--- # -- A -- # ---\nbad: [\n", "--- # -- B -- # ---\nok: 1\n"]);
        let start = {
            s.read_line();
            s.boundaries()
        };
        s.read_line();
        assert_eq!(s.read(Some(4)), "--- ");
        assert_eq!(s.frames().len(), 2);

        s.resync(start);
        assert_eq!(s.frames().len(), 0);
        assert_eq!(s.read_to_end(), "--- # -- B -- # ---\nok: 1\n");
        assert_eq!(s.frames().len(), 1);
        assert_eq!(s.pop_frame(), Some(Frame::new("B", None)));
    }
}
