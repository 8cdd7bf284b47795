use std::collections::VecDeque;

use framelog_types::Frame;

use crate::marker::{opens_content, parse_marker};

/// Frames seen in the text stream but not yet paired with a document.
///
/// Frames are pushed as their marker lines pass through the stream adapter
/// and popped once per parsed document, in order. Content before any marker
/// gets the implicit frame.
#[derive(Debug, Default, Clone)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one line on its way to the document parser
    pub fn observe(&mut self, line: &str) {
        if let Some(frame) = parse_marker(line) {
            tracing::trace!(%frame, "frame marker");
            self.frames.push_back(frame);
        } else if self.frames.is_empty() && opens_content(line) {
            self.frames.push_back(Frame::implicit());
        }
    }

    /// Pop the oldest unpaired frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_queue_in_order() {
        let mut queue = FrameQueue::new();
        queue.observe("--- # -- A: 1 -- # ---\n");
        queue.observe("x: 1\n");
        queue.observe("--- # -- B: 2 -- # ---\n");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(Frame::new("A", Some(1))));
        assert_eq!(queue.pop(), Some(Frame::new("B", Some(2))));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_implicit_frame_seeded_once() {
        let mut queue = FrameQueue::new();
        queue.observe("\n");
        queue.observe("# just a comment\n");
        assert!(queue.is_empty());

        queue.observe("x: 1\n");
        queue.observe("y: 2\n");
        assert_eq!(queue.len(), 1);
        assert!(queue.front().unwrap().is_implicit());

        queue.observe("--- # -- A -- # ---\n");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_reset() {
        let mut queue = FrameQueue::new();
        queue.observe("--- # -- A -- # ---\n");
        queue.reset();
        assert!(queue.is_empty());
    }
}
