use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use framelog_types::FramedDocument;

use crate::frontend::{Flow, Render};

/// Thread-safe ring buffer of recently received pairs
#[derive(Clone)]
pub struct FrameHistory {
    entries: Arc<RwLock<VecDeque<FramedDocument>>>,
    capacity: usize,

    /// Pairs pushed since creation or the last clear
    received: Arc<AtomicU64>,
}

impl FrameHistory {
    /// Create a history keeping the last `capacity` pairs
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push a pair, evicting the oldest if at capacity
    pub fn push(&self, pair: FramedDocument) {
        self.received.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(pair);
    }

    pub fn all(&self) -> Vec<FramedDocument> {
        self.entries.read().iter().cloned().collect()
    }

    /// Get the last N pairs
    pub fn tail(&self, n: usize) -> Vec<FramedDocument> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(n);
        entries.iter().skip(start).cloned().collect()
    }

    pub fn latest(&self) -> Option<FramedDocument> {
        self.entries.read().back().cloned()
    }

    /// Pairs whose frame has the given name
    pub fn by_frame(&self, name: &str) -> Vec<FramedDocument> {
        self.entries
            .read()
            .iter()
            .filter(|pair| pair.frame.name == name)
            .cloned()
            .collect()
    }

    /// Numeric values of a top-level key, oldest first.
    ///
    /// Documents without the key, or with a non-numeric value, are skipped.
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.entries
            .read()
            .iter()
            .filter_map(|pair| pair.document.get(key)?.as_f64())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.received.store(0, Ordering::SeqCst);
    }

    /// Wrap a renderer so every pair it sees is recorded first
    pub fn record<R: Render>(&self, inner: R) -> Recorded<R> {
        Recorded {
            history: self.clone(),
            inner,
        }
    }
}

/// Renderer that feeds a [`FrameHistory`], see [`FrameHistory::record`]
pub struct Recorded<R> {
    history: FrameHistory,
    inner: R,
}

impl<R: Render> Render for Recorded<R> {
    fn render(&mut self, pair: &FramedDocument) -> anyhow::Result<Flow> {
        self.history.push(pair.clone());
        self.inner.render(pair)
    }
}
