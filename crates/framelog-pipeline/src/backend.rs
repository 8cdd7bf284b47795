use std::io::Read;

use tokio::sync::mpsc;

use framelog_frames::{FrameExtractor, TagRegistry};
use framelog_logs::{ChunkReader, FilterError, GlogReassembler, RecordFilter, messages};
use framelog_types::FramedDocument;

use crate::config::PipelineConfig;
use crate::control::{ControlEndpoint, ControlMessage};

/// How the backend session reads and parses its source
#[derive(Clone, Debug)]
pub struct BackendOptions {
    pub read_chunk_bytes: usize,
    pub hold_last: bool,
    pub persistent: bool,
    pub filter: RecordFilter,
    pub registry: TagRegistry,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            read_chunk_bytes: framelog_logs::DEFAULT_CHUNK_BYTES,
            hold_last: true,
            persistent: true,
            filter: RecordFilter::new(),
            registry: TagRegistry::with_defaults(),
        }
    }
}

impl BackendOptions {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, FilterError> {
        Ok(Self {
            read_chunk_bytes: config.read_chunk_bytes,
            hold_last: config.hold_last,
            persistent: config.persistent,
            filter: config.record_filter()?,
            registry: TagRegistry::with_defaults(),
        })
    }
}

/// Why the backend loop ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendExit {
    /// The frontend asked for shutdown
    Cancelled,

    /// The source reached its end
    SourceEnded,

    /// The data channel was closed by the frontend
    ConsumerGone,

    /// Reassembly or extraction failed for good
    Failed(String),

    /// The backend did not stop within the grace period and could not be killed
    Abandoned,
}

/// Run one blocking backend session: source bytes through reassembly and
/// extraction, each pair out on `data`.
///
/// The control channel is checked once per extracted pair, before it is
/// sent. Terminal failures are reported back over the control channel.
pub fn run_backend<R: Read>(
    reader: R,
    options: BackendOptions,
    control: &mut ControlEndpoint,
    data: &mpsc::Sender<FramedDocument>,
) -> BackendExit {
    let chunks = ChunkReader::with_capacity(reader, options.read_chunk_bytes);
    let records = GlogReassembler::new()
        .with_hold_last(options.hold_last)
        .process(chunks);
    let records = options.filter.apply(records);
    let extractor = FrameExtractor::with_registry(messages(records), options.registry)
        .persistent(options.persistent);

    let mut sent = 0u64;
    for pair in extractor {
        let pair = match pair {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, sent, "backend stopped");
                control.send(ControlMessage::Failed(e.to_string()));
                return BackendExit::Failed(e.to_string());
            }
        };

        if control.shutdown_requested() {
            tracing::info!(sent, "backend shutting down on request");
            return BackendExit::Cancelled;
        }
        if data.blocking_send(pair).is_err() {
            tracing::info!(sent, "frontend gone, backend stopping");
            return BackendExit::ConsumerGone;
        }
        sent += 1;
    }

    tracing::info!(sent, "log source ended");
    BackendExit::SourceEnded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::control_channel;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::mpsc as std_mpsc;

    /// Reader fed chunk by chunk from another thread; ends when the sender drops
    struct GatedReader {
        chunks: std_mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for GatedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.chunks.recv() {
                    Ok(chunk) => self.pending = chunk,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn frame_record(name: &str, body: &str) -> String {
        format!(
            "I0920 10:42:02.000001  123 app.cc:10] --- # ---- {} ---- # ---\n{}",
            name, body
        )
    }

    const CLOSING: &str = "I0920 10:42:09.000000  123 app.cc:99] # done\n";

    #[test]
    fn test_backend_runs_to_source_end() {
        let log = [
            frame_record("Thread: 1", "a: 1\n"),
            "W0920 10:42:02.500000  124 other.cc:5] not yaml: [\n".to_string(),
            frame_record("Thread: 2", "b: [1, 2]\n"),
        ]
        .concat();
        let options = BackendOptions {
            filter: RecordFilter::new().add_spec("filename=app\\.cc").unwrap(),
            ..BackendOptions::default()
        };

        let (data_tx, mut data_rx) = mpsc::channel(8);
        let (_frontend, mut backend) = control_channel();
        let exit = run_backend(Cursor::new(log), options, &mut backend, &data_tx);
        assert_eq!(exit, BackendExit::SourceEnded);

        let first = data_rx.blocking_recv().unwrap();
        assert_eq!(first.frame.index, Some(1));
        assert_eq!(first.document, json!({"a": 1}));
        let second = data_rx.blocking_recv().unwrap();
        assert_eq!(second.frame.index, Some(2));
        assert_eq!(second.document, json!({"b": [1, 2]}));
        assert!(data_rx.try_recv().is_err());
    }

    #[test]
    fn test_backend_reports_failure() {
        let log = format!(
            "{}I0920 10:42:03.000000  1 a.cc:1] # x\nQ0920 10:42:04.000000  1 a.cc:2] bad level\n",
            frame_record("A", "a: 1\n"),
        );
        let (data_tx, _data_rx) = mpsc::channel(8);
        let (mut frontend, mut backend) = control_channel();
        let exit = run_backend(Cursor::new(log), BackendOptions::default(), &mut backend, &data_tx);

        assert!(matches!(exit, BackendExit::Failed(_)));
        assert!(matches!(frontend.try_recv(), Some(ControlMessage::Failed(_))));
    }

    #[test]
    fn test_backend_stops_when_consumer_gone() {
        let log = [frame_record("A", "a: 1\n"), frame_record("B", "b: 2\n")].concat();
        let (data_tx, data_rx) = mpsc::channel(8);
        drop(data_rx);
        let (_frontend, mut backend) = control_channel();
        let exit = run_backend(Cursor::new(log), BackendOptions::default(), &mut backend, &data_tx);
        assert_eq!(exit, BackendExit::ConsumerGone);
    }

    #[test]
    fn test_shutdown_stops_backend_between_documents() {
        let (chunk_tx, chunk_rx) = std_mpsc::channel();
        let reader = GatedReader {
            chunks: chunk_rx,
            pending: Vec::new(),
        };
        let (data_tx, mut data_rx) = mpsc::channel(8);
        let (frontend, mut backend) = control_channel();
        let handle = std::thread::spawn(move || {
            run_backend(reader, BackendOptions::default(), &mut backend, &data_tx)
        });

        // three documents; the last one only completes once the source ends
        let log = [
            frame_record("Thread: 1", "a: 1\n"),
            frame_record("Thread: 2", "b: 2\n"),
            frame_record("Thread: 3", "c: 3\n"),
            CLOSING.to_string(),
        ]
        .concat();
        chunk_tx.send(log.into_bytes()).unwrap();

        let first = data_rx.blocking_recv().unwrap();
        assert_eq!(first.frame.index, Some(1));
        assert!(frontend.send(ControlMessage::Shutdown));
        drop(chunk_tx);

        assert_eq!(handle.join().unwrap(), BackendExit::Cancelled);
        let mut late = Vec::new();
        while let Some(pair) = data_rx.blocking_recv() {
            late.push(pair);
        }
        assert!(late.len() <= 1, "{:?}", late);
        assert!(late.iter().all(|pair| pair.frame.index == Some(2)));
    }
}
