//! Log processing for framelog
//!
//! This crate turns the raw byte stream of a followed glog file into
//! reassembled records: chunk decoding, record reassembly, record filters and
//! the local/remote followers that produce the bytes in the first place.

mod chunks;
mod filter;
mod reassembler;
mod source;

pub use chunks::{ChunkReader, DEFAULT_CHUNK_BYTES};
pub use filter::{FilterError, RecordFilter};
pub use reassembler::{GlogReassembler, ReassemblyError, Records, messages};
pub use source::{FollowCommand, FollowedSource, SourceError, SourceLocator};

// Re-export types used in our public API
pub use framelog_types::{Level, LevelError, Record};
