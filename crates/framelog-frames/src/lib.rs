//! Frame-synchronized document extraction.
//!
//! Log messages carry YAML documents introduced by frame marker lines such
//! as `--- # ---- Thread: 1 ---- # ---`. [`FrameExtractor`] turns a message
//! stream into `(Frame, Document)` pairs.

pub mod composer;
pub mod error;
pub mod extractor;
pub mod marker;
pub mod prototxt;
pub mod queue;
pub mod stream;
pub mod tags;

pub use composer::compose_str;
pub use error::{BoxError, ComposeError, ExtractError, TagError};
pub use extractor::FrameExtractor;
pub use marker::{is_document_start, make_frame, parse_marker};
pub use prototxt::{PrototxtError, parse_prototxt, to_prototxt};
pub use queue::FrameQueue;
pub use stream::{SharedStream, TextStream};
pub use tags::{TagHandler, TagRegistry};

pub use framelog_types::{Document, Frame, FramedDocument};
