//! Concurrent backend/frontend pipeline for framelog
//!
//! The backend follows a log source on a blocking task, reassembles records
//! and extracts framed documents; the frontend renders them on the calling
//! task. The two sides share nothing but a bounded data channel and a
//! bidirectional control channel.

mod backend;
mod config;
mod control;
mod frontend;
mod history;
mod pipeline;

pub use backend::{BackendExit, BackendOptions, run_backend};
pub use config::{ConfigError, PipelineConfig};
pub use control::{ControlEndpoint, ControlMessage, control_channel};
pub use frontend::{Flow, FrontendExit, Render, pairs, run_frontend};
pub use history::{FrameHistory, Recorded};
pub use pipeline::{Pipeline, PipelineReport};

// Re-export types used in our public API
pub use framelog_types::{Document, Frame, FramedDocument};
