//! Shared types for framelog
//!
//! This crate contains the data structures passed between the reassembler,
//! the frame extractor and the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Log Records
// ============================================================================

/// Severity level of a glog record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Info,
    Warning,
    Error,
    Fatal,
}

/// A level code that is not part of the glog mapping table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level code: {0:?}")]
pub struct LevelError(pub String);

impl Level {
    /// Map a glog level code to a level.
    ///
    /// Accepts the single letters (`I`, `W`, `E`, `F`), the numeric
    /// severities (`0`..`3`) and the full names (`INFO`, `WARNING`, `ERROR`,
    /// `FATAL`). Anything else is rejected.
    pub fn from_code(code: &str) -> Result<Self, LevelError> {
        match code {
            "I" | "0" | "INFO" => Ok(Self::Info),
            "W" | "1" | "WARNING" => Ok(Self::Warning),
            "E" | "2" | "ERROR" => Ok(Self::Error),
            "F" | "3" | "FATAL" => Ok(Self::Fatal),
            other => Err(LevelError(other.to_string())),
        }
    }

    /// Numeric glog severity
    pub fn severity(&self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Fatal => 3,
        }
    }

    /// Single-letter glog code
    pub fn letter(&self) -> char {
        match self {
            Self::Info => 'I',
            Self::Warning => 'W',
            Self::Error => 'E',
            Self::Fatal => 'F',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl FromStr for Level {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s.trim())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reassembled glog record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Severity from the header's level code
    pub level: Level,

    /// Header timestamp, microsecond precision
    pub timestamp: NaiveDateTime,

    /// Thread id from the header
    pub thread_id: u64,

    /// Source file name (`file.ext`)
    pub source_file: String,

    /// Source line number
    pub source_line: u32,

    /// Message body, including continuation lines and their newlines
    pub message: String,
}

// ============================================================================
// Frames and Documents
// ============================================================================

/// A structured document embedded in the log stream.
///
/// The pipeline never interprets documents, it only tracks their boundaries.
pub type Document = serde_json::Value;

/// A named, optionally indexed marker bounding one document
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    pub index: Option<i64>,
}

impl Frame {
    pub fn new(name: impl Into<String>, index: Option<i64>) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    /// The frame in effect before any marker line has been seen
    pub fn implicit() -> Self {
        Self {
            name: String::new(),
            index: Some(-1),
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.name.is_empty() && self.index == Some(-1)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_implicit() {
            return f.write_str("<implicit>");
        }
        match self.index {
            Some(index) => write!(f, "{}: {}", self.name, index),
            None => f.write_str(&self.name),
        }
    }
}

/// A document paired with the frame that introduced it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FramedDocument {
    pub frame: Frame,
    pub document: Document,
}

impl FramedDocument {
    pub fn new(frame: Frame, document: Document) -> Self {
        Self { frame, document }
    }
}
