use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use framelog_logs::{FilterError, FollowCommand, RecordFilter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Pipeline settings, usually loaded from a TOML file.
///
/// Every field is optional in the file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pairs buffered between backend and frontend
    pub channel_capacity: usize,

    /// Bytes per read from the followed source
    pub read_chunk_bytes: usize,

    /// How long the backend gets to stop before its follower is killed
    pub shutdown_grace_ms: u64,

    /// Skip malformed documents instead of ending the session
    pub persistent: bool,

    /// Hold the newest record until the next header arrives
    pub hold_last: bool,

    pub tail_program: String,
    pub ssh_program: String,

    /// Record filter specs such as `level=W,E` or `thread=12`
    pub filters: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            read_chunk_bytes: 64 * 1024,
            shutdown_grace_ms: 500,
            persistent: true,
            hold_last: true,
            tail_program: "tail".to_string(),
            ssh_program: "ssh".to_string(),
            filters: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn follow_command(&self) -> FollowCommand {
        FollowCommand {
            tail_program: self.tail_program.clone(),
            ssh_program: self.ssh_program.clone(),
        }
    }

    pub fn record_filter(&self) -> Result<RecordFilter, FilterError> {
        RecordFilter::from_specs(&self.filters)
    }
}
