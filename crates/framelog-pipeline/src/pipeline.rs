use std::io::Read;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use framelog_frames::TagRegistry;
use framelog_logs::{FilterError, FollowedSource, RecordFilter, SourceError, SourceLocator};

use crate::backend::{BackendExit, BackendOptions, run_backend};
use crate::config::PipelineConfig;
use crate::control::{ControlMessage, control_channel};
use crate::frontend::{FrontendExit, Render, run_frontend};

/// How a pipeline run ended on both sides
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub frontend: FrontendExit,
    pub backend: BackendExit,

    /// The follower had to be killed to stop the backend
    pub killed: bool,
}

/// Follows a log source on a blocking backend task and renders the
/// extracted pairs on the calling task.
pub struct Pipeline {
    config: PipelineConfig,
    options: BackendOptions,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, FilterError> {
        let options = BackendOptions::from_config(&config)?;
        Ok(Self { config, options })
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.options.filter = filter;
        self
    }

    pub fn with_registry(mut self, registry: TagRegistry) -> Self {
        self.options.registry = registry;
        self
    }

    /// Follow `locator` from its start and render every pair until the
    /// source ends or the frontend stops.
    pub async fn run<R: Render>(
        &self,
        locator: &SourceLocator,
        renderer: R,
    ) -> Result<PipelineReport, SourceError> {
        let mut source = self.config.follow_command().spawn(locator)?;
        let reader = source
            .take_reader()
            .ok_or_else(|| SourceError::NoOutput(locator.to_string()))?;
        Ok(self.run_with(reader, Some(source), renderer).await)
    }

    /// Run over an already open reader.
    ///
    /// Nothing can interrupt a blocked read here, so the reader must end by
    /// itself once the frontend is done.
    pub async fn run_reader<Rd, R>(&self, reader: Rd, renderer: R) -> PipelineReport
    where
        Rd: Read + Send + 'static,
        R: Render,
    {
        self.run_with(reader, None, renderer).await
    }

    async fn run_with<Rd, R>(
        &self,
        reader: Rd,
        source: Option<FollowedSource>,
        mut renderer: R,
    ) -> PipelineReport
    where
        Rd: Read + Send + 'static,
        R: Render,
    {
        let (data_tx, data_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (mut frontend_control, mut backend_control) = control_channel();

        let options = self.options.clone();
        let backend = tokio::task::spawn_blocking(move || {
            run_backend(reader, options, &mut backend_control, &data_tx)
        });

        let frontend = run_frontend(data_rx, &mut frontend_control, &mut renderer).await;
        tracing::debug!(?frontend, "frontend finished");
        frontend_control.send(ControlMessage::Shutdown);

        // The backend may be stuck in a read on a silent source; kill the
        // follower if it does not come back within the grace period.
        let stopped = CancellationToken::new();
        let watcher = source.map(|source| {
            tokio::spawn(kill_after(
                source,
                self.config.shutdown_grace(),
                stopped.clone(),
            ))
        });

        let backend = match backend.await {
            Ok(exit) => exit,
            Err(e) => BackendExit::Failed(format!("backend task failed: {}", e)),
        };
        stopped.cancel();

        let killed = match watcher {
            Some(watcher) => watcher.await.unwrap_or(false),
            None => false,
        };

        tracing::info!(?backend, killed, "pipeline finished");
        PipelineReport {
            frontend,
            backend,
            killed,
        }
    }
}

/// Kill the follower unless `stopped` fires within `grace`.
///
/// The follower is stopped either way when this returns; the result says
/// whether the kill was needed to unblock the backend.
async fn kill_after(mut source: FollowedSource, grace: Duration, stopped: CancellationToken) -> bool {
    if tokio::time::timeout(grace, stopped.cancelled()).await.is_ok() {
        return false;
    }

    tracing::warn!(
        grace_ms = grace.as_millis() as u64,
        pid = source.id(),
        "backend did not stop in time, killing the log follower"
    );
    if let Err(e) = source.kill() {
        tracing::error!(error = %e, "failed to kill the log follower");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Flow;
    use framelog_types::{Frame, FramedDocument};
    use serde_json::json;
    use std::io::Cursor;

    const LOG: &str = concat!(
        "I0920 10:42:02.000001  123 app.cc:10] --- # ---- Thread: 1 ---- # ---\n",
        "name: value\n",
        "I0920 10:42:02.000101  123 app.cc:11] --- # ---- Thread: 2 ---- # ---\n",
        "values: [1, 2, 3]\n",
        "W0920 10:42:02.000201  123 app.cc:12] --- # ---- Thread: 3 ---- # ---\n",
        "broken: [\n",
        "I0920 10:42:02.000301  123 app.cc:13] --- # ---- Thread: 4 ---- # ---\n",
        "c: !complex 1-1j\n",
    );

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig {
            channel_capacity: 2,
            ..PipelineConfig::default()
        })
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reader_end_to_end() {
        let mut seen = Vec::new();
        let report = pipeline()
            .run_reader(Cursor::new(LOG), |pair: &FramedDocument| -> anyhow::Result<Flow> {
                seen.push(pair.clone());
                Ok(Flow::Continue)
            })
            .await;

        assert_eq!(report.frontend, FrontendExit::SourceClosed);
        assert_eq!(report.backend, BackendExit::SourceEnded);
        assert!(!report.killed);
        assert_eq!(
            seen,
            vec![
                FramedDocument::new(Frame::new("Thread", Some(1)), json!({"name": "value"})),
                FramedDocument::new(Frame::new("Thread", Some(2)), json!({"values": [1, 2, 3]})),
                FramedDocument::new(
                    Frame::new("Thread", Some(4)),
                    json!({"c": {"re": 1.0, "im": -1.0}})
                ),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_filter_from_config() {
        let config = PipelineConfig {
            filters: vec!["level=W".to_string()],
            ..PipelineConfig::default()
        };
        let mut seen = Vec::new();
        let report = Pipeline::new(config)
            .unwrap()
            .run_reader(Cursor::new(LOG), |pair: &FramedDocument| -> anyhow::Result<Flow> {
                seen.push(pair.frame.clone());
                Ok(Flow::Continue)
            })
            .await;

        // the only warning record holds a broken document
        assert_eq!(report.backend, BackendExit::SourceEnded);
        assert!(seen.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_from_renderer() {
        let report = pipeline()
            .run_reader(Cursor::new(LOG), |_: &FramedDocument| -> anyhow::Result<Flow> {
                Ok(Flow::Stop)
            })
            .await;

        assert_eq!(report.frontend, FrontendExit::Stopped);
        assert!(matches!(
            report.backend,
            BackendExit::Cancelled | BackendExit::ConsumerGone | BackendExit::SourceEnded
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_strict_mode_reports_failure() {
        let config = PipelineConfig {
            persistent: false,
            ..PipelineConfig::default()
        };
        let mut count = 0;
        let report = Pipeline::new(config)
            .unwrap()
            .run_reader(Cursor::new(LOG), |_: &FramedDocument| -> anyhow::Result<Flow> {
                count += 1;
                Ok(Flow::Continue)
            })
            .await;

        assert_eq!(count, 2);
        assert_eq!(report.frontend, FrontendExit::SourceClosed);
        assert!(matches!(report.backend, BackendExit::Failed(_)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_follower_killed_after_grace() {
        let path = std::env::temp_dir().join(format!("framelog-pipeline-{}.log", std::process::id()));
        // the second document stays open, so the backend blocks reading
        // right after sending the first pair
        let two_frames: String = LOG.split_inclusive('\n').take(4).collect();
        std::fs::write(&path, two_frames).unwrap();

        let config = PipelineConfig {
            shutdown_grace_ms: 100,
            hold_last: false,
            ..PipelineConfig::default()
        };
        let report = Pipeline::new(config)
            .unwrap()
            .run(
                &SourceLocator::Local(path.clone()),
                |_: &FramedDocument| -> anyhow::Result<Flow> { Ok(Flow::Stop) },
            )
            .await
            .unwrap();

        assert_eq!(report.frontend, FrontendExit::Stopped);
        assert!(report.killed);
        assert_eq!(report.backend, BackendExit::Cancelled);
        std::fs::remove_file(&path).unwrap();
    }
}
