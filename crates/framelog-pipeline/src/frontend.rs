use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use framelog_types::FramedDocument;

use crate::control::{ControlEndpoint, ControlMessage};

/// What the frontend does after rendering a pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Ask the backend to shut down and leave the loop
    Stop,
}

/// Consumer of extracted pairs
pub trait Render {
    fn render(&mut self, pair: &FramedDocument) -> anyhow::Result<Flow>;
}

impl<F> Render for F
where
    F: FnMut(&FramedDocument) -> anyhow::Result<Flow>,
{
    fn render(&mut self, pair: &FramedDocument) -> anyhow::Result<Flow> {
        self(pair)
    }
}

/// Why the frontend loop ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrontendExit {
    /// The backend closed the data channel
    SourceClosed,

    /// The renderer returned [`Flow::Stop`]
    Stopped,

    /// The renderer failed
    RenderFailed(String),
}

/// The data channel as a stream of pairs
pub fn pairs(data: mpsc::Receiver<FramedDocument>) -> impl Stream<Item = FramedDocument> {
    futures::stream::unfold(data, |mut data| async move {
        data.recv().await.map(|pair| (pair, data))
    })
}

/// Receive pairs and render them until the backend is done, the renderer
/// stops, or the renderer fails.
pub async fn run_frontend<R: Render>(
    data: mpsc::Receiver<FramedDocument>,
    control: &mut ControlEndpoint,
    renderer: &mut R,
) -> FrontendExit {
    let mut incoming = std::pin::pin!(pairs(data));
    let mut received = 0u64;

    while let Some(pair) = incoming.next().await {
        received += 1;
        match renderer.render(&pair) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => {
                tracing::info!(received, "renderer requested stop");
                control.send(ControlMessage::Shutdown);
                return FrontendExit::Stopped;
            }
            Err(e) => {
                tracing::error!(error = %e, frame = %pair.frame, "renderer failed");
                if !control.send(ControlMessage::Shutdown) {
                    tracing::debug!("backend already gone");
                }
                return FrontendExit::RenderFailed(format!("{:#}", e));
            }
        }
    }

    while let Some(message) = control.try_recv() {
        if let ControlMessage::Failed(reason) = message {
            tracing::error!(%reason, "backend failed");
        }
    }
    tracing::info!(received, "data channel closed");
    FrontendExit::SourceClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::control_channel;
    use framelog_types::Frame;
    use serde_json::json;

    fn pair(index: i64) -> FramedDocument {
        FramedDocument::new(Frame::new("Thread", Some(index)), json!({"i": index}))
    }

    async fn filled(count: i64) -> mpsc::Receiver<FramedDocument> {
        let (tx, rx) = mpsc::channel(16);
        for i in 0..count {
            tx.send(pair(i)).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_renders_until_channel_closes() {
        let (mut frontend, backend) = control_channel();
        let mut seen = Vec::new();
        let mut renderer = |pair: &FramedDocument| -> anyhow::Result<Flow> {
            seen.push(pair.frame.index);
            Ok(Flow::Continue)
        };

        let exit = run_frontend(filled(3).await, &mut frontend, &mut renderer).await;
        assert_eq!(exit, FrontendExit::SourceClosed);
        assert_eq!(seen, [Some(0), Some(1), Some(2)]);
        drop(backend);
    }

    #[tokio::test]
    async fn test_stop_sends_shutdown() {
        let (mut frontend, mut backend) = control_channel();
        let mut renderer = |pair: &FramedDocument| -> anyhow::Result<Flow> {
            Ok(if pair.frame.index == Some(1) {
                Flow::Stop
            } else {
                Flow::Continue
            })
        };

        let exit = run_frontend(filled(3).await, &mut frontend, &mut renderer).await;
        assert_eq!(exit, FrontendExit::Stopped);
        assert!(backend.shutdown_requested());
    }

    #[tokio::test]
    async fn test_render_error_notifies_backend() {
        let (mut frontend, mut backend) = control_channel();
        let mut renderer =
            |_: &FramedDocument| -> anyhow::Result<Flow> { anyhow::bail!("terminal went away") };

        let exit = run_frontend(filled(2).await, &mut frontend, &mut renderer).await;
        assert_eq!(exit, FrontendExit::RenderFailed("terminal went away".to_string()));
        assert_eq!(backend.try_recv(), Some(ControlMessage::Shutdown));
    }

    #[tokio::test]
    async fn test_pairs_stream() {
        let collected: Vec<_> = pairs(filled(2).await).collect().await;
        assert_eq!(collected, vec![pair(0), pair(1)]);
    }
}
