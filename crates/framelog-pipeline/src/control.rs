use tokio::sync::mpsc::{self, error::TryRecvError};

/// Signals exchanged between backend and frontend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Stop producing and exit
    Shutdown,

    /// The backend hit a terminal error
    Failed(String),
}

/// One end of the bidirectional control channel
#[derive(Debug)]
pub struct ControlEndpoint {
    tx: mpsc::UnboundedSender<ControlMessage>,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
}

/// Create both ends of a control channel
pub fn control_channel() -> (ControlEndpoint, ControlEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        ControlEndpoint { tx: a_tx, rx: b_rx },
        ControlEndpoint { tx: b_tx, rx: a_rx },
    )
}

impl ControlEndpoint {
    /// Best-effort send; false if the peer is gone
    pub fn send(&self, message: ControlMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<ControlMessage> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<ControlMessage> {
        self.rx.recv().await
    }

    /// Drain pending messages and report whether the peer asked to stop.
    ///
    /// A peer that has gone away counts as a request to stop.
    pub fn shutdown_requested(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(ControlMessage::Shutdown) => return true,
                Ok(ControlMessage::Failed(reason)) => {
                    tracing::debug!(%reason, "peer reported failure");
                }
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }
}
