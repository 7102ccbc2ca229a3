use crate::protocol::OutgoingMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Sending side of a connection's outgoing queue.
///
/// Cloneable and never blocks. Messages pile up while the connection is
/// down and go out once it's back.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
}

/// Receiving side, owned by the [`ConnectionManager`](super::ConnectionManager)
#[derive(Debug)]
pub struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<OutgoingMessage>,
}

impl Outbox {
    pub fn channel() -> (Outbox, OutboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, OutboxReceiver { rx })
    }

    pub fn send(&self, message: OutgoingMessage) {
        if let Err(e) = self.tx.send(message) {
            warn!("Connection is shut down, dropping outgoing {}", e.0);
        }
    }
}

impl OutboxReceiver {
    pub(crate) async fn recv(&mut self) -> Option<OutgoingMessage> {
        self.rx.recv().await
    }

    /// Refuse further messages
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
