use tokio::sync::mpsc;
use tracing::debug;

use crate::rabbitmq::broker::{ChannelId, ConfirmationNotification, ShutdownNotification};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Shutdown(ChannelId, ShutdownNotification),
    Confirmed(ChannelId, ConfirmationNotification),
    Cancelled,
}

/// Producer side, cloned into every broker callback and the cancel handle.
/// Sending never blocks, so it is safe from the client's callback threads.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl EventSender {
    pub fn push(&self, event: ChannelEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            debug!(?event, "Main loop is gone, dropping event");
        }
    }
}

/// Consumer side, owned by the main loop. Events come out in arrival order.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

pub fn event_channel() -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventQueue { rx })
}

impl EventQueue {
    /// Takes everything queued so far without waiting.
    pub fn drain(&mut self) -> Vec<ChannelEvent> {
        let mut batch = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            batch.push(event);
        }
        batch
    }

    /// Waits for at least one event, then takes the rest of what is queued.
    pub async fn next_batch(&mut self) -> Vec<ChannelEvent> {
        match self.rx.recv().await {
            Some(first) => {
                let mut batch = vec![first];
                batch.extend(self.drain());
                batch
            }
            // Every producer is gone; nothing can wake us again.
            None => vec![ChannelEvent::Cancelled],
        }
    }
}
