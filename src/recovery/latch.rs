//! Auto-reset wake primitive.
//!
//! [`SignalLatch`] hands control from the interrupt handler back to the task
//! blocked in [`SignalLatch::wait`]. It is a one-slot channel: a signal sent
//! while nobody waits stays buffered for the next wait, and further signals
//! before that wait find the slot full and are coalesced into it.

use tokio::sync::{mpsc, Mutex};

#[derive(Debug)]
pub struct SignalLatch {
    tx: mpsc::Sender<()>,
    rx: Mutex<mpsc::Receiver<()>>,
}

impl Default for SignalLatch {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx: Mutex::new(rx) }
    }
}

impl SignalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases one waiter, or arms the next wait if none is blocked.
    pub fn signal(&self) {
        // A full slot already holds the pending signal.
        let _ = self.tx.try_send(());
    }

    pub async fn wait(&self) {
        // The latch owns a sender, so the channel never closes under us.
        self.rx.lock().await.recv().await;
    }
}
