use std::sync::atomic::{AtomicBool, Ordering};

/// Shared run state: `running` until cancellation, `channel_dead` while a
/// failed channel waits to be replaced.
#[derive(Debug)]
pub struct RecoveryFlags {
    running: AtomicBool,
    channel_dead: AtomicBool,
}

impl Default for RecoveryFlags {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            channel_dead: AtomicBool::new(false),
        }
    }
}

impl RecoveryFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that actually stopped the run.
    pub fn cancel(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    pub fn mark_channel_dead(&self) {
        self.channel_dead.store(true, Ordering::Release);
    }

    /// Read-and-clear.
    pub fn take_channel_dead(&self) -> bool {
        self.channel_dead.swap(false, Ordering::AcqRel)
    }
}
