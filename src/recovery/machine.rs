//! Turns asynchronous channel notifications into decisions for the main loop.
//!
//! Handlers registered on a channel only push tagged [`ChannelEvent`]s. The
//! main loop drains them in [`RecoveryStateMachine::await_outcome`], drops
//! the ones from superseded channels, and picks the next [`Transition`].
//! Cancellation always wins over a pending recovery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::rabbitmq::broker::{BrokerChannel, ChannelId, ConfirmHandler, ShutdownHandler};

use super::events::{event_channel, ChannelEvent, EventQueue, EventSender};
use super::flags::RecoveryFlags;
use super::latch::SignalLatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryState {
    Healthy,
    Publishing,
    AwaitingOutcome,
    Recovering,
    Confirmed,
    Terminating,
}

/// What the main loop does after waking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Terminate,
    Recover,
    Republish,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub recreate_on_graceful_shutdown: bool,
    pub republish_on_confirm: bool,
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            recreate_on_graceful_shutdown: config.recreate_on_graceful_shutdown,
            republish_on_confirm: config.republish_on_confirm,
        }
    }
}

/// Cloneable handle for the operator interrupt path.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    flags: Arc<RecoveryFlags>,
    events: EventSender,
    latch: Arc<SignalLatch>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.flags.cancel() {
            info!("Cancellation requested");
        }
        self.events.push(ChannelEvent::Cancelled);
        self.latch.signal();
    }
}

pub struct RecoveryStateMachine {
    flags: Arc<RecoveryFlags>,
    sender: EventSender,
    events: EventQueue,
    /// Released only by cancellation; cuts backoff waits short.
    cancel_latch: Arc<SignalLatch>,
    policy: RecoveryPolicy,
    state: RecoveryState,
    current: Option<ChannelId>,
    confirm_pending: bool,
    confirmations: u64,
}

impl RecoveryStateMachine {
    pub fn new(policy: RecoveryPolicy) -> Self {
        let (sender, events) = event_channel();
        Self {
            flags: Arc::new(RecoveryFlags::new()),
            sender,
            events,
            cancel_latch: Arc::new(SignalLatch::new()),
            policy,
            state: RecoveryState::Healthy,
            current: None,
            confirm_pending: false,
            confirmations: 0,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flags: Arc::clone(&self.flags),
            events: self.sender.clone(),
            latch: Arc::clone(&self.cancel_latch),
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Acks observed so far, on any channel.
    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    pub fn enter(&mut self, state: RecoveryState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, channel_id = ?self.current, "State transition");
            self.state = state;
        }
    }

    /// Subscribes to `channel` and makes it the current one.
    pub fn attach<C: BrokerChannel>(&mut self, channel: &C) {
        let id = channel.id();
        channel.on_shutdown(self.shutdown_handler(id));
        channel.on_confirmed(self.confirm_handler(id));
        self.track(id);
    }

    /// Makes `id` the current channel; events from any other id are stale from now on.
    pub fn track(&mut self, id: ChannelId) {
        self.current = Some(id);
        self.confirm_pending = false;
        self.flags.take_channel_dead();
        self.enter(RecoveryState::Healthy);
    }

    /// Forgets the current channel, e.g. after a failed publish.
    pub fn detach(&mut self) {
        self.current = None;
        self.confirm_pending = false;
        self.flags.take_channel_dead();
    }

    pub fn shutdown_handler(&self, id: ChannelId) -> ShutdownHandler {
        let events = self.sender.clone();
        Arc::new(move |notification| events.push(ChannelEvent::Shutdown(id, notification)))
    }

    pub fn confirm_handler(&self, id: ChannelId) -> ConfirmHandler {
        let events = self.sender.clone();
        Arc::new(move |notification| events.push(ChannelEvent::Confirmed(id, notification)))
    }

    fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Cancelled => {
                self.flags.cancel();
            }
            ChannelEvent::Confirmed(id, confirmation) => {
                self.confirmations += 1;
                info!(channel_id = %id, delivery_tag = confirmation.delivery_tag, "Message received");
                if Some(id) == self.current {
                    self.confirm_pending = true;
                }
            }
            ChannelEvent::Shutdown(id, _) if Some(id) != self.current => {
                debug!(channel_id = %id, "Ignoring shutdown of superseded channel");
            }
            ChannelEvent::Shutdown(id, notification) => {
                if notification.is_graceful() && !self.policy.recreate_on_graceful_shutdown {
                    info!(channel_id = %id, "Channel closed gracefully: {}", notification.reply_text);
                    return;
                }
                warn!(
                    channel_id = %id,
                    reply_code = notification.reply_code,
                    "Channel shutdown: {}",
                    notification.reply_text
                );
                self.flags.mark_channel_dead();
            }
        }
    }

    fn decide(&mut self) -> Option<Transition> {
        if !self.flags.is_running() {
            self.enter(RecoveryState::Terminating);
            return Some(Transition::Terminate);
        }
        if self.flags.take_channel_dead() {
            self.enter(RecoveryState::Recovering);
            return Some(Transition::Recover);
        }
        if self.confirm_pending && self.policy.republish_on_confirm {
            self.confirm_pending = false;
            self.enter(RecoveryState::Confirmed);
            return Some(Transition::Republish);
        }
        None
    }

    /// Blocks until an event calls for action. Confirmations alone never end the
    /// wait unless the policy republishes on confirm.
    pub async fn await_outcome(&mut self) -> Transition {
        self.enter(RecoveryState::AwaitingOutcome);
        loop {
            if let Some(transition) = self.decide() {
                return transition;
            }
            for event in self.events.next_batch().await {
                self.apply(event);
            }
        }
    }

    /// Applies whatever is queued and reports whether the run was cancelled.
    pub fn poll_cancelled(&mut self) -> bool {
        for event in self.events.drain() {
            self.apply(event);
        }
        !self.flags.is_running()
    }

    /// Sleeps for `limit` unless cancellation arrives first. Returns `true` if cancelled.
    /// Channel events arriving meanwhile stay queued for the next drain.
    pub async fn cancelled_within(&self, limit: Duration) -> bool {
        // The latch is only signalled after `running` is cleared, so a
        // running flag here means no permit is pending.
        if self.flags.is_running() {
            let _ = tokio::time::timeout(limit, self.cancel_latch.wait()).await;
        }
        !self.flags.is_running()
    }
}
