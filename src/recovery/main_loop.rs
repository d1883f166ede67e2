use tracing::{error, info, warn};

use crate::message::Message;
use crate::rabbitmq::broker::{BrokerChannel, BrokerSession, ExchangeSpec};
use crate::rabbitmq::errors::{PublisherError, Result};

use super::backoff::RecreatePolicy;
use super::machine::{RecoveryState, RecoveryStateMachine, Transition};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub publishes: u64,
    pub channels_opened: u64,
    pub recreations: u64,
    pub confirmations: u64,
    /// The loop stopped because recreation kept failing, not because of cancellation.
    pub gave_up: bool,
}

/// Publish, wait, then recover, republish or stop, until cancelled.
pub struct MainLoop<S: BrokerSession> {
    session: S,
    machine: RecoveryStateMachine,
    exchange: ExchangeSpec,
    message: Message,
    retry: RecreatePolicy,
    summary: RunSummary,
    recovering: bool,
}

impl<S: BrokerSession> MainLoop<S> {
    pub fn new(
        session: S,
        machine: RecoveryStateMachine,
        exchange: ExchangeSpec,
        message: Message,
        retry: RecreatePolicy,
    ) -> Self {
        Self {
            session,
            machine,
            exchange,
            message,
            retry,
            summary: RunSummary::default(),
            recovering: false,
        }
    }

    /// Runs until cancelled (or until recreation gives up). The session is
    /// closed exactly once on the way out, whatever the exit path.
    pub async fn run(mut self) -> RunSummary {
        let mut channel: Option<S::Channel> = None;
        let mut failures: u32 = 0;

        loop {
            if self.machine.poll_cancelled() {
                break;
            }

            let current = match channel.take() {
                Some(current) => current,
                None => match self.open_channel().await {
                    Ok(opened) => opened,
                    Err(e) => {
                        error!("{}", e);
                        failures += 1;
                        if self.back_off(failures).await {
                            continue;
                        }
                        break;
                    }
                },
            };

            if self.machine.poll_cancelled() {
                channel = Some(current);
                break;
            }

            self.machine.enter(RecoveryState::Publishing);
            if let Err(e) = current.publish(&self.message).await {
                error!(channel_id = %current.id(), "{}", e);
                self.machine.detach();
                self.recovering = true;
                self.close_channel(current).await;
                failures += 1;
                if self.back_off(failures).await {
                    continue;
                }
                break;
            }
            self.summary.publishes += 1;
            failures = 0;

            match self.machine.await_outcome().await {
                Transition::Terminate => {
                    channel = Some(current);
                    break;
                }
                Transition::Recover => {
                    // The dead channel is dropped, never published to again.
                    self.machine.detach();
                    self.recovering = true;
                    info!(channel_id = %current.id(), "Creating new channel");
                }
                Transition::Republish => {
                    channel = Some(current);
                }
            }
        }

        self.machine.enter(RecoveryState::Terminating);
        if let Some(current) = channel {
            self.close_channel(current).await;
        }
        if let Err(e) = self.session.close().await {
            warn!("Failed to close connection: {}", e);
        }

        self.summary.confirmations = self.machine.confirmations();
        info!(
            publishes = self.summary.publishes,
            channels_opened = self.summary.channels_opened,
            recreations = self.summary.recreations,
            confirmations = self.summary.confirmations,
            "Publisher stopped"
        );
        self.summary
    }

    /// Creates a channel and readies it for publishing: exchange declared and
    /// confirm mode on, both redone for every new channel.
    async fn open_channel(&mut self) -> Result<S::Channel> {
        let channel = self.session.create_channel().await.map_err(|e| self.creation_error(e))?;
        self.summary.channels_opened += 1;
        self.machine.attach(&channel);

        let ready = async {
            channel.declare_exchange(&self.exchange).await?;
            channel.enable_confirmations().await
        };
        if let Err(e) = ready.await {
            self.machine.detach();
            self.close_channel(channel).await;
            return Err(self.creation_error(e));
        }

        if self.recovering {
            self.recovering = false;
            self.summary.recreations += 1;
            info!(channel_id = %channel.id(), "Channel created");
        }
        Ok(channel)
    }

    fn creation_error(&self, err: PublisherError) -> PublisherError {
        if self.recovering {
            PublisherError::RecreationError(err.to_string())
        } else {
            err
        }
    }

    async fn close_channel(&self, channel: S::Channel) {
        if let Err(e) = channel.close().await {
            warn!(channel_id = %channel.id(), "Failed to close channel: {}", e);
        }
    }

    /// Returns whether the loop should try again.
    async fn back_off(&mut self, failures: u32) -> bool {
        if self.retry.exhausted(failures) {
            error!("Giving up after {} consecutive failures", failures);
            self.summary.gave_up = true;
            return false;
        }
        let delay = self.retry.delay(failures);
        warn!(attempt = failures, "Retrying in {}ms", delay.as_millis());
        !self.machine.cancelled_within(delay).await
    }
}
