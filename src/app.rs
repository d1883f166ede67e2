// src/app.rs
use std::path::Path;

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{PublisherConfig, TopologyConfig};
use crate::message::Message;
use crate::rabbitmq::broker::{BrokerConnector, ConnectionParameters, ExchangeSpec};
use crate::rabbitmq::errors::{PublisherError, Result};
use crate::recovery::{CancelHandle, MainLoop, RecoveryPolicy, RecoveryStateMachine, RecreatePolicy, RunSummary};

/// Validates the input file. Runs before any connection is attempted.
pub fn load_message(args: &[String], topology: &TopologyConfig) -> Result<Message> {
    let path = args.first().ok_or(PublisherError::ArgumentError)?;
    Message::from_file(Path::new(path), topology)
}

pub struct Publisher {
    config: PublisherConfig,
    machine: RecoveryStateMachine,
}

impl Publisher {
    pub fn new(config: PublisherConfig) -> Self {
        let machine = RecoveryStateMachine::new(RecoveryPolicy::from(&config.recovery));
        Self { config, machine }
    }

    /// Hand this to the interrupt handler before calling [`Publisher::run`].
    pub fn cancel_handle(&self) -> CancelHandle {
        self.machine.cancel_handle()
    }

    /// Only startup failures come back as `Err`; everything after the
    /// connection is up is handled inside the loop.
    pub async fn run<C: BrokerConnector>(self, args: &[String], connector: &C) -> Result<RunSummary> {
        let message = load_message(args, &self.config.topology)?;
        info!("Sending message of {} bytes", message.body().len());

        let params = ConnectionParameters::from(&self.config.connection);
        let session = connector.open(&params).await?;

        let main_loop = MainLoop::new(
            session,
            self.machine,
            ExchangeSpec::topic(self.config.topology.exchange.clone()),
            message,
            RecreatePolicy::from(&self.config.recovery),
        );

        let span = info_span!("publisher", run_id = %Uuid::new_v4());
        Ok(main_loop.run().instrument(span).await)
    }
}
