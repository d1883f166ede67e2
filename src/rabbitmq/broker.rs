// src/rabbitmq/broker.rs
// Seams between the recovery logic and the AMQP client.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::Result;
use crate::config::ConnectionConfig;
use crate::message::Message;

/// AMQP reply codes used when classifying channel shutdowns.
pub mod reply_code {
    pub const REPLY_SUCCESS: u16 = 200;
    pub const CONNECTION_FORCED: u16 = 320;
    pub const INTERNAL_ERROR: u16 = 541;
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one channel instance.
///
/// The broker reuses channel numbers after a close, so events are tagged
/// with this generation number instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

pub type DeliveryTag = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownNotification {
    pub reply_code: u16,
    pub reply_text: String,
}

impl ShutdownNotification {
    pub fn new(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self {
            reply_code,
            reply_text: reply_text.into(),
        }
    }

    pub fn graceful(reply_text: impl Into<String>) -> Self {
        Self::new(reply_code::REPLY_SUCCESS, reply_text)
    }

    pub fn is_graceful(&self) -> bool {
        self.reply_code == reply_code::REPLY_SUCCESS
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationNotification {
    pub delivery_tag: DeliveryTag,
}

pub type ShutdownHandler = Arc<dyn Fn(ShutdownNotification) + Send + Sync>;
pub type ConfirmHandler = Arc<dyn Fn(ConfirmationNotification) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable topic exchange.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub uri: String,
    pub client_name: String,
    pub heartbeat: Duration,
}

impl From<&ConnectionConfig> for ConnectionParameters {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            client_name: config.client_name.clone(),
            heartbeat: config.heartbeat(),
        }
    }
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Session: BrokerSession;

    /// Establishes the connection. Failure is fatal for the run.
    async fn open(&self, params: &ConnectionParameters) -> Result<Self::Session>;
}

#[async_trait]
pub trait BrokerSession: Send {
    type Channel: BrokerChannel;

    async fn create_channel(&mut self) -> Result<Self::Channel>;

    /// Safe to call repeatedly.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Handlers run on client-owned tasks, never on the caller's.
    fn on_shutdown(&self, handler: ShutdownHandler);

    fn on_confirmed(&self, handler: ConfirmHandler);

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()>;

    async fn enable_confirmations(&self) -> Result<()>;

    /// Sends without waiting for the broker's ack.
    async fn publish(&self, message: &Message) -> Result<DeliveryTag>;

    async fn close(&self) -> Result<()>;
}
