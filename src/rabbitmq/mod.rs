// src/rabbitmq/mod.rs
// RabbitMQ implementation of the broker seams used by the recovery loop

pub mod broker;
pub mod channel;
pub mod connection;
pub mod errors;

// Re-export specific items to simplify imports elsewhere
pub use broker::{BrokerChannel, BrokerConnector, BrokerSession, ChannelId, ConnectionParameters, ExchangeSpec};
pub use channel::PublisherChannel;
pub use connection::{AmqpConnector, ConnectionSession};
pub use errors::{PublisherError, Result};
