use async_trait::async_trait;
use lapin::{uri::AMQPUri, Connection, ConnectionProperties};
use tracing::{debug, error, info};

use super::broker::{reply_code, BrokerConnector, BrokerSession, ConnectionParameters};
use super::channel::PublisherChannel;
use super::errors::{PublisherError, Result};

/// Opens lapin connections. lapin 2 never recovers connections or topology on
/// its own, so recovery stays with the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmqpConnector;

#[async_trait]
impl BrokerConnector for AmqpConnector {
    type Session = ConnectionSession;

    async fn open(&self, params: &ConnectionParameters) -> Result<ConnectionSession> {
        ConnectionSession::open(params).await
    }
}

/// Owns the broker connection for the whole run.
pub struct ConnectionSession {
    connection: Option<Connection>,
}

impl ConnectionSession {
    pub async fn open(params: &ConnectionParameters) -> Result<Self> {
        let mut uri: AMQPUri = params
            .uri
            .parse()
            .map_err(|e: String| PublisherError::ConnectionError(format!("Invalid AMQP URI: {}", e)))?;
        uri.query.heartbeat = Some(params.heartbeat.as_secs().min(u64::from(u16::MAX)) as u16);

        info!(
            client_name = %params.client_name,
            heartbeat_secs = params.heartbeat.as_secs(),
            "Attempting to connect to RabbitMQ at {}:{}",
            uri.authority.host,
            uri.authority.port
        );

        let properties =
            ConnectionProperties::default().with_connection_name(params.client_name.clone().into());

        let connection = Connection::connect_uri(uri, properties).await.map_err(|e| {
            error!("Failed to connect to RabbitMQ: {}", e);
            PublisherError::ConnectionError(e.to_string())
        })?;

        info!("Successfully connected to RabbitMQ");
        Ok(Self {
            connection: Some(connection),
        })
    }
}

#[async_trait]
impl BrokerSession for ConnectionSession {
    type Channel = PublisherChannel;

    async fn create_channel(&mut self) -> Result<PublisherChannel> {
        let connection = self.connection.as_ref().ok_or_else(|| {
            PublisherError::ChannelError("No active connection".to_string())
        })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublisherError::ChannelError(e.to_string()))?;

        Ok(PublisherChannel::new(channel))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(conn) = self.connection.take() else {
            debug!("Connection already closed");
            return Ok(());
        };
        if !conn.status().connected() {
            debug!("Connection no longer open, nothing to close");
            return Ok(());
        }

        info!("Closing RabbitMQ connection gracefully");
        conn.close(reply_code::REPLY_SUCCESS, "Closing connection")
            .await
            .map_err(|e| PublisherError::ConnectionError(e.to_string()))
    }
}
