// src/rabbitmq/channel.rs
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Error as LapinError, ExchangeKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broker::{
    reply_code, BrokerChannel, ChannelId, ConfirmHandler, ConfirmationNotification, DeliveryTag,
    ExchangeSpec, ShutdownHandler, ShutdownNotification,
};
use super::errors::{PublisherError, Result};
use crate::message::Message;

/// Handlers registered on one channel, shared with the lapin callbacks.
#[derive(Default)]
struct Subscribers {
    shutdown: Mutex<Vec<ShutdownHandler>>,
    confirmed: Mutex<Vec<ConfirmHandler>>,
    shutdown_reported: AtomicBool,
}

impl Subscribers {
    fn notify_shutdown(&self, notification: ShutdownNotification) {
        // Each channel reports its shutdown once, whoever closes it first.
        if self.shutdown_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        let handlers = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for handler in handlers {
            handler(notification.clone());
        }
    }

    fn notify_confirmed(&self, notification: ConfirmationNotification) {
        let handlers = self.confirmed.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for handler in handlers {
            handler(notification);
        }
    }

    /// Only an ack counts as confirmed; nacks and lost confirms are logged.
    fn dispatch_confirmation(
        &self,
        id: ChannelId,
        delivery_tag: DeliveryTag,
        outcome: lapin::Result<Confirmation>,
    ) {
        match outcome {
            Ok(Confirmation::Ack(returned)) => {
                if returned.is_some() {
                    warn!(channel_id = %id, delivery_tag, "Message returned as unroutable");
                }
                self.notify_confirmed(ConfirmationNotification { delivery_tag });
            }
            Ok(Confirmation::Nack(_)) => {
                warn!(channel_id = %id, delivery_tag, "Broker rejected message");
            }
            Ok(Confirmation::NotRequested) => {
                debug!(channel_id = %id, delivery_tag, "Confirm mode not enabled");
            }
            Err(e) => {
                debug!(channel_id = %id, delivery_tag, "Confirmation lost: {}", e);
            }
        }
    }
}

/// A lapin channel scoped to one exchange.
pub struct PublisherChannel {
    id: ChannelId,
    channel: Channel,
    subscribers: Arc<Subscribers>,
    next_delivery_tag: AtomicU64,
}

impl PublisherChannel {
    pub(crate) fn new(channel: Channel) -> Self {
        let id = ChannelId::next();
        let subscribers = Arc::new(Subscribers::default());

        let on_error = Arc::clone(&subscribers);
        channel.on_error(move |err| {
            let notification = shutdown_from_error(&err);
            warn!(
                channel_id = %id,
                reply_code = notification.reply_code,
                "Channel shutdown: {}",
                notification.reply_text
            );
            on_error.notify_shutdown(notification);
        });

        debug!(channel_id = %id, amqp_channel = channel.id(), "Channel wrapped");
        Self {
            id,
            channel,
            subscribers,
            next_delivery_tag: AtomicU64::new(1),
        }
    }
}

/// Protocol errors carry the broker's reply code; anything else means the transport went away.
fn shutdown_from_error(err: &LapinError) -> ShutdownNotification {
    match err {
        LapinError::ProtocolError(amqp) => {
            ShutdownNotification::new(amqp.get_id(), amqp.get_message().as_str())
        }
        LapinError::IOError(_) => ShutdownNotification::new(reply_code::CONNECTION_FORCED, err.to_string()),
        other => ShutdownNotification::new(reply_code::INTERNAL_ERROR, other.to_string()),
    }
}

#[async_trait]
impl BrokerChannel for PublisherChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn on_shutdown(&self, handler: ShutdownHandler) {
        self.subscribers
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn on_confirmed(&self, handler: ConfirmHandler) {
        self.subscribers
            .confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublisherError::ChannelError(format!("Failed to declare exchange: {}", e)))?;

        debug!(channel_id = %self.id, "Exchange '{}' declared", exchange.name);
        Ok(())
    }

    async fn enable_confirmations(&self) -> Result<()> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PublisherError::ChannelError(format!("Failed to enable confirm mode: {}", e)))?;

        debug!(channel_id = %self.id, "Confirm mode enabled");
        Ok(())
    }

    async fn publish(&self, message: &Message) -> Result<DeliveryTag> {
        let properties = BasicProperties::default()
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_content_type("text/plain".into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        let confirm = self
            .channel
            .basic_publish(
                message.exchange(),
                message.routing_key(),
                BasicPublishOptions {
                    mandatory: message.mandatory(),
                    ..BasicPublishOptions::default()
                },
                message.body(),
                properties,
            )
            .await
            .map_err(|e| PublisherError::PublishError(e.to_string()))?;

        let delivery_tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed);
        let subscribers = Arc::clone(&self.subscribers);
        let id = self.id;
        tokio::spawn(async move {
            subscribers.dispatch_confirmation(id, delivery_tag, confirm.await);
        });

        info!(
            channel_id = %self.id,
            delivery_tag,
            "Published message to exchange '{}' with routing key '{}'",
            message.exchange(),
            message.routing_key()
        );
        Ok(delivery_tag)
    }

    async fn close(&self) -> Result<()> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(reply_code::REPLY_SUCCESS, "Closing publisher")
            .await
            .map_err(|e| PublisherError::ChannelError(e.to_string()))?;

        self.subscribers
            .notify_shutdown(ShutdownNotification::graceful("Closing publisher"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::{AMQPError, AMQPSoftError};

    #[test]
    fn io_errors_map_to_connection_forced() {
        let err = LapinError::IOError(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        let notification = shutdown_from_error(&err);
        assert_eq!(notification.reply_code, reply_code::CONNECTION_FORCED);
        assert!(!notification.is_graceful());
    }

    fn counting_subscribers() -> (Subscribers, Arc<Mutex<Vec<(usize, DeliveryTag)>>>) {
        let subscribers = Subscribers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for handler_index in 0..2 {
            let seen = Arc::clone(&seen);
            subscribers.confirmed.lock().unwrap().push(Arc::new(move |n: ConfirmationNotification| {
                seen.lock().unwrap().push((handler_index, n.delivery_tag));
            }));
        }
        (subscribers, seen)
    }

    #[test]
    fn protocol_errors_keep_reply_code() {
        let err = LapinError::ProtocolError(AMQPError::new(
            AMQPSoftError::PRECONDITIONFAILED.into(),
            "PRECONDITION_FAILED - inequivalent arg 'type' for exchange".into(),
        ));
        let notification = shutdown_from_error(&err);
        assert_eq!(notification.reply_code, 406);
        assert_eq!(
            notification.reply_text,
            "PRECONDITION_FAILED - inequivalent arg 'type' for exchange"
        );
        assert!(!notification.is_graceful());
    }

    #[test]
    fn ack_reaches_every_confirm_handler() {
        let (subscribers, seen) = counting_subscribers();
        subscribers.dispatch_confirmation(ChannelId::next(), 7, Ok(Confirmation::Ack(None)));
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7)]);
    }

    #[test]
    fn nack_and_lost_confirms_are_not_confirmations() {
        let (subscribers, seen) = counting_subscribers();
        let id = ChannelId::next();
        subscribers.dispatch_confirmation(id, 1, Ok(Confirmation::Nack(None)));
        subscribers.dispatch_confirmation(id, 2, Ok(Confirmation::NotRequested));
        let lost = LapinError::InvalidChannelState(lapin::ChannelState::Closed);
        subscribers.dispatch_confirmation(id, 3, Err(lost));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn shutdown_is_reported_once() {
        let subscribers = Subscribers::default();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        subscribers.shutdown.lock().unwrap().push(Arc::new(move |_: ShutdownNotification| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        subscribers.notify_shutdown(ShutdownNotification::new(reply_code::CONNECTION_FORCED, "forced"));
        subscribers.notify_shutdown(ShutdownNotification::graceful("Closing publisher"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
