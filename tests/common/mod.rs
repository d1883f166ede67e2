// In-memory broker used by the scenario tests. It records every call and lets
// the test fire shutdowns and confirmations the way the client threads would.
#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use rust_rabbit_publisher::config::PublisherConfig;
use rust_rabbit_publisher::message::Message;
use rust_rabbit_publisher::rabbitmq::broker::{
    BrokerChannel, BrokerConnector, BrokerSession, ChannelId, ConfirmHandler, ConfirmationNotification,
    ConnectionParameters, DeliveryTag, ExchangeSpec, ShutdownHandler, ShutdownNotification,
};
use rust_rabbit_publisher::rabbitmq::errors::{PublisherError, Result};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct ChannelRecord {
    pub id: Option<ChannelId>,
    pub declared: Vec<ExchangeSpec>,
    pub confirms_enabled: bool,
    /// Publishes seen, with whether confirm mode and the exchange were ready at the time.
    pub published: Vec<(Vec<u8>, bool)>,
    pub dead: bool,
    pub closed: bool,
    shutdown_reported: bool,
    shutdown_handlers: Vec<ShutdownHandler>,
    confirm_handlers: Vec<ConfirmHandler>,
}

#[derive(Default)]
pub struct BrokerLog {
    pub opens: usize,
    pub session_closes: usize,
    pub channels: Vec<ChannelRecord>,
    pub refuse_connection: bool,
    pub create_failures_left: usize,
}

#[derive(Clone)]
pub struct FakeBroker {
    log: Arc<Mutex<BrokerLog>>,
    publishes_tx: Arc<watch::Sender<usize>>,
    publishes_rx: watch::Receiver<usize>,
}

impl FakeBroker {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0);
        Self {
            log: Arc::new(Mutex::new(BrokerLog::default())),
            publishes_tx: Arc::new(tx),
            publishes_rx: rx,
        }
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, BrokerLog> {
        self.log.lock().unwrap()
    }

    pub fn total_publishes(&self) -> usize {
        self.log().channels.iter().map(|c| c.published.len()).sum()
    }

    pub async fn wait_for_publishes(&self, count: usize) {
        let mut rx = self.publishes_rx.clone();
        tokio::time::timeout(WAIT_LIMIT, rx.wait_for(|seen| *seen >= count))
            .await
            .expect("timed out waiting for publishes")
            .expect("broker dropped");
    }

    /// Kills channel `index` as the broker would, firing its shutdown handlers.
    pub fn shutdown_channel(&self, index: usize, notification: ShutdownNotification) {
        let handlers = {
            let mut log = self.log();
            let record = &mut log.channels[index];
            record.dead = true;
            if record.shutdown_reported {
                return;
            }
            record.shutdown_reported = true;
            record.shutdown_handlers.clone()
        };
        for handler in handlers {
            handler(notification.clone());
        }
    }

    /// Kills channel `index` without telling anyone; the next call on it fails.
    pub fn fail_channel_silently(&self, index: usize) {
        self.log().channels[index].dead = true;
    }

    pub fn confirm(&self, index: usize, delivery_tag: DeliveryTag) {
        let handlers = self.log().channels[index].confirm_handlers.clone();
        for handler in handlers {
            handler(ConfirmationNotification { delivery_tag });
        }
    }
}

#[async_trait]
impl BrokerConnector for FakeBroker {
    type Session = FakeSession;

    async fn open(&self, _params: &ConnectionParameters) -> Result<FakeSession> {
        let mut log = self.log();
        log.opens += 1;
        if log.refuse_connection {
            return Err(PublisherError::ConnectionError("connection refused".to_string()));
        }
        Ok(FakeSession {
            broker: self.clone(),
            closed: false,
        })
    }
}

pub struct FakeSession {
    broker: FakeBroker,
    closed: bool,
}

#[async_trait]
impl BrokerSession for FakeSession {
    type Channel = FakeChannel;

    async fn create_channel(&mut self) -> Result<FakeChannel> {
        let mut log = self.broker.log();
        if log.create_failures_left > 0 {
            log.create_failures_left -= 1;
            return Err(PublisherError::ChannelError("channel_max reached".to_string()));
        }
        let id = ChannelId::next();
        log.channels.push(ChannelRecord {
            id: Some(id),
            ..ChannelRecord::default()
        });
        Ok(FakeChannel {
            id,
            index: log.channels.len() - 1,
            broker: self.broker.clone(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.broker.log().session_closes += 1;
        }
        Ok(())
    }
}

pub struct FakeChannel {
    id: ChannelId,
    index: usize,
    broker: FakeBroker,
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn on_shutdown(&self, handler: ShutdownHandler) {
        self.broker.log().channels[self.index].shutdown_handlers.push(handler);
    }

    fn on_confirmed(&self, handler: ConfirmHandler) {
        self.broker.log().channels[self.index].confirm_handlers.push(handler);
    }

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()> {
        let mut log = self.broker.log();
        let record = &mut log.channels[self.index];
        if record.dead {
            return Err(PublisherError::ChannelError("channel closed".to_string()));
        }
        record.declared.push(exchange.clone());
        Ok(())
    }

    async fn enable_confirmations(&self) -> Result<()> {
        let mut log = self.broker.log();
        let record = &mut log.channels[self.index];
        if record.dead {
            return Err(PublisherError::ChannelError("channel closed".to_string()));
        }
        record.confirms_enabled = true;
        Ok(())
    }

    async fn publish(&self, message: &Message) -> Result<DeliveryTag> {
        let total = {
            let mut log = self.broker.log();
            let record = &mut log.channels[self.index];
            if record.dead || record.closed {
                return Err(PublisherError::PublishError("channel closed".to_string()));
            }
            let ready = record.confirms_enabled && !record.declared.is_empty();
            record.published.push((message.body().to_vec(), ready));
            log.channels.iter().map(|c| c.published.len()).sum::<usize>()
        };
        self.broker.publishes_tx.send_replace(total);
        let tag = self.broker.log().channels[self.index].published.len() as DeliveryTag;
        Ok(tag)
    }

    async fn close(&self) -> Result<()> {
        let handlers = {
            let mut log = self.broker.log();
            let record = &mut log.channels[self.index];
            if record.closed || record.dead {
                return Ok(());
            }
            record.closed = true;
            record.shutdown_reported = true;
            record.shutdown_handlers.clone()
        };
        for handler in handlers {
            handler(ShutdownNotification::graceful("Closing publisher"));
        }
        Ok(())
    }
}

pub fn test_config() -> PublisherConfig {
    let mut config = PublisherConfig::default();
    config.recovery.backoff_initial_ms = 1;
    config.recovery.backoff_max_ms = 5;
    config
}

pub fn input_file(content: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("publisher-{}.txt", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content).unwrap();
    path
}
