use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rust_rabbit_publisher::app::Publisher;
use rust_rabbit_publisher::config::PublisherConfig;
use rust_rabbit_publisher::os_signals::cancel_on_signal;
use rust_rabbit_publisher::rabbitmq::AmqpConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PublisherConfig::load().context("Failed to load configuration")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    let publisher = Publisher::new(config);
    let signals = cancel_on_signal(publisher.cancel_handle());

    let outcome = publisher.run(&args, &AmqpConnector).await;
    signals.abort();

    match outcome {
        Ok(summary) => {
            if summary.gave_up {
                warn!("Stopped after repeated channel failures");
            }
            info!(
                publishes = summary.publishes,
                recreations = summary.recreations,
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e).context("Publisher failed to start")
        }
    }
}
