// src/rabbitmq/errors.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("A file path is required as an argument")]
    ArgumentError,

    #[error("File {} not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("Failed to recreate channel: {0}")]
    RecreationError(String),
}

impl PublisherError {
    /// Errors that may end the process. Everything else is handled inside the loop.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            PublisherError::ArgumentError
                | PublisherError::FileNotFound(_)
                | PublisherError::ConfigError(_)
                | PublisherError::ConnectionError(_)
        )
    }
}

// Custom Result type for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;

impl From<std::num::ParseIntError> for PublisherError {
    fn from(err: std::num::ParseIntError) -> Self {
        PublisherError::ConfigError(format!("Parse error: {}", err))
    }
}

impl From<serde_json::Error> for PublisherError {
    fn from(err: serde_json::Error) -> Self {
        PublisherError::ConfigError(format!("Invalid configuration file: {}", err))
    }
}
