pub mod app;
pub mod config;
pub mod message;
pub mod os_signals;
pub mod rabbitmq;
pub mod recovery;
