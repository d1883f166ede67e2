use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::TopologyConfig;
use crate::rabbitmq::errors::{PublisherError, Result};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One message for the whole run: the body never changes between publishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    exchange: String,
    routing_key: String,
    mandatory: bool,
    body: Arc<[u8]>,
}

impl Message {
    pub fn new(topology: &TopologyConfig, body: impl Into<Arc<[u8]>>) -> Self {
        Message {
            exchange: topology.exchange.clone(),
            routing_key: topology.routing_key.clone(),
            mandatory: true,
            body: body.into(),
        }
    }

    /// Reads the file as UTF-8 text and encodes it back to bytes.
    pub fn from_file(path: &Path, topology: &TopologyConfig) -> Result<Self> {
        let raw = fs::read(path).map_err(|e| {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            PublisherError::FileNotFound(path.to_path_buf())
        })?;
        let text = decode_text(&raw);
        Ok(Self::new(topology, text.as_bytes()))
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn decode_text(raw: &[u8]) -> String {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_owned(),
        Err(e) => {
            warn!(
                valid_up_to = e.valid_up_to(),
                "Input is not valid UTF-8, replacing invalid sequences"
            );
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}
