//! Transport: opaque point-to-point delivery
//!
//! The core only needs `send(address, body)`. The HTTP implementation lives
//! in the cli crate; [`RecordingTransport`] keeps deliveries in memory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::TransportError;

/// Fire-and-forget delivery of one message body to one address
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError>;
}

/// A message handed to a [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub address: String,
    pub body: String,
}

/// Transport that stores every send instead of delivering it
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything sent so far
    pub fn drain(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        self.sent.lock().push(SentMessage {
            address: address.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
