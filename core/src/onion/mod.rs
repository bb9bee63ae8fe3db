// Onion-Layered Relay: layer framing shared by builder and relays
//
// Wire form of one layer:
//
//   key block      WRAPPED_KEY_LEN chars, layer key wrapped for this hop
//   payload block  base64(nonce) "." base64(seal(field ‖ inner))
//
// There is no length prefix; the split point is the fixed key block length.
// Inside the payload, the first ADDRESS_WIDTH bytes name the next hop and
// the rest is the next onion (or the plaintext at the last hop).

pub mod builder;
pub mod relay;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::WRAPPED_KEY_LEN;
use crate::{NodeId, ProtocolError};

pub use builder::build;
pub use relay::{peel, peel_layer};

/// A complete onion as it travels between hops
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OnionMessage(String);

impl OnionMessage {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for OnionMessage {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for OnionMessage {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Debug for OnionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionMessage({} bytes)", self.0.len())
    }
}

/// The two blocks of one onion layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionLayer {
    /// Layer key wrapped under the hop's public key
    pub key_block: String,
    /// Sealed destination field and inner blob
    pub payload_block: String,
}

impl OnionLayer {
    /// Split a message at the fixed key block length
    pub fn split(message: &OnionMessage) -> Result<Self, ProtocolError> {
        let text = message.as_str();
        if text.len() < WRAPPED_KEY_LEN {
            return Err(ProtocolError::Truncated {
                len: text.len(),
                required: WRAPPED_KEY_LEN,
            });
        }
        if !text.is_ascii() {
            return Err(ProtocolError::MalformedLayer(
                "onion contains non-ASCII bytes".to_string(),
            ));
        }
        let (key_block, payload_block) = text.split_at(WRAPPED_KEY_LEN);
        Ok(Self {
            key_block: key_block.to_string(),
            payload_block: payload_block.to_string(),
        })
    }

    /// Join both blocks back into a message
    pub fn into_message(self) -> OnionMessage {
        let mut text = self.key_block;
        text.push_str(&self.payload_block);
        OnionMessage(text)
    }
}

/// Result of peeling one layer, before any address lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    /// Hand `message` to relay `next_relay`
    Relay { next_relay: NodeId, message: OnionMessage },
    /// `plaintext` is the application message for `recipient`
    Recipient { recipient: NodeId, plaintext: Vec<u8> },
}

/// Forwarding decision produced by a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peeled {
    Forward {
        next_relay: NodeId,
        address: String,
        message: OnionMessage,
    },
    Deliver {
        recipient: NodeId,
        plaintext: Vec<u8>,
    },
}
