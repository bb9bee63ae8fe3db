//! Relay and user nodes: the request-handling layer around the protocol
//!
//! Nodes own the collaborators (directory, transport, address book) and
//! turn protocol results into sends. Each incoming message is handled on its
//! own; the only state a relay shares across messages is its read-only key
//! pair. The `last_*` observations exist for the debug endpoints and are
//! never consulted when routing.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::circuit::{select_circuit, CircuitId, DEFAULT_CIRCUIT_HOPS};
use crate::crypto::{encode_public_key, KeyPair};
use crate::directory::{AddressBook, Directory, DirectorySnapshot, RelayDescriptor, RelayResolver};
use crate::onion::{build, peel_layer, Layer, OnionMessage};
use crate::transport::Transport;
use crate::{CryptoError, NodeId, OnionNetError, ProtocolError};

/// What a relay did with one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Inner onion sent on to another relay
    Forwarded { next_relay: NodeId, address: String },
    /// Plaintext handed to its final recipient
    Delivered { recipient: NodeId, address: String },
}

/// Last message seen by a relay, for debugging only
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayObservation {
    pub last_received_encrypted: Option<String>,
    pub last_decrypted: Option<String>,
    pub last_destination: Option<String>,
}

/// A relay: owns its key pair and peels one layer per message
pub struct RelayNode {
    relay_id: NodeId,
    network_address: String,
    keys: Arc<KeyPair>,
    directory: Arc<dyn Directory>,
    address_book: Arc<dyn AddressBook>,
    transport: Arc<dyn Transport>,
    observed: RwLock<RelayObservation>,
}

impl RelayNode {
    pub fn new(
        relay_id: NodeId,
        network_address: impl Into<String>,
        keys: Arc<KeyPair>,
        directory: Arc<dyn Directory>,
        address_book: Arc<dyn AddressBook>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            relay_id,
            network_address: network_address.into(),
            keys,
            directory,
            address_book,
            transport,
            observed: RwLock::new(RelayObservation::default()),
        }
    }

    pub fn relay_id(&self) -> NodeId {
        self.relay_id
    }

    /// Public entry for the directory. Carries no private material.
    pub fn descriptor(&self) -> Result<RelayDescriptor, CryptoError> {
        Ok(RelayDescriptor {
            relay_id: self.relay_id,
            public_key: encode_public_key(self.keys.public_key())?,
            network_address: self.network_address.clone(),
        })
    }

    pub fn observation(&self) -> RelayObservation {
        self.observed.read().clone()
    }

    /// Peel one layer and pass the result along.
    pub async fn handle(&self, message: OnionMessage) -> Result<RelayOutcome, OnionNetError> {
        debug!(relay_id = self.relay_id, size = message.len(), "Onion received");
        self.observed.write().last_received_encrypted = Some(message.as_str().to_string());

        let layer = peel_layer(&message, self.keys.private_key()).map_err(|e| {
            warn!(relay_id = self.relay_id, error = %e, "Failed to peel layer");
            e
        })?;

        match layer {
            Layer::Relay { next_relay, message } => {
                let snapshot = DirectorySnapshot::fetch(self.directory.as_ref()).await?;
                let address = snapshot
                    .relay_address(next_relay)
                    .ok_or(ProtocolError::UnknownRelay(next_relay))?;

                self.record(message.as_str(), &address);
                self.transport.send(&address, message.as_str()).await?;

                info!(relay_id = self.relay_id, next_relay, %address, "Forwarded onion");
                Ok(RelayOutcome::Forwarded { next_relay, address })
            }
            Layer::Recipient { recipient, plaintext } => {
                let address = self
                    .address_book
                    .recipient_address(recipient)
                    .ok_or(ProtocolError::UnknownRecipient(recipient))?;
                let text = String::from_utf8(plaintext)
                    .map_err(|_| ProtocolError::UndeliverablePayload(recipient))?;

                self.record(&text, &address);
                self.transport.send(&address, &text).await?;

                info!(relay_id = self.relay_id, recipient, %address, "Delivered message");
                Ok(RelayOutcome::Delivered { recipient, address })
            }
        }
    }

    fn record(&self, decrypted: &str, destination: &str) {
        let mut observed = self.observed.write();
        observed.last_decrypted = Some(decrypted.to_string());
        observed.last_destination = Some(destination.to_string());
    }
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub circuit_id: CircuitId,
    pub relay_ids: Vec<NodeId>,
    pub entry_address: String,
}

/// Last messages seen by a user, for debugging only
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserObservation {
    pub last_received: Option<String>,
    pub last_sent: Option<String>,
    pub last_circuit: Option<Vec<NodeId>>,
}

/// A message endpoint: sends through fresh circuits and receives plaintext
pub struct UserNode {
    user_id: NodeId,
    hops: usize,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    observed: RwLock<UserObservation>,
}

impl UserNode {
    pub fn new(
        user_id: NodeId,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            user_id,
            hops: DEFAULT_CIRCUIT_HOPS,
            directory,
            transport,
            observed: RwLock::new(UserObservation::default()),
        }
    }

    /// Use circuits of `hops` relays instead of the default
    pub fn with_hops(mut self, hops: usize) -> Self {
        self.hops = hops;
        self
    }

    pub fn user_id(&self) -> NodeId {
        self.user_id
    }

    pub fn observation(&self) -> UserObservation {
        self.observed.read().clone()
    }

    /// Route `message` to user `destination_user_id` through a new circuit
    pub async fn send_message(
        &self,
        message: &str,
        destination_user_id: NodeId,
    ) -> Result<SendReceipt, OnionNetError> {
        let snapshot = DirectorySnapshot::fetch(self.directory.as_ref()).await?;
        let circuit = select_circuit(snapshot.relays(), self.hops)?;
        let onion = build(&circuit, destination_user_id, message.as_bytes())?;

        let entry_address = circuit.entry().network_address.clone();
        self.transport.send(&entry_address, onion.as_str()).await?;

        let relay_ids = circuit.relay_ids();
        info!(
            user_id = self.user_id,
            circuit = %circuit.id(),
            destination = destination_user_id,
            hops = relay_ids.len(),
            "Sent onion"
        );

        let mut observed = self.observed.write();
        observed.last_sent = Some(message.to_string());
        observed.last_circuit = Some(relay_ids.clone());

        Ok(SendReceipt {
            circuit_id: circuit.id(),
            relay_ids,
            entry_address,
        })
    }

    /// Record a plaintext delivered by the last relay of a circuit
    pub fn receive(&self, message: String) {
        info!(user_id = self.user_id, size = message.len(), "Message received");
        self.observed.write().last_received = Some(message);
    }
}
