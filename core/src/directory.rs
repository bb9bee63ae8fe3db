//! Relay directory: who the relays are and where they listen
//!
//! The directory only ever holds public keys. Private keys stay inside the
//! relay process that generated them.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::address::MAX_NODE_ID;
use crate::crypto::decode_public_key;
use crate::{CryptoError, NodeId, ProtocolError, TransportError};

/// Published entry for one relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    #[serde(rename = "nodeId")]
    pub relay_id: NodeId,
    /// Encoded public key (base64 SPKI DER)
    #[serde(rename = "pubKey")]
    pub public_key: String,
    /// Transport address, `host:port`
    #[serde(rename = "address")]
    pub network_address: String,
}

/// Read-only view of the relay set
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Current list of known relays
    async fn list_relays(&self) -> Result<Vec<RelayDescriptor>, TransportError>;
}

/// Resolves a relay id to its transport address
pub trait RelayResolver {
    fn relay_address(&self, relay_id: NodeId) -> Option<String>;
}

/// Resolves a final recipient id to its transport address
#[cfg_attr(test, mockall::automock)]
pub trait AddressBook: Send + Sync {
    fn recipient_address(&self, recipient_id: NodeId) -> Option<String>;
}

/// Recipients listen on `host:(base_port + id)`
#[derive(Debug, Clone)]
pub struct PortAddressBook {
    pub host: String,
    pub base_port: u16,
}

impl PortAddressBook {
    pub fn new(host: impl Into<String>, base_port: u16) -> Self {
        Self { host: host.into(), base_port }
    }
}

impl AddressBook for PortAddressBook {
    fn recipient_address(&self, recipient_id: NodeId) -> Option<String> {
        let port = u64::from(self.base_port).checked_add(recipient_id)?;
        let port = u16::try_from(port).ok()?;
        Some(format!("{}:{}", self.host, port))
    }
}

/// A point-in-time copy of the directory, taken once per message
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    relays: Vec<RelayDescriptor>,
}

impl DirectorySnapshot {
    pub fn new(relays: Vec<RelayDescriptor>) -> Self {
        Self { relays }
    }

    /// Fetch a fresh snapshot from a directory
    pub async fn fetch(directory: &dyn Directory) -> Result<Self, TransportError> {
        Ok(Self::new(directory.list_relays().await?))
    }

    pub fn relays(&self) -> &[RelayDescriptor] {
        &self.relays
    }

    pub fn get(&self, relay_id: NodeId) -> Option<&RelayDescriptor> {
        self.relays.iter().find(|r| r.relay_id == relay_id)
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

impl RelayResolver for DirectorySnapshot {
    fn relay_address(&self, relay_id: NodeId) -> Option<String> {
        self.get(relay_id).map(|r| r.network_address.clone())
    }
}

/// Registration failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Node {0} already registered")]
    AlreadyRegistered(NodeId),
    #[error(transparent)]
    InvalidKey(#[from] CryptoError),
    #[error(transparent)]
    InvalidId(#[from] ProtocolError),
}

/// In-memory directory service backing the registry process
#[derive(Debug, Clone, Default)]
pub struct RelayRegistry {
    relays: Arc<RwLock<BTreeMap<NodeId, RelayDescriptor>>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relay. Ids are first-come and must fit the relay address space;
    /// the public key must decode.
    pub fn register(&self, descriptor: RelayDescriptor) -> Result<(), RegistryError> {
        if descriptor.relay_id > MAX_NODE_ID {
            debug!(relay_id = descriptor.relay_id, "Rejected out-of-range relay id");
            return Err(ProtocolError::AddressOutOfRange(descriptor.relay_id).into());
        }
        let key = decode_public_key(&descriptor.public_key)?;

        let mut relays = self.relays.write();
        if relays.contains_key(&descriptor.relay_id) {
            debug!(relay_id = descriptor.relay_id, "Rejected duplicate registration");
            return Err(RegistryError::AlreadyRegistered(descriptor.relay_id));
        }

        info!(
            relay_id = descriptor.relay_id,
            address = %descriptor.network_address,
            fingerprint = %key.fingerprint(),
            "Relay registered"
        );
        relays.insert(descriptor.relay_id, descriptor);
        Ok(())
    }

    /// All registered relays, ordered by id
    pub fn list(&self) -> Vec<RelayDescriptor> {
        self.relays.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.relays.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.read().is_empty()
    }
}

#[async_trait]
impl Directory for RelayRegistry {
    async fn list_relays(&self) -> Result<Vec<RelayDescriptor>, TransportError> {
        Ok(self.list())
    }
}
