// Circuit Building: Selecting and organizing relay paths
//
// A circuit is an ordered list of distinct relays used for exactly one
// message. Selection samples without replacement from a directory snapshot
// in a single pass, so it either succeeds or fails with InsufficientRelays.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::address::MAX_NODE_ID;
use crate::crypto::{decode_public_key, PublicKey};
use crate::directory::RelayDescriptor;
use crate::{NodeId, OnionNetError, ProtocolError};

/// Hops per circuit unless configured otherwise
pub const DEFAULT_CIRCUIT_HOPS: usize = 3;

/// Shortest circuit that still hides the sender from the recipient's relay
pub const MIN_CIRCUIT_HOPS: usize = 2;

/// Unique identifier for a circuit, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId(u64);

impl CircuitId {
    /// Generate a new random circuit ID
    pub fn random() -> Self {
        use rand::RngCore;
        CircuitId(rand::thread_rng().next_u64())
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One relay of a circuit with its key already decoded
#[derive(Debug, Clone)]
pub struct CircuitHop {
    pub relay_id: NodeId,
    pub public_key: PublicKey,
    pub network_address: String,
}

impl TryFrom<&RelayDescriptor> for CircuitHop {
    type Error = OnionNetError;

    fn try_from(descriptor: &RelayDescriptor) -> Result<Self, Self::Error> {
        Ok(Self {
            relay_id: descriptor.relay_id,
            public_key: decode_public_key(&descriptor.public_key)?,
            network_address: descriptor.network_address.clone(),
        })
    }
}

/// Ordered, immutable relay path
#[derive(Debug, Clone)]
pub struct Circuit {
    id: CircuitId,
    hops: Vec<CircuitHop>,
}

impl Circuit {
    /// Assemble a circuit from relays in path order.
    ///
    /// Rejects paths shorter than [`MIN_CIRCUIT_HOPS`], repeated relays, ids
    /// outside the relay address space, and keys that do not decode.
    pub fn new(relays: &[RelayDescriptor]) -> Result<Self, OnionNetError> {
        if relays.len() < MIN_CIRCUIT_HOPS {
            return Err(ProtocolError::InsufficientRelays {
                available: relays.len(),
                required: MIN_CIRCUIT_HOPS,
            }
            .into());
        }

        let mut seen = HashSet::new();
        for relay in relays {
            if relay.relay_id > MAX_NODE_ID {
                return Err(ProtocolError::AddressOutOfRange(relay.relay_id).into());
            }
            if !seen.insert(relay.relay_id) {
                return Err(ProtocolError::DuplicateRelay(relay.relay_id).into());
            }
        }

        let hops = relays
            .iter()
            .map(CircuitHop::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: CircuitId::random(),
            hops,
        })
    }

    pub fn id(&self) -> CircuitId {
        self.id
    }

    pub fn hops(&self) -> &[CircuitHop] {
        &self.hops
    }

    /// The relay the built onion is sent to
    pub fn entry(&self) -> &CircuitHop {
        // Non-empty by construction.
        &self.hops[0]
    }

    pub fn relay_ids(&self) -> Vec<NodeId> {
        self.hops.iter().map(|h| h.relay_id).collect()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

/// Pick `hops` distinct relays at random from a directory snapshot.
///
/// Entries repeating an earlier relay id, or with an id no layer can address,
/// are ignored. Fails with
/// [`ProtocolError::InsufficientRelays`] when fewer than `hops` distinct
/// relays are listed.
pub fn select_circuit(relays: &[RelayDescriptor], hops: usize) -> Result<Circuit, OnionNetError> {
    if hops < MIN_CIRCUIT_HOPS {
        return Err(ProtocolError::InvalidHopCount(hops).into());
    }

    let mut seen = HashSet::new();
    let mut distinct: Vec<&RelayDescriptor> = relays
        .iter()
        .filter(|r| r.relay_id <= MAX_NODE_ID && seen.insert(r.relay_id))
        .collect();

    if distinct.len() < hops {
        return Err(ProtocolError::InsufficientRelays {
            available: distinct.len(),
            required: hops,
        }
        .into());
    }

    distinct.shuffle(&mut rand::thread_rng());
    let chosen: Vec<RelayDescriptor> = distinct.into_iter().take(hops).cloned().collect();

    Circuit::new(&chosen)
}
