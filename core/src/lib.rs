// onionnet core: layered-encryption relay protocol
//
// A sender wraps a message in one encryption layer per relay; each relay
// peels exactly one layer and learns only the next hop. Everything here is
// transport-agnostic: the HTTP surface lives in the cli crate.

pub mod address;
pub mod circuit;
pub mod crypto;
pub mod directory;
pub mod node;
pub mod onion;
pub mod transport;

use thiserror::Error;

pub use address::{classify, decode_address, encode_address, Destination, ADDRESS_WIDTH};
pub use circuit::{select_circuit, Circuit, CircuitHop, CircuitId, DEFAULT_CIRCUIT_HOPS};
pub use crypto::{KeyPair, SymmetricKey};
pub use directory::{
    AddressBook, Directory, DirectorySnapshot, PortAddressBook, RegistryError, RelayDescriptor,
    RelayRegistry, RelayResolver,
};
pub use node::{RelayNode, RelayObservation, RelayOutcome, SendReceipt, UserNode, UserObservation};
pub use onion::{build, peel, peel_layer, Layer, OnionLayer, OnionMessage, Peeled};
pub use transport::{RecordingTransport, SentMessage, Transport};

/// Identifier of a relay or of a final recipient, depending on context.
pub type NodeId = u64;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failures raised by the cryptographic primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Wrong key, or a ciphertext that is malformed, truncated or tampered with.
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Encryption failed")]
    EncryptionFailed,
    /// A public key was paired with a private key it does not belong to.
    #[error("Public key does not match private key")]
    KeyMismatch,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}

/// Failures in onion framing, addressing and circuit assembly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message truncated: {len} bytes, need at least {required}")]
    Truncated { len: usize, required: usize },
    #[error("Malformed address field: {0:?}")]
    MalformedAddress(String),
    #[error("Address {0} is outside every address space")]
    AddressOutOfRange(u64),
    #[error("Not enough relays: {available} available, {required} required")]
    InsufficientRelays { available: usize, required: usize },
    #[error("Relay {0} appears twice in circuit")]
    DuplicateRelay(NodeId),
    #[error("Malformed onion layer: {0}")]
    MalformedLayer(String),
    #[error("Unknown relay {0}")]
    UnknownRelay(NodeId),
    #[error("Unknown recipient {0}")]
    UnknownRecipient(NodeId),
    #[error("Payload for recipient {0} is not valid UTF-8")]
    UndeliverablePayload(NodeId),
    #[error("Invalid hop count {0} (minimum {min})", min = circuit::MIN_CIRCUIT_HOPS)]
    InvalidHopCount(usize),
}

/// Failures reported by a [`Transport`] or a remote [`Directory`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Peer rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Any failure surfaced by the core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OnionNetError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T, E = OnionNetError> = std::result::Result<T, E>;
