// Address codec: fixed-width next-hop fields
//
// Every onion layer starts with a 10-digit decimal field naming where the
// inner blob goes next. The field space is split in two halves so a relay can
// tell a relay hop from a final recipient without extra metadata:
//
//   [0, 5_000_000_000)               relay id
//   [5_000_000_000, 10_000_000_000)  RECIPIENT_BASE + recipient id

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NodeId, ProtocolError};

/// Width of the address field, in ASCII digits
pub const ADDRESS_WIDTH: usize = 10;

/// One past the largest value representable in the field
pub const ADDRESS_LIMIT: u64 = 10_000_000_000;

/// First field value belonging to the final-recipient space
pub const RECIPIENT_BASE: u64 = ADDRESS_LIMIT / 2;

/// Largest id usable in either space
pub const MAX_NODE_ID: NodeId = RECIPIENT_BASE - 1;

/// Where the inner blob of a layer is headed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Another relay; the inner blob is an onion for it
    Relay(NodeId),
    /// The message consumer; the inner blob is the plaintext
    FinalRecipient(NodeId),
}

impl Destination {
    /// Raw field value for this destination
    pub fn value(&self) -> Result<u64, ProtocolError> {
        match *self {
            Destination::Relay(id) if id <= MAX_NODE_ID => Ok(id),
            Destination::FinalRecipient(id) if id <= MAX_NODE_ID => Ok(RECIPIENT_BASE + id),
            Destination::Relay(id) | Destination::FinalRecipient(id) => {
                Err(ProtocolError::AddressOutOfRange(id))
            }
        }
    }

    /// Encoded fixed-width field for this destination
    pub fn field(&self) -> Result<String, ProtocolError> {
        encode_address(self.value()?)
    }

    pub fn id(&self) -> NodeId {
        match *self {
            Destination::Relay(id) | Destination::FinalRecipient(id) => id,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Relay(id) => write!(f, "relay:{}", id),
            Destination::FinalRecipient(id) => write!(f, "recipient:{}", id),
        }
    }
}

/// Zero-pad `value` to [`ADDRESS_WIDTH`] digits
pub fn encode_address(value: u64) -> Result<String, ProtocolError> {
    if value >= ADDRESS_LIMIT {
        return Err(ProtocolError::AddressOutOfRange(value));
    }
    Ok(format!("{:0width$}", value, width = ADDRESS_WIDTH))
}

/// Parse a field produced by [`encode_address`]
pub fn decode_address(field: &str) -> Result<u64, ProtocolError> {
    if field.len() != ADDRESS_WIDTH || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedAddress(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| ProtocolError::MalformedAddress(field.to_string()))
}

/// Map a field value onto its address space
pub fn classify(value: u64) -> Result<Destination, ProtocolError> {
    match value {
        v if v < RECIPIENT_BASE => Ok(Destination::Relay(v)),
        v if v < ADDRESS_LIMIT => Ok(Destination::FinalRecipient(v - RECIPIENT_BASE)),
        v => Err(ProtocolError::AddressOutOfRange(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_pads() {
        assert_eq!(encode_address(42).unwrap(), "0000000042");
        assert_eq!(encode_address(0).unwrap(), "0000000000");
        assert_eq!(encode_address(ADDRESS_LIMIT - 1).unwrap(), "9999999999");
    }

    #[test]
    fn test_encode_out_of_range() {
        assert_eq!(
            encode_address(ADDRESS_LIMIT).unwrap_err(),
            ProtocolError::AddressOutOfRange(ADDRESS_LIMIT)
        );
    }

    #[test]
    fn test_decode_strips_zeros() {
        assert_eq!(decode_address("0000000042").unwrap(), 42);
        assert_eq!(decode_address("5000000007").unwrap(), 5_000_000_007);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        assert!(matches!(decode_address("42"), Err(ProtocolError::MalformedAddress(_))));
        assert!(matches!(decode_address("00000000042"), Err(ProtocolError::MalformedAddress(_))));
        assert!(matches!(decode_address(""), Err(ProtocolError::MalformedAddress(_))));
    }

    #[test]
    fn test_decode_rejects_non_digits() {
        assert!(matches!(decode_address("+000000042"), Err(ProtocolError::MalformedAddress(_))));
        assert!(matches!(decode_address("00000000a2"), Err(ProtocolError::MalformedAddress(_))));
        assert!(matches!(decode_address(" 000000042"), Err(ProtocolError::MalformedAddress(_))));
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0).unwrap(), Destination::Relay(0));
        assert_eq!(classify(RECIPIENT_BASE - 1).unwrap(), Destination::Relay(MAX_NODE_ID));
        assert_eq!(classify(RECIPIENT_BASE).unwrap(), Destination::FinalRecipient(0));
        assert_eq!(
            classify(ADDRESS_LIMIT - 1).unwrap(),
            Destination::FinalRecipient(MAX_NODE_ID)
        );
        assert_eq!(
            classify(ADDRESS_LIMIT).unwrap_err(),
            ProtocolError::AddressOutOfRange(ADDRESS_LIMIT)
        );
    }

    #[test]
    fn test_destination_field() {
        assert_eq!(Destination::Relay(2).field().unwrap(), "0000000002");
        assert_eq!(Destination::FinalRecipient(42).field().unwrap(), "5000000042");
        assert!(Destination::FinalRecipient(RECIPIENT_BASE).field().is_err());
    }

    proptest! {
        #[test]
        fn prop_partition_exhaustive(value in 0u64..ADDRESS_LIMIT) {
            let destination = classify(value).unwrap();
            let is_relay = matches!(destination, Destination::Relay(_));
            prop_assert_eq!(is_relay, value < RECIPIENT_BASE);
            prop_assert_eq!(destination.value().unwrap(), value);
        }

        #[test]
        fn prop_field_roundtrip(id in 0u64..=MAX_NODE_ID, relay in any::<bool>()) {
            let destination = if relay {
                Destination::Relay(id)
            } else {
                Destination::FinalRecipient(id)
            };
            let field = destination.field().unwrap();
            prop_assert_eq!(field.len(), ADDRESS_WIDTH);
            prop_assert_eq!(classify(decode_address(&field).unwrap()).unwrap(), destination);
        }

        #[test]
        fn prop_out_of_range_rejected(value in ADDRESS_LIMIT..u64::MAX) {
            prop_assert!(classify(value).is_err());
            prop_assert!(encode_address(value).is_err());
        }
    }
}
