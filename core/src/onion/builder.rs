// Onion construction: run by senders
//
// Layers are wrapped innermost-first: the last relay's layer carries the
// final recipient and the plaintext, each earlier layer carries the next
// relay's id and the onion built so far.

use tracing::debug;
use zeroize::Zeroizing;

use crate::address::Destination;
use crate::circuit::Circuit;
use crate::crypto::{asymmetric_encrypt, symmetric_encrypt, SymmetricKey};
use crate::onion::{OnionLayer, OnionMessage};
use crate::{NodeId, OnionNetError, ProtocolError};

/// Build the onion to send to `circuit.entry()`.
///
/// Only `circuit.hops()[i]` can unwrap layer `i`; `plaintext` is exposed
/// only after every layer has been peeled in order.
pub fn build(
    circuit: &Circuit,
    destination_id: NodeId,
    plaintext: &[u8],
) -> Result<OnionMessage, OnionNetError> {
    let final_destination = Destination::FinalRecipient(destination_id);
    final_destination.value()?;

    let hops = circuit.hops();

    // Layer keys do not depend on each other, so draw them all up front.
    let keys: Vec<SymmetricKey> = hops.iter().map(|_| SymmetricKey::generate()).collect();

    let mut current: Option<OnionMessage> = None;

    for (i, hop) in hops.iter().enumerate().rev() {
        let destination = match hops.get(i + 1) {
            Some(next) => Destination::Relay(next.relay_id),
            None => final_destination,
        };

        let inner = current.as_ref().map_or(plaintext, |m| m.as_str().as_bytes());
        let field = destination.field()?;

        let mut payload = Zeroizing::new(Vec::with_capacity(field.len() + inner.len()));
        payload.extend_from_slice(field.as_bytes());
        payload.extend_from_slice(inner);

        let payload_block = symmetric_encrypt(&keys[i], &payload)?;
        let key_block = asymmetric_encrypt(keys[i].encode().as_bytes(), &hop.public_key)?;

        let layer = OnionLayer {
            key_block,
            payload_block,
        }
        .into_message();
        debug!(
            circuit = %circuit.id(),
            hop = i,
            relay_id = hop.relay_id,
            %destination,
            size = layer.len(),
            "Wrapped onion layer"
        );
        current = Some(layer);
    }

    current.ok_or_else(|| {
        ProtocolError::InsufficientRelays {
            available: 0,
            required: crate::circuit::MIN_CIRCUIT_HOPS,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::RECIPIENT_BASE;
    use crate::crypto::WRAPPED_KEY_LEN;
    use crate::onion::fixtures::descriptor;

    fn circuit() -> Circuit {
        Circuit::new(&[descriptor(1, 0), descriptor(2, 1), descriptor(3, 2)]).unwrap()
    }

    #[test]
    fn test_build_is_ascii_and_framed() {
        let onion = build(&circuit(), 42, b"hello").unwrap();
        assert!(onion.as_str().is_ascii());

        let layer = OnionLayer::split(&onion).unwrap();
        assert_eq!(layer.key_block.len(), WRAPPED_KEY_LEN);
        assert_eq!(layer.payload_block.matches('.').count(), 1);
    }

    #[test]
    fn test_build_grows_per_hop() {
        let two = Circuit::new(&[descriptor(1, 0), descriptor(2, 1)]).unwrap();
        let short = build(&two, 42, b"hello").unwrap();
        let long = build(&circuit(), 42, b"hello").unwrap();
        assert!(long.len() > short.len() + WRAPPED_KEY_LEN);
    }

    #[test]
    fn test_build_is_randomized() {
        let circuit = circuit();
        let a = build(&circuit, 42, b"hello").unwrap();
        let b = build(&circuit, 42, b"hello").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_build_plaintext_not_visible() {
        let onion = build(&circuit(), 42, b"a very recognisable plaintext").unwrap();
        assert!(!onion.as_str().contains("recognisable"));
    }

    #[test]
    fn test_build_rejects_out_of_range_destination() {
        let err = build(&circuit(), RECIPIENT_BASE, b"hello").unwrap_err();
        assert_eq!(
            err,
            OnionNetError::Protocol(ProtocolError::AddressOutOfRange(RECIPIENT_BASE))
        );
    }
}
