// Layer peeling: run by relays
//
// Peeling depends only on the message, the relay's private key and a
// directory snapshot. Nothing is remembered between calls, so interleaved
// circuits cannot influence each other's routing.

use zeroize::Zeroizing;

use crate::address::{classify, decode_address, Destination, ADDRESS_WIDTH};
use crate::crypto::{asymmetric_decrypt, symmetric_decrypt, PrivateKey, SymmetricKey};
use crate::directory::RelayResolver;
use crate::onion::{Layer, OnionLayer, OnionMessage, Peeled};
use crate::{CryptoError, OnionNetError, ProtocolError};

/// Remove exactly one layer.
///
/// A message that was not wrapped for `private_key`, or was corrupted in
/// transit, fails with [`CryptoError::DecryptionFailed`]. It is never
/// reinterpreted as plaintext.
pub fn peel_layer(
    message: &OnionMessage,
    private_key: &PrivateKey,
) -> Result<Layer, OnionNetError> {
    let layer = OnionLayer::split(message)?;

    let key_text = asymmetric_decrypt(&layer.key_block, private_key)?;
    let key_text = std::str::from_utf8(&key_text).map_err(|_| CryptoError::DecryptionFailed)?;
    let key = SymmetricKey::decode(key_text).map_err(|_| CryptoError::DecryptionFailed)?;

    let payload = Zeroizing::new(symmetric_decrypt(&key, &layer.payload_block)?);
    if payload.len() < ADDRESS_WIDTH {
        return Err(ProtocolError::Truncated {
            len: payload.len(),
            required: ADDRESS_WIDTH,
        }
        .into());
    }

    let (field, inner) = payload.split_at(ADDRESS_WIDTH);
    let field = std::str::from_utf8(field)
        .map_err(|_| ProtocolError::MalformedAddress(String::from_utf8_lossy(field).into_owned()))?;

    match classify(decode_address(field)?)? {
        Destination::Relay(next_relay) => {
            if !inner.is_ascii() {
                let reason = "inner onion is not ASCII".to_string();
                return Err(ProtocolError::MalformedLayer(reason).into());
            }
            Ok(Layer::Relay {
                next_relay,
                message: OnionMessage::from(String::from_utf8_lossy(inner).into_owned()),
            })
        }
        Destination::FinalRecipient(recipient) => Ok(Layer::Recipient {
            recipient,
            plaintext: inner.to_vec(),
        }),
    }
}

/// Remove one layer and resolve the next relay's address.
pub fn peel<R>(
    message: &OnionMessage,
    private_key: &PrivateKey,
    resolver: &R,
) -> Result<Peeled, OnionNetError>
where
    R: RelayResolver + ?Sized,
{
    match peel_layer(message, private_key)? {
        Layer::Relay { next_relay, message } => {
            let address = resolver
                .relay_address(next_relay)
                .ok_or(ProtocolError::UnknownRelay(next_relay))?;
            Ok(Peeled::Forward {
                next_relay,
                address,
                message,
            })
        }
        Layer::Recipient { recipient, plaintext } => Ok(Peeled::Deliver { recipient, plaintext }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::crypto::{asymmetric_encrypt, symmetric_encrypt, WRAPPED_KEY_LEN};
    use crate::directory::DirectorySnapshot;
    use crate::onion::build;
    use crate::onion::fixtures::{descriptor, relay_keys};

    fn snapshot() -> DirectorySnapshot {
        DirectorySnapshot::new(vec![descriptor(1, 0), descriptor(2, 1), descriptor(3, 2)])
    }

    fn circuit() -> Circuit {
        Circuit::new(snapshot().relays()).unwrap()
    }

    /// Hand-roll a single layer for `key_index` with an arbitrary payload
    fn single_layer(key_index: usize, payload: &[u8]) -> OnionMessage {
        let key = SymmetricKey::generate();
        let payload_block = symmetric_encrypt(&key, payload).unwrap();
        let key_block =
            asymmetric_encrypt(key.encode().as_bytes(), relay_keys()[key_index].public_key())
                .unwrap();
        OnionLayer {
            key_block,
            payload_block,
        }
        .into_message()
    }

    #[test]
    fn test_three_hop_scenario() {
        let snapshot = snapshot();
        let keys = relay_keys();
        let onion = build(&circuit(), 42, b"hello").unwrap();

        let blob_1 = match peel(&onion, keys[0].private_key(), &snapshot).unwrap() {
            Peeled::Forward { next_relay, address, message } => {
                assert_eq!(next_relay, 2);
                assert_eq!(address, "127.0.0.1:4002");
                message
            }
            other => panic!("expected forward, got {:?}", other),
        };

        let blob_2 = match peel(&blob_1, keys[1].private_key(), &snapshot).unwrap() {
            Peeled::Forward { next_relay, address, message } => {
                assert_eq!(next_relay, 3);
                assert_eq!(address, "127.0.0.1:4003");
                message
            }
            other => panic!("expected forward, got {:?}", other),
        };

        assert_eq!(
            peel(&blob_2, keys[2].private_key(), &snapshot).unwrap(),
            Peeled::Deliver {
                recipient: 42,
                plaintext: b"hello".to_vec()
            }
        );

        // blob_1 was wrapped for relay 2, not relay 3
        assert_eq!(
            peel(&blob_1, keys[2].private_key(), &snapshot).unwrap_err(),
            OnionNetError::Crypto(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_wrong_key_at_every_hop() {
        let keys = relay_keys();
        let onion = build(&circuit(), 42, b"hello").unwrap();
        for wrong in [1, 2] {
            assert_eq!(
                peel_layer(&onion, keys[wrong].private_key()).unwrap_err(),
                OnionNetError::Crypto(CryptoError::DecryptionFailed)
            );
        }
    }

    #[test]
    fn test_inner_blob_forwarded_unmodified() {
        let keys = relay_keys();
        let inner = single_layer(1, b"5000000042hi");
        let mut payload = b"0000000002".to_vec();
        payload.extend_from_slice(inner.as_str().as_bytes());
        let outer = single_layer(0, &payload);

        match peel_layer(&outer, keys[0].private_key()).unwrap() {
            Layer::Relay { next_relay, message } => {
                assert_eq!(next_relay, 2);
                assert_eq!(message, inner);
            }
            other => panic!("expected relay layer, got {:?}", other),
        }
    }

    #[test]
    fn test_non_ascii_inner_onion() {
        let keys = relay_keys();
        let message = single_layer(0, "0000000002onion\u{e9}".as_bytes());
        assert!(matches!(
            peel_layer(&message, keys[0].private_key()),
            Err(OnionNetError::Protocol(ProtocolError::MalformedLayer(_)))
        ));
    }

    #[test]
    fn test_truncated_message() {
        let keys = relay_keys();
        for len in [0, 1, 100, WRAPPED_KEY_LEN - 1] {
            let message = OnionMessage::from("Q".repeat(len));
            assert_eq!(
                peel_layer(&message, keys[0].private_key()).unwrap_err(),
                OnionNetError::Protocol(ProtocolError::Truncated {
                    len,
                    required: WRAPPED_KEY_LEN
                })
            );
        }
    }

    #[test]
    fn test_truncated_onion_tail() {
        // Dropping payload bytes breaks the seal, not the framing.
        let keys = relay_keys();
        let onion = build(&circuit(), 42, b"hello").unwrap();
        let cut = OnionMessage::from(&onion.as_str()[..onion.len() - 10]);
        assert_eq!(
            peel_layer(&cut, keys[0].private_key()).unwrap_err(),
            OnionNetError::Crypto(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_plaintext_never_accepted() {
        let keys = relay_keys();
        let message = OnionMessage::from("just some plaintext ".repeat(40));
        assert_eq!(
            peel_layer(&message, keys[0].private_key()).unwrap_err(),
            OnionNetError::Crypto(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_short_payload() {
        let keys = relay_keys();
        let message = single_layer(0, b"00042");
        assert_eq!(
            peel_layer(&message, keys[0].private_key()).unwrap_err(),
            OnionNetError::Protocol(ProtocolError::Truncated {
                len: 5,
                required: ADDRESS_WIDTH
            })
        );
    }

    #[test]
    fn test_malformed_address_field() {
        let keys = relay_keys();
        let message = single_layer(0, b"00000x0042hello");
        assert!(matches!(
            peel_layer(&message, keys[0].private_key()),
            Err(OnionNetError::Protocol(ProtocolError::MalformedAddress(_)))
        ));
    }

    #[test]
    fn test_final_layer_payload_untouched() {
        let keys = relay_keys();
        let message = single_layer(0, b"5000000007\x00\xffbinary");
        assert_eq!(
            peel_layer(&message, keys[0].private_key()).unwrap(),
            Layer::Recipient {
                recipient: 7,
                plaintext: b"\x00\xffbinary".to_vec()
            }
        );
    }

    #[test]
    fn test_unknown_next_relay() {
        let keys = relay_keys();
        let message = single_layer(0, b"0000000099rest");
        assert_eq!(
            peel(&message, keys[0].private_key(), &snapshot()).unwrap_err(),
            OnionNetError::Protocol(ProtocolError::UnknownRelay(99))
        );
    }

    #[test]
    fn test_peel_is_repeatable() {
        let snapshot = snapshot();
        let keys = relay_keys();
        let onion = build(&circuit(), 42, b"hello").unwrap();
        let first = peel(&onion, keys[0].private_key(), &snapshot).unwrap();
        let second = peel(&onion, keys[0].private_key(), &snapshot).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_interleaved_circuits_do_not_interfere() {
        let snapshot = snapshot();
        let keys = relay_keys();
        let forward = Circuit::new(&[descriptor(1, 0), descriptor(2, 1)]).unwrap();
        let reverse = Circuit::new(&[descriptor(2, 1), descriptor(1, 0)]).unwrap();

        let a = build(&forward, 10, b"first").unwrap();
        let b = build(&reverse, 20, b"second").unwrap();

        let a1 = peel(&a, keys[0].private_key(), &snapshot).unwrap();
        let b1 = peel(&b, keys[1].private_key(), &snapshot).unwrap();

        let (
            Peeled::Forward {
                message: a_next,
                address: a_addr,
                ..
            },
            Peeled::Forward {
                message: b_next,
                address: b_addr,
                ..
            },
        ) = (a1, b1)
        else {
            panic!("expected both to forward");
        };
        assert_eq!(a_addr, "127.0.0.1:4002");
        assert_eq!(b_addr, "127.0.0.1:4001");

        assert_eq!(
            peel(&b_next, keys[0].private_key(), &snapshot).unwrap(),
            Peeled::Deliver {
                recipient: 20,
                plaintext: b"second".to_vec()
            }
        );
        assert_eq!(
            peel(&a_next, keys[1].private_key(), &snapshot).unwrap(),
            Peeled::Deliver {
                recipient: 10,
                plaintext: b"first".to_vec()
            }
        );
    }
}
