//! End-to-end onion tests at the protocol layer
//!
//! Builds onions over real RSA key pairs and peels them hop by hop, without
//! any nodes or transport in between.
//!
//! Run with: cargo test --test integration_circuit

use onionnet_core::crypto::{encode_public_key, KeyPair, WRAPPED_KEY_LEN};
use onionnet_core::{
    build, peel, select_circuit, Circuit, CryptoError, DirectorySnapshot, NodeId, OnionMessage,
    OnionNetError, Peeled, ProtocolError, RelayDescriptor,
};
use std::sync::OnceLock;

fn keys() -> &'static [KeyPair] {
    static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| (0..5).map(|_| KeyPair::generate().unwrap()).collect())
}

/// Relay `i` has id `i + 1` and uses key `i`
fn directory() -> DirectorySnapshot {
    DirectorySnapshot::new(
        keys()
            .iter()
            .enumerate()
            .map(|(i, pair)| RelayDescriptor {
                relay_id: i as NodeId + 1,
                public_key: encode_public_key(pair.public_key()).unwrap(),
                network_address: format!("relay-{}.local:4000", i + 1),
            })
            .collect(),
    )
}

fn key_for(relay_id: NodeId) -> &'static KeyPair {
    &keys()[(relay_id - 1) as usize]
}

#[test]
fn test_scenario_hello_through_three_relays() {
    let directory = directory();
    let circuit = Circuit::new(&directory.relays()[..3]).unwrap();
    let onion = build(&circuit, 42, b"hello").unwrap();

    let blob_1 = match peel(&onion, key_for(1).private_key(), &directory).unwrap() {
        Peeled::Forward { address, message, .. } => {
            assert_eq!(address, "relay-2.local:4000");
            message
        }
        other => panic!("R0 should forward, got {:?}", other),
    };

    let blob_2 = match peel(&blob_1, key_for(2).private_key(), &directory).unwrap() {
        Peeled::Forward { address, message, .. } => {
            assert_eq!(address, "relay-3.local:4000");
            message
        }
        other => panic!("R1 should forward, got {:?}", other),
    };

    assert_eq!(
        peel(&blob_2, key_for(3).private_key(), &directory).unwrap(),
        Peeled::Deliver {
            recipient: 42,
            plaintext: b"hello".to_vec()
        }
    );

    assert_eq!(
        peel(&blob_1, key_for(3).private_key(), &directory).unwrap_err(),
        OnionNetError::Crypto(CryptoError::DecryptionFailed)
    );
}

#[test]
fn test_onion_correctness_for_every_length() {
    let directory = directory();
    let plaintexts: [&[u8]; 3] = [b"", b"short", &[0x42; 4096]];

    for hops in 2..=5 {
        for plaintext in plaintexts {
            let circuit = select_circuit(directory.relays(), hops).unwrap();
            let path = circuit.relay_ids();
            let mut message = build(&circuit, 9, plaintext).unwrap();

            for (i, relay_id) in path.iter().enumerate() {
                let peeled = peel(&message, key_for(*relay_id).private_key(), &directory).unwrap();
                match peeled {
                    Peeled::Forward { next_relay, message: inner, .. } => {
                        assert!(i + 1 < path.len(), "forwarded past the last hop");
                        assert_eq!(next_relay, path[i + 1]);
                        message = inner;
                    }
                    Peeled::Deliver { recipient, plaintext: out } => {
                        assert_eq!(i + 1, path.len(), "delivered before the last hop");
                        assert_eq!(recipient, 9);
                        assert_eq!(out, plaintext);
                    }
                }
            }
        }
    }
}

#[test]
fn test_wrong_key_rejected_at_every_hop() {
    let directory = directory();
    let circuit = select_circuit(directory.relays(), 3).unwrap();
    let path = circuit.relay_ids();
    let mut message = build(&circuit, 1, b"payload").unwrap();

    for (i, relay_id) in path.iter().enumerate() {
        for other in (1..=5).filter(|id| id != relay_id) {
            assert_eq!(
                peel(&message, key_for(other).private_key(), &directory).unwrap_err(),
                OnionNetError::Crypto(CryptoError::DecryptionFailed),
                "relay {} opened hop {}",
                other,
                i
            );
        }
        if let Peeled::Forward { message: inner, .. } =
            peel(&message, key_for(*relay_id).private_key(), &directory).unwrap()
        {
            message = inner;
        }
    }
}

#[test]
fn test_truncated_messages() {
    let directory = directory();
    let circuit = select_circuit(directory.relays(), 3).unwrap();
    let onion = build(&circuit, 1, b"payload").unwrap();
    let entry = key_for(circuit.relay_ids()[0]);

    for len in [0, 1, 43, 200, WRAPPED_KEY_LEN - 1] {
        let cut = OnionMessage::from(&onion.as_str()[..len]);
        assert_eq!(
            peel(&cut, entry.private_key(), &directory).unwrap_err(),
            OnionNetError::Protocol(ProtocolError::Truncated {
                len,
                required: WRAPPED_KEY_LEN
            })
        );
    }
}

#[test]
fn test_selection_needs_enough_relays() {
    let directory = directory();
    assert!(matches!(
        select_circuit(directory.relays(), 6),
        Err(OnionNetError::Protocol(ProtocolError::InsufficientRelays {
            available: 5,
            required: 6
        }))
    ));
}
