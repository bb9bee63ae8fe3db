// Cryptography module: relay key pairs and per-hop layer keys
//
// Asymmetric: RSA-2048 with OAEP/SHA-256, used only to wrap layer keys.
// Symmetric: XChaCha20-Poly1305, used to seal each layer's payload.

pub mod asymmetric;
pub mod symmetric;

pub use asymmetric::{
    asymmetric_decrypt, asymmetric_encrypt, decode_private_key, decode_public_key,
    encode_private_key, encode_public_key, KeyPair, PrivateKey, PublicKey, RSA_KEY_BITS,
    WRAPPED_KEY_LEN,
};
pub use symmetric::{symmetric_decrypt, symmetric_encrypt, SealedBox, SymmetricKey, SEPARATOR};
