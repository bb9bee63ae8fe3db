// Relay key pairs: RSA-OAEP key wrapping
//
// Each relay generates one pair at start-up and keeps the private half to
// itself. Senders wrap a fresh layer key under the relay's public key; the
// wrapped key always encodes to exactly WRAPPED_KEY_LEN base64 characters,
// which is what lets relays split an onion without a length prefix.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

use crate::CryptoError;

/// Modulus size shared by every participant. Not negotiated.
pub const RSA_KEY_BITS: usize = 2048;

/// Length of a base64-encoded wrapped key (344 for a 2048-bit modulus).
pub const WRAPPED_KEY_LEN: usize = (RSA_KEY_BITS / 8 + 2) / 3 * 4;

/// A relay's public key, safe to publish in the directory.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

/// A relay's private key. Never leaves the relay process.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(RsaPrivateKey);

impl PublicKey {
    /// Short hex fingerprint for logs: first 8 bytes of blake3(SPKI DER).
    pub fn fingerprint(&self) -> String {
        match self.0.to_public_key_der() {
            Ok(der) => hex::encode(&blake3::hash(der.as_bytes()).as_bytes()[..8]),
            Err(_) => "unknown".to_string(),
        }
    }
}

impl PrivateKey {
    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Key pair owned by a single relay
#[derive(Clone, Debug)]
pub struct KeyPair {
    public_key: PublicKey,
    private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self {
            public_key: PublicKey(public),
            private_key: PrivateKey(private),
        })
    }

    /// Rebuild a pair from its text encodings.
    ///
    /// Fails with [`CryptoError::KeyMismatch`] when the public key was not
    /// derived from the private key.
    pub fn from_encoded(public_key: &str, private_key: &str) -> Result<Self, CryptoError> {
        let public_key = decode_public_key(public_key)?;
        let private_key = decode_private_key(private_key)?;
        if private_key.public_key() != public_key {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(Self { public_key, private_key })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

/// Encode a public key as base64 over DER SubjectPublicKeyInfo
pub fn encode_public_key(key: &PublicKey) -> Result<String, CryptoError> {
    let der = key
        .0
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Decode a public key produced by [`encode_public_key`]
pub fn decode_public_key(text: &str) -> Result<PublicKey, CryptoError> {
    let der = STANDARD
        .decode(text.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let key = RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if key.size() * 8 != RSA_KEY_BITS {
        return Err(CryptoError::InvalidKey(format!(
            "expected {}-bit modulus, got {}",
            RSA_KEY_BITS,
            key.size() * 8
        )));
    }
    Ok(PublicKey(key))
}

/// Encode a private key as base64 over DER PKCS#8.
/// The returned string wipes itself on drop.
pub fn encode_private_key(key: &PrivateKey) -> Result<Zeroizing<String>, CryptoError> {
    let der = key
        .0
        .to_pkcs8_der()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(Zeroizing::new(STANDARD.encode(der.as_bytes())))
}

/// Decode a private key produced by [`encode_private_key`]
pub fn decode_private_key(text: &str) -> Result<PrivateKey, CryptoError> {
    let der = Zeroizing::new(
        STANDARD
            .decode(text.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
    );
    let key = RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if key.size() * 8 != RSA_KEY_BITS {
        return Err(CryptoError::InvalidKey(format!(
            "expected {}-bit modulus, got {}",
            RSA_KEY_BITS,
            key.size() * 8
        )));
    }
    Ok(PrivateKey(key))
}

/// Encrypt a short payload (a layer key) under a relay's public key.
///
/// The result is always exactly [`WRAPPED_KEY_LEN`] characters.
pub fn asymmetric_encrypt(plaintext: &[u8], public_key: &PublicKey) -> Result<String, CryptoError> {
    let ciphertext = public_key
        .0
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt a wrapped payload with this relay's private key.
///
/// Every failure mode (wrong key, bad length, bad base64, OAEP padding
/// failure) collapses into [`CryptoError::DecryptionFailed`].
pub fn asymmetric_decrypt(
    ciphertext: &str,
    private_key: &PrivateKey,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let raw = STANDARD
        .decode(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let plaintext = private_key
        .0
        .decrypt(Oaep::new::<Sha256>(), &raw)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}
