// Per-hop layer keys: XChaCha20-Poly1305
//
// A sealed layer travels as `base64(nonce) "." base64(ciphertext)`. The
// separator is outside the base64 alphabet, so splitting is unambiguous.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::CryptoError;

/// Size of a layer key (bytes)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of XChaCha20-Poly1305 nonce (bytes)
pub const NONCE_SIZE: usize = 24;

/// Joins the encoded nonce and ciphertext
pub const SEPARATOR: char = '.';

/// A layer key, generated fresh for every hop of every message
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Base64 encoding of the raw key bytes
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0))
    }

    /// Decode a key produced by [`SymmetricKey::encode`]
    pub fn decode(text: &str) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(text)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
        );
        let bytes: [u8; SYMMETRIC_KEY_SIZE] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} key bytes, got {}",
                SYMMETRIC_KEY_SIZE,
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Nonce and ciphertext of one sealed layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl SealedBox {
    /// Render as `base64(nonce) "." base64(ciphertext)`
    pub fn to_text(&self) -> String {
        let mut out = STANDARD.encode(self.nonce);
        out.push(SEPARATOR);
        out.push_str(&STANDARD.encode(&self.ciphertext));
        out
    }

    /// Parse the text form. Any structural problem is a decryption failure.
    pub fn parse(text: &str) -> Result<Self, CryptoError> {
        let (nonce_b64, ciphertext_b64) = text
            .split_once(SEPARATOR)
            .ok_or(CryptoError::DecryptionFailed)?;
        let nonce: [u8; NONCE_SIZE] = STANDARD
            .decode(nonce_b64)
            .map_err(|_| CryptoError::DecryptionFailed)?
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed)?;
        // A second separator is rejected here: '.' is not valid base64.
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(Self { nonce, ciphertext })
    }
}

/// Seal `plaintext` under `key` with a fresh random nonce
pub fn symmetric_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(SealedBox { nonce, ciphertext }.to_text())
}

/// Open a layer sealed by [`symmetric_encrypt`]
pub fn symmetric_decrypt(key: &SymmetricKey, sealed: &str) -> Result<Vec<u8>, CryptoError> {
    let sealed = SealedBox::parse(sealed)?;
    key.cipher()
        .decrypt(XNonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)
}
