// Relay key files
//
// `onionnet keygen --out <path>` writes one, `onionnet relay --key <path>`
// loads it, so a relay keeps its public key across restarts. The file holds
// the private key and is created owner-readable only.

use anyhow::{Context, Result};
use onionnet_core::crypto::{encode_private_key, encode_public_key};
use onionnet_core::KeyPair;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use zeroize::Zeroizing;

#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(rename = "pubKey")]
    public_key: String,
    #[serde(rename = "prvKey")]
    private_key: Zeroizing<String>,
}

/// Write `keys` to a new file at `path`. Never overwrites.
pub fn save(path: &Path, keys: &KeyPair) -> Result<()> {
    let file = KeyFile {
        public_key: encode_public_key(keys.public_key())?,
        private_key: encode_private_key(keys.private_key())?,
    };
    let contents = Zeroizing::new(
        serde_json::to_string_pretty(&file).context("Failed to serialize key file")?,
    );

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut out = options
        .open(path)
        .with_context(|| format!("Failed to create key file {}", path.display()))?;
    out.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write key file {}", path.display()))?;
    Ok(())
}

/// Read a key file written by [`save`]; both halves must belong together.
pub fn load(path: &Path) -> Result<KeyPair> {
    let contents = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?,
    );
    let file: KeyFile = serde_json::from_str(&contents).context("Failed to parse key file")?;
    let keys = KeyPair::from_encoded(&file.public_key, &file.private_key)
        .with_context(|| format!("Invalid key pair in {}", path.display()))?;
    Ok(keys)
}
