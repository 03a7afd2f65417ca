use sha2::{Digest, Sha256};

/// Digest of persisted file bytes (`sha256:<hex>`).
pub(crate) fn sha256_hex_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
