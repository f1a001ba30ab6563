use sha2::{Digest, Sha256};

/// Content fingerprint used wherever "changed" has to be decided: SHA-256,
/// lowercase hex, 64 characters.
pub fn hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
