//! SHA-256 key hasher

use sha2::{Digest, Sha256};

use super::{KeyHash, KeyHasher};

/// Hashes keys to a 256-bit digest rendered as 64 uppercase hex characters
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl KeyHasher for Sha256Hasher {
    fn hash(&self, key: &[u8]) -> KeyHash {
        let mut hasher = Sha256::new();
        hasher.update(key);
        KeyHash::from_digest(&hasher.finalize())
    }
}
