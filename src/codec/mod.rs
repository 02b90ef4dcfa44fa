//! Codec Module
//!
//! The two primitives the engine treats as pluggable:
//! - [`KeyHasher`]: raw caller key → fixed-width [`KeyHash`] token
//! - [`ValueCodec`]: reversible, size-reducing transform of values
//!
//! Raw keys never reach storage; only their hash token does.

mod compression;
mod hash;

use std::fmt;

use crate::error::{AllyError, Result};

pub use compression::DeflateCodec;
pub use hash::Sha256Hasher;

/// Deterministic fixed-width digest of a caller key
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &[u8]) -> KeyHash;
}

/// Reversible value transform
///
/// `decode(encode(v)) == v` must hold for every non-empty `v`.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>>;
}

/// Hash token identifying a key inside the engine
///
/// Always uppercase hex, so it can never collide with the `|` field
/// separator or the newline record terminator of the on-disk formats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHash(String);

impl KeyHash {
    /// Render a digest as a token
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode_upper(digest))
    }

    /// Validate a token read back from disk
    pub fn parse(token: &str) -> Result<Self> {
        let valid = !token.is_empty()
            && token.len() % 2 == 0
            && token.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));

        if !valid {
            return Err(AllyError::Corruption(format!("invalid key hash: {:?}", token)));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
