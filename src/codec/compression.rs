//! DEFLATE value codec (zlib framing)

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{AllyError, Result};

use super::ValueCodec;

/// Compresses values with zlib-framed DEFLATE
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: Compression,
}

impl DeflateCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ValueCodec for DeflateCodec {
    fn encode(&self, value: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(value.len() / 2 + 16), self.level);
        encoder
            .write_all(value)
            .map_err(|e| AllyError::Codec(format!("compression failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| AllyError::Codec(format!("compression failed: {}", e)))
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(encoded);
        let mut value = Vec::new();
        decoder
            .read_to_end(&mut value)
            .map_err(|e| AllyError::Codec(format!("decompression failed: {}", e)))?;
        Ok(value)
    }
}
