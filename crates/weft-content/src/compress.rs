//! Optional zstd compression of stored payloads.

use serde::{Deserialize, Serialize};

use crate::error::{ContentError, ContentResult};

/// How an entry's bytes are encoded at rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Zstd,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

/// Encode `data`, keeping the compressed form only if it is strictly smaller.
///
/// Payloads shorter than `min_bytes` are never compressed.
pub fn encode(data: &[u8], level: i32, min_bytes: usize) -> ContentResult<(Compression, Vec<u8>)> {
    if data.len() < min_bytes {
        return Ok((Compression::None, data.to_vec()));
    }
    let compressed =
        zstd::encode_all(data, level).map_err(|e| ContentError::Compression(e.to_string()))?;
    if compressed.len() < data.len() {
        Ok((Compression::Zstd, compressed))
    } else {
        Ok((Compression::None, data.to_vec()))
    }
}

/// Decode bytes previously produced by [`encode`].
pub fn decode(compression: Compression, stored: &[u8]) -> ContentResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(stored.to_vec()),
        Compression::Zstd => {
            zstd::decode_all(stored).map_err(|e| ContentError::Compression(e.to_string()))
        }
    }
}
