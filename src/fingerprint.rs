//! Prefix fingerprinting and object-key derivation.
//!
//! A prefix fingerprint is a 128-bit XXH3 hash over a canonical byte
//! encoding of (version, block size, model id, prefix tokens). Two processes
//! configured with the same model id and block size derive identical
//! fingerprints, and therefore identical object keys, for the same prefix.

use std::fmt;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::CacheError;

/// Version byte prepended to the canonical serialization. Bump this if the
/// layout ever changes so old and new processes stop sharing buckets.
const SERIALIZATION_VERSION: u8 = 1;

/// A model identifier whose length fits the 16-bit length prefix used in the
/// canonical serialization.
///
/// Construction validates the length once so fingerprinting itself never
/// fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId(String);

impl ModelId {
    /// Validate and wrap a model id. Ids longer than 65535 bytes cannot be
    /// length-prefixed and are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, CacheError> {
        let id = id.into();
        if id.len() > u16::MAX as usize {
            return Err(CacheError::Config(format!(
                "model id is {} bytes, exceeding the 65535-byte limit",
                id.len()
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 128-bit prefix fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixKey([u8; 16]);

impl PrefixKey {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse the 32-character lower-hex form produced by [`fmt::Display`].
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        u128::from_str_radix(hex, 16)
            .ok()
            .map(|v| Self(v.to_be_bytes()))
    }
}

impl fmt::Display for PrefixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Compute the fingerprint of a block-aligned prefix.
///
/// The canonical layout is: version byte, block size (LE u32), model id
/// length (LE u16) and bytes, then each token as LE u32. The 128-bit XXH3
/// hash of that buffer, taken little-endian, is the key.
pub fn fingerprint(tokens: &[u32], block_size: u32, model_id: &ModelId) -> PrefixKey {
    let id_bytes = model_id.as_str().as_bytes();
    let mut buf = Vec::with_capacity(1 + 4 + 2 + id_bytes.len() + tokens.len() * 4);

    buf.push(SERIALIZATION_VERSION);
    buf.extend_from_slice(&block_size.to_le_bytes());
    buf.extend_from_slice(&(id_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(id_bytes);
    for token in tokens {
        buf.extend_from_slice(&token.to_le_bytes());
    }

    PrefixKey(xxh3_128(&buf).to_le_bytes())
}

/// Derive the object-store key for one block of a prefix:
/// `{model_id}/b{block_size}/{pk_hex}/{index}.kv`.
pub fn object_key(model_id: &ModelId, block_size: u32, pk: &PrefixKey, index: u32) -> String {
    format!("{model_id}/b{block_size}/{pk}/{index}.kv")
}

/// Recover `(fingerprint, block index)` from an object key.
///
/// Model ids may contain `/`, so the key is parsed from the tail: the last
/// segment is `{index}.kv` and the one before it is the fingerprint hex.
pub fn parse_object_key(key: &str) -> Option<(PrefixKey, u32)> {
    let mut segments = key.rsplit('/');
    let index = segments.next()?.strip_suffix(".kv")?.parse::<u32>().ok()?;
    let pk = PrefixKey::from_hex(segments.next()?)?;
    Some((pk, index))
}
