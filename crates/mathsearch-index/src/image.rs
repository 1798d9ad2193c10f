//! Persisted trie image.
//!
//! Layout: `MWSI` magic, `u32` version (little endian), `u64` body length,
//! then the `bincode` body. Node and formula ids in the image are the ids of
//! the live trie, so formula-store records stay valid after a reload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::Token;

pub const IMAGE_MAGIC: &[u8; 4] = b"MWSI";
pub const IMAGE_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("not a MathSearch index image")]
    BadMagic,
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u32),
    #[error("image truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("image encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("inconsistent image: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeImage {
    pub children: Vec<(Token, u32)>,
    pub leaf: Option<u32>,
}

/// Serializable copy of a [`crate::SubstitutionTrie`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrieImage {
    /// Node arena; index 0 is the root.
    pub nodes: Vec<NodeImage>,
    /// Hit count per formula id.
    pub hits: Vec<u64>,
}

impl TrieImage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(IMAGE_MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < 4 || &bytes[0..4] != IMAGE_MAGIC {
            return Err(ImageError::BadMagic);
        }
        if bytes.len() < HEADER_LEN {
            return Err(ImageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != IMAGE_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[8..16]);
        let body_len = u64::from_le_bytes(len) as usize;
        let expected = HEADER_LEN.saturating_add(body_len);
        if bytes.len() < expected {
            return Err(ImageError::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        Ok(bincode::deserialize(&bytes[HEADER_LEN..expected])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{EncodedExpression, MeaningId};
    use crate::trie::SubstitutionTrie;

    fn sample() -> TrieImage {
        let mut trie = SubstitutionTrie::new();
        let plus = EncodedExpression::from_tokens([
            Token::constant(2, MeaningId::new(0)),
            Token::variable(MeaningId::new(0)),
            Token::constant(0, MeaningId::new(1)),
        ]);
        let id = trie.insert(&plus).unwrap().formula_id;
        trie.bump_hits(id);
        trie.snapshot()
    }

    #[test]
    fn bytes_round_trip() {
        let image = sample();
        let bytes = image.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], IMAGE_MAGIC);
        assert_eq!(TrieImage::from_bytes(&bytes).unwrap(), image);
    }

    #[test]
    fn header_errors() {
        let mut bytes = sample().to_bytes().unwrap();
        assert!(matches!(
            TrieImage::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ImageError::Truncated { .. })
        ));
        bytes[4] = 9;
        assert!(matches!(
            TrieImage::from_bytes(&bytes),
            Err(ImageError::UnsupportedVersion(9))
        ));
        assert!(matches!(
            TrieImage::from_bytes(b"AXPD0000"),
            Err(ImageError::BadMagic)
        ));
    }
}
