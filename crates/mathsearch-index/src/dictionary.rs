//! Symbol → meaning id dictionary.
//!
//! Every distinct `tag#text` symbol seen while indexing gets a compact id.
//! Indexing interns (`put`); queries only look up (`get`), so a query symbol
//! that never occurred in the corpus is reported instead of silently
//! growing the dictionary.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::image::ImageError;
use crate::token::MeaningId;

const DICTIONARY_MAGIC: &[u8; 4] = b"MWSD";
const DICTIONARY_VERSION: u32 = 1;

/// Read-only view used by the query encoder.
pub trait MeaningLookup: Send + Sync {
    fn meaning_of(&self, symbol: &str) -> Option<MeaningId>;
}

/// Concurrent symbol interner.
pub struct MeaningDictionary {
    by_symbol: DashMap<String, MeaningId>,
    by_id: DashMap<MeaningId, String>,
    next_id: AtomicU32,
}

impl MeaningDictionary {
    pub fn new() -> Self {
        Self {
            by_symbol: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a symbol, returning its id.
    pub fn put(&self, symbol: &str) -> MeaningId {
        if let Some(id) = self.by_symbol.get(symbol) {
            return *id;
        }
        *self
            .by_symbol
            .entry(symbol.to_string())
            .or_insert_with(|| {
                let id = MeaningId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.by_id.insert(id, symbol.to_string());
                id
            })
    }

    /// Look up a symbol without inserting.
    pub fn get(&self, symbol: &str) -> Option<MeaningId> {
        self.by_symbol.get(symbol).map(|id| *id)
    }

    /// Reverse lookup.
    pub fn lookup(&self, id: MeaningId) -> Option<String> {
        self.by_id.get(&id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Serialize to bytes: header, then the symbols in id order.
    ///
    /// Fails if an allocated id has no symbol yet (a `put` still in
    /// flight), since the image stores ids by position.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let symbols: Vec<String> = (0..self.next_id.load(Ordering::SeqCst))
            .map(|i| {
                self.by_id
                    .get(&MeaningId::new(i))
                    .map(|s| s.clone())
                    .ok_or_else(|| {
                        ImageError::Inconsistent(format!("meaning id {i} has no symbol"))
                    })
            })
            .collect::<Result<_, _>>()?;
        let body = bincode::serialize(&symbols)?;

        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(DICTIONARY_MAGIC);
        out.extend_from_slice(&DICTIONARY_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize from bytes. Ids are reassigned in stored order, which
    /// reproduces the original ids.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < 8 || &bytes[0..4] != DICTIONARY_MAGIC {
            return Err(ImageError::BadMagic);
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != DICTIONARY_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let symbols: Vec<String> = bincode::deserialize(&bytes[8..])?;
        let dictionary = Self::new();
        for symbol in &symbols {
            dictionary.put(symbol);
        }
        if dictionary.len() != symbols.len() {
            return Err(ImageError::Inconsistent(
                "duplicate symbol in dictionary image".to_string(),
            ));
        }
        Ok(dictionary)
    }
}

impl Default for MeaningDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl MeaningLookup for MeaningDictionary {
    fn meaning_of(&self, symbol: &str) -> Option<MeaningId> {
        self.get(symbol)
    }
}

impl std::fmt::Debug for MeaningDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeaningDictionary")
            .field("symbols", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn put_is_idempotent_and_get_does_not_insert() {
        let dict = MeaningDictionary::new();
        let plus = dict.put("plus#");
        assert_eq!(dict.put("plus#"), plus);
        assert_eq!(dict.get("plus#"), Some(plus));
        assert_eq!(dict.get("times#"), None);
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.lookup(plus).as_deref(), Some("plus#"));
    }

    #[test]
    fn image_preserves_ids() {
        let dict = MeaningDictionary::new();
        let ids: Vec<_> = ["apply#", "plus#", "ci#x", "cn#1"]
            .iter()
            .map(|s| dict.put(s))
            .collect();
        let restored = MeaningDictionary::from_bytes(&dict.to_bytes().unwrap()).unwrap();
        for (symbol, id) in ["apply#", "plus#", "ci#x", "cn#1"].iter().zip(ids) {
            assert_eq!(restored.get(symbol), Some(id));
        }
        assert_eq!(restored.put("new#"), MeaningId::new(4));
    }

    #[test]
    fn image_refuses_unfilled_ids() {
        let dict = MeaningDictionary::new();
        dict.put("apply#");
        // An id handed out whose symbol is not stored yet.
        dict.next_id.fetch_add(1, Ordering::SeqCst);
        dict.put("plus#");
        assert!(matches!(
            dict.to_bytes(),
            Err(ImageError::Inconsistent(_))
        ));
    }

    #[test]
    fn rejects_foreign_bytes() {
        assert!(matches!(
            MeaningDictionary::from_bytes(b"nope"),
            Err(ImageError::BadMagic)
        ));
    }

    #[test]
    fn concurrent_puts_agree() {
        let dict = Arc::new(MeaningDictionary::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dict = Arc::clone(&dict);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| dict.put(&format!("cn#{i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<MeaningId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(dict.len(), 100);
    }
}
