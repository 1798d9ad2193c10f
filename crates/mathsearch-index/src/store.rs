//! Interfaces to the external formula and crawl-data stores, plus
//! in-memory implementations.
//!
//! The trie only knows [`FormulaId`]s; where a formula occurs and what the
//! surrounding document looked like lives behind these traits.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trie::FormulaId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct OccurrenceId(u64);

impl OccurrenceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Where a subexpression sits: the formula's harvest id and the node's
/// xpath inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormulaPath {
    pub xml_id: String,
    pub xpath: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub formula: FormulaId,
    pub document: Option<DocumentId>,
    pub path: FormulaPath,
}

/// Crawled payload of one document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrawlData {
    pub url: String,
    pub data: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store record error: {0}")]
    Codec(String),
}

pub trait FormulaStore: Send + Sync {
    fn put_occurrence(
        &self,
        formula: FormulaId,
        document: Option<DocumentId>,
        path: FormulaPath,
    ) -> Result<OccurrenceId, StoreError>;

    /// All occurrences of a formula, in insertion order.
    fn occurrences_for(&self, formula: FormulaId) -> Result<Vec<Occurrence>, StoreError>;

    fn occurrence_count(&self) -> u64;
}

pub trait CrawlStore: Send + Sync {
    fn put_document(&self, data: &CrawlData) -> Result<DocumentId, StoreError>;

    fn get_document(&self, id: DocumentId) -> Result<CrawlData, StoreError>;

    fn document_count(&self) -> u64;
}

// ============================================================================
// In-memory stores
// ============================================================================

/// Formula occurrences grouped by formula id.
#[derive(Debug, Default)]
pub struct MemoryFormulaStore {
    by_formula: RwLock<AHashMap<FormulaId, Vec<Occurrence>>>,
    next_id: AtomicU64,
}

impl MemoryFormulaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already-numbered record (used when replaying a log).
    pub fn restore(&self, occurrence: Occurrence) {
        self.next_id
            .fetch_max(occurrence.id.raw() + 1, Ordering::SeqCst);
        self.by_formula
            .write()
            .entry(occurrence.formula)
            .or_default()
            .push(occurrence);
    }

    /// Highest formula id with at least one occurrence.
    pub fn max_formula(&self) -> Option<FormulaId> {
        self.by_formula.read().keys().max().copied()
    }

    /// Allocate the next record without storing it.
    pub fn next_occurrence(
        &self,
        formula: FormulaId,
        document: Option<DocumentId>,
        path: FormulaPath,
    ) -> Occurrence {
        Occurrence {
            id: OccurrenceId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            formula,
            document,
            path,
        }
    }
}

impl FormulaStore for MemoryFormulaStore {
    fn put_occurrence(
        &self,
        formula: FormulaId,
        document: Option<DocumentId>,
        path: FormulaPath,
    ) -> Result<OccurrenceId, StoreError> {
        let occurrence = self.next_occurrence(formula, document, path);
        let id = occurrence.id;
        self.restore(occurrence);
        Ok(id)
    }

    fn occurrences_for(&self, formula: FormulaId) -> Result<Vec<Occurrence>, StoreError> {
        Ok(self
            .by_formula
            .read()
            .get(&formula)
            .cloned()
            .unwrap_or_default())
    }

    fn occurrence_count(&self) -> u64 {
        self.by_formula
            .read()
            .values()
            .map(|v| v.len() as u64)
            .sum()
    }
}

/// Crawl payloads addressed by position.
#[derive(Debug, Default)]
pub struct MemoryCrawlStore {
    documents: RwLock<Vec<CrawlData>>,
}

impl MemoryCrawlStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrawlStore for MemoryCrawlStore {
    fn put_document(&self, data: &CrawlData) -> Result<DocumentId, StoreError> {
        let mut documents = self.documents.write();
        let id = DocumentId(documents.len() as u64);
        documents.push(data.clone());
        Ok(id)
    }

    fn get_document(&self, id: DocumentId) -> Result<CrawlData, StoreError> {
        self.documents
            .read()
            .get(id.raw() as usize)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id.raw())))
    }

    fn document_count(&self) -> u64 {
        self.documents.read().len() as u64
    }
}
