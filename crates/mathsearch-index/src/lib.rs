//! MathSearch formula index.
//!
//! Formulas are flattened into prefix-order token sequences and merged into
//! one shared substitution trie: each distinct subexpression of the corpus
//! is exactly one leaf, identified by a stable [`FormulaId`] and carrying a
//! hit count. Queries are encoded the same way, with query variables turned
//! into wildcards that stand for one complete subtree, and matched against
//! the trie.
//!
//! ## Module Organization
//!
//! - `token`: token and encoded-expression types
//! - `dictionary`: symbol → meaning id interner
//! - `encoder`: harvest and query encoders
//! - `trie`: substitution trie and the lock-guarded [`FormulaIndex`]
//! - `image`: persisted trie images
//! - `store`: formula / crawl-data store interfaces and in-memory stores
//! - `manager`: per-document indexing
//! - `query`: query execution (streaming and batch engines)

pub mod dictionary;
pub mod encoder;
pub mod image;
pub mod manager;
pub mod query;
pub mod store;
pub mod token;
pub mod trie;

pub use dictionary::{MeaningDictionary, MeaningLookup};
pub use encoder::{EncodingError, HarvestEncoder, IndexingOptions, QueryEncoder};
pub use image::{ImageError, NodeImage, TrieImage, IMAGE_MAGIC, IMAGE_VERSION};
pub use manager::{IndexError, IndexManager};
pub use query::{
    Answer, AnswerSet, BatchEngine, CancelFlag, EngineKind, MatchEngine, MatchRun, Query,
    QueryContext, QueryEngine, QueryError, QueryExpression, ResultWindow, StreamingEngine,
};
pub use store::{
    CrawlData, CrawlStore, DocumentId, FormulaPath, FormulaStore, MemoryCrawlStore,
    MemoryFormulaStore, Occurrence, OccurrenceId, StoreError,
};
pub use token::{EncodedExpression, MeaningId, QueryToken, QvarInfo, QvarSlot, Token};
pub use trie::{
    FormulaId, FormulaIndex, InsertOutcome, Leaf, LeafRef, NodeId, SubstitutionTrie,
    TraversalOutcome, TrieError, Visit,
};
