//! Index manager: turns a harvested document into trie leaves and
//! formula-store occurrences.

use roaring::RoaringBitmap;
use thiserror::Error;
use tracing::debug;

use mathsearch_cmml::ExpressionNode;

use crate::dictionary::MeaningDictionary;
use crate::encoder::{EncodingError, HarvestEncoder, IndexingOptions};
use crate::store::{CrawlData, CrawlStore, DocumentId, FormulaPath, FormulaStore, StoreError};
use crate::trie::{FormulaIndex, TrieError};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Trie(#[from] TrieError),
}

pub struct IndexManager<'a> {
    index: &'a FormulaIndex,
    dictionary: &'a MeaningDictionary,
    formulas: &'a dyn FormulaStore,
    crawl: &'a dyn CrawlStore,
    options: IndexingOptions,
}

impl<'a> IndexManager<'a> {
    pub fn new(
        index: &'a FormulaIndex,
        dictionary: &'a MeaningDictionary,
        formulas: &'a dyn FormulaStore,
        crawl: &'a dyn CrawlStore,
        options: IndexingOptions,
    ) -> Self {
        Self {
            index,
            dictionary,
            formulas,
            crawl,
            options,
        }
    }

    pub fn options(&self) -> IndexingOptions {
        self.options
    }

    /// Index every subterm of `root` as part of `document`.
    ///
    /// The root's `xml_id` (empty if unset) is recorded as the location of
    /// each occurrence. Returns the number of distinct formulas associated
    /// with the document by this call.
    pub fn index_document(
        &self,
        root: &ExpressionNode,
        document: DocumentId,
    ) -> Result<usize, IndexError> {
        let xml_id = root.xml_id.clone().unwrap_or_default();
        self.index_expression(root, &xml_id, Some(document))
    }

    /// Index every subterm of `root`, root included.
    ///
    /// A formula counts once per call, however often it repeats inside
    /// `root`. On error, subterms already inserted stay in the trie;
    /// reindexing the same expression is safe.
    pub fn index_expression(
        &self,
        root: &ExpressionNode,
        xml_id: &str,
        document: Option<DocumentId>,
    ) -> Result<usize, IndexError> {
        let encoder = HarvestEncoder::new(self.dictionary, self.options);
        let mut seen = RoaringBitmap::new();

        let mut stack: Vec<&ExpressionNode> = vec![root];
        while let Some(node) = stack.pop() {
            let encoded = encoder.encode(node)?;
            let outcome = self.index.insert(&encoded)?;
            if seen.insert(outcome.formula_id.raw()) {
                self.formulas.put_occurrence(
                    outcome.formula_id,
                    document,
                    FormulaPath {
                        xml_id: xml_id.to_string(),
                        xpath: node.xpath.clone(),
                    },
                )?;
                self.index.bump_hits(outcome.formula_id);
            }
            stack.extend(node.children.iter().rev());
        }

        debug!(
            xml_id,
            document = document.map(DocumentId::raw),
            formulas = seen.len(),
            "indexed expression"
        );
        Ok(seen.len() as usize)
    }

    /// Store a crawled document so formulas can be attached to it.
    pub fn index_crawl_data(&self, data: &CrawlData) -> Result<DocumentId, IndexError> {
        let id = self.crawl.put_document(data)?;
        debug!(url = %data.url, document = id.raw(), "stored crawl data");
        Ok(id)
    }
}
