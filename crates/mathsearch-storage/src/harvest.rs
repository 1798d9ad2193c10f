//! Loading harvests into an index.

use ahash::AHashMap;
use serde::Serialize;
use tracing::{debug, warn};

use mathsearch_cmml::Harvest;
use mathsearch_index::{CrawlData, DocumentId, IndexError, IndexManager};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    /// Expressions indexed.
    pub exprs: usize,
    /// Expressions skipped because they could not be encoded or referred
    /// to an unknown `data_id`.
    pub skipped: usize,
    /// Formulas newly associated with their documents.
    pub subexpressions: usize,
    /// Crawled documents stored.
    pub documents: usize,
}

impl HarvestStats {
    pub fn merge(&mut self, other: HarvestStats) {
        self.exprs += other.exprs;
        self.skipped += other.skipped;
        self.subexpressions += other.subexpressions;
        self.documents += other.documents;
    }
}

/// Store every `mws:data` of the harvest and index every `mws:expr`
/// against its document.
///
/// Expressions that fail to encode are logged and skipped; a store failure
/// aborts the rest of the harvest.
pub fn load_harvest(manager: &IndexManager<'_>, harvest: &Harvest) -> Result<HarvestStats, IndexError> {
    let mut stats = HarvestStats::default();
    let mut documents: AHashMap<&str, DocumentId> = AHashMap::with_capacity(harvest.data.len());

    for data in &harvest.data {
        let crawl = CrawlData {
            url: data.document_url().unwrap_or_default(),
            data: data.payload.clone(),
        };
        let id = manager.index_crawl_data(&crawl)?;
        documents.insert(data.data_id.as_str(), id);
        stats.documents += 1;
    }

    for expr in &harvest.exprs {
        let document = match expr.data_id.as_deref() {
            Some(data_id) => match documents.get(data_id) {
                Some(id) => Some(*id),
                None => {
                    warn!(url = %expr.url, data_id, "expression refers to unknown data id; skipping");
                    stats.skipped += 1;
                    continue;
                }
            },
            None => None,
        };

        match manager.index_expression(&expr.root, &expr.url, document) {
            Ok(count) => {
                stats.exprs += 1;
                stats.subexpressions += count;
            }
            Err(IndexError::Encoding(err)) => {
                warn!(url = %expr.url, error = %err, "skipping expression");
                stats.skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }

    debug!(?stats, "harvest loaded");
    Ok(stats)
}
