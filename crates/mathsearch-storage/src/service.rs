//! The query/indexing service the daemon layer talks to.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use mathsearch_cmml::{Harvest, QueryRequest};
use mathsearch_index::{
    AnswerSet, CrawlStore, EngineKind, FormulaIndex, FormulaStore, IndexManager,
    MeaningDictionary, Query, QueryContext, QueryEngine, QueryError, ResultWindow,
};

use crate::config::ServiceConfig;
use crate::data_dir::DataDir;
use crate::harvest::{load_harvest, HarvestStats};
use crate::log::{LogCrawlStore, LogFormulaStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub nodes: usize,
    pub formulas: usize,
    pub symbols: usize,
    pub documents: u64,
    pub occurrences: u64,
    pub total_hits: u64,
}

/// Owns the dictionary, the trie and both stores of one data directory.
///
/// `formula.log` grows with every indexed formula while the trie image is
/// only written on save; a log that references formulas the image does not
/// contain cannot be opened.
pub struct SearchService {
    config: ServiceConfig,
    data: DataDir,
    dictionary: MeaningDictionary,
    index: FormulaIndex,
    formulas: LogFormulaStore,
    crawl: LogCrawlStore,
    /// Serializes harvest loading and image writes.
    writer: Mutex<()>,
}

impl SearchService {
    pub fn open(config: ServiceConfig) -> Result<Self> {
        let data = DataDir::open(&config.data_path)?;
        let (dictionary, trie) = data.load_index()?.unwrap_or_default();
        let formulas = data.open_formula_store()?;
        let crawl = data.open_crawl_store()?;

        if let Some(max) = formulas.max_formula() {
            if max.raw() as usize >= trie.leaf_count() {
                bail!(
                    "{} references formula {} but the saved index holds {} formulas; \
                     reindex the harvests into an empty data directory",
                    data.formula_log_path().display(),
                    max.raw(),
                    trie.leaf_count()
                );
            }
        }

        info!(
            path = %data.root().display(),
            engine = %config.engine,
            rename_ci = config.indexing.rename_ci,
            documents = crawl.document_count(),
            "opened search service"
        );
        Ok(Self {
            config,
            data,
            dictionary,
            index: FormulaIndex::from_trie(trie),
            formulas,
            crawl,
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn index(&self) -> &FormulaIndex {
        &self.index
    }

    pub fn dictionary(&self) -> &MeaningDictionary {
        &self.dictionary
    }

    pub fn manager(&self) -> IndexManager<'_> {
        IndexManager::new(
            &self.index,
            &self.dictionary,
            &self.formulas,
            &self.crawl,
            self.config.indexing,
        )
    }

    /// Index a harvest and save the images, whether or not indexing
    /// finished: occurrences already appended to `formula.log` must find
    /// their formulas in the saved trie.
    pub fn index_harvest(&self, harvest: &Harvest) -> Result<HarvestStats> {
        let _writer = self.writer.lock();
        let indexed = load_harvest(&self.manager(), harvest).context("indexing harvest");
        if let Err(err) = &indexed {
            warn!(error = %format!("{err:#}"), "harvest only partly indexed; saving what was stored");
        }
        self.data.save_index(&self.dictionary, &self.index)?;
        indexed
    }

    /// Answer a parsed `<mws:query>`. Only the first expression is used.
    pub fn handle_query(&self, request: &QueryRequest) -> Result<AnswerSet, QueryError> {
        let window = ResultWindow::new(
            request.limit_min,
            request.answer_size,
            request.total_requested,
        )?;
        let Some(expr) = request.exprs.first() else {
            return Err(QueryError::InvalidArgument(
                "query has no expression".to_string(),
            ));
        };
        if request.exprs.len() > 1 {
            debug!(ignored = request.exprs.len() - 1, "extra query expressions ignored");
        }
        self.execute(Query::new(expr.clone(), window))
    }

    pub fn execute(&self, query: Query) -> Result<AnswerSet, QueryError> {
        self.execute_with(self.config.engine, query)
    }

    /// Run a query with an explicit engine. The window is capped at
    /// `max_answers`.
    pub fn execute_with(&self, engine: EngineKind, mut query: Query) -> Result<AnswerSet, QueryError> {
        if query.window.max_size > self.config.max_answers {
            debug!(
                requested = query.window.max_size,
                cap = self.config.max_answers,
                "capping answer window"
            );
            query.window.max_size = self.config.max_answers;
        }
        QueryEngine::new(
            QueryContext {
                index: &self.index,
                dictionary: &self.dictionary,
                formulas: &self.formulas,
                crawl: &self.crawl,
                options: self.config.indexing,
            },
            engine,
        )
        .execute(&query)
    }

    /// Persist the dictionary and trie images.
    pub fn save(&self) -> Result<()> {
        let _writer = self.writer.lock();
        self.data.save_index(&self.dictionary, &self.index)
    }

    pub fn stats(&self) -> ServiceStats {
        let trie = self.index.read();
        ServiceStats {
            nodes: trie.node_count(),
            formulas: trie.leaf_count(),
            symbols: self.dictionary.len(),
            documents: self.crawl.document_count(),
            occurrences: self.formulas.occurrence_count(),
            total_hits: trie.total_hits(),
        }
    }
}
