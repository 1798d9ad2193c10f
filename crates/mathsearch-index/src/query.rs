//! Query engine.
//!
//! A query is encoded (qvars become wildcards), matched against the trie,
//! and the matching leaves are resolved to answers through the formula and
//! crawl stores. Answers are paged over *occurrences*: the window skips the
//! first `start` occurrences across all matching leaves, in traversal order.
//!
//! `total` is the sum of the hit counts of every leaf visited. It is exact
//! when the traversal runs to completion (`complete == true`); after an early
//! stop (see [`ResultWindow::total_requested`]) or a cancellation it covers
//! the leaves visited before the stop. Both engines follow this rule, so they
//! return the same `total` and `answers` for the same input.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use mathsearch_cmml::ExpressionNode;

use crate::dictionary::MeaningLookup;
use crate::encoder::{EncodingError, IndexingOptions, QueryEncoder};
use crate::store::{CrawlData, CrawlStore, DocumentId, FormulaStore, Occurrence, StoreError};
use crate::token::{EncodedExpression, QvarInfo};
use crate::trie::{FormulaId, FormulaIndex, LeafRef, Visit};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Query surface
// ============================================================================

/// Which part of the match list to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultWindow {
    /// Occurrences to skip.
    pub start: u64,
    /// Maximum number of answers.
    pub max_size: u64,
    /// `None`: count every match. `Some(n)`: once the window is full, stop
    /// as soon as `total >= n`.
    pub total_requested: Option<u64>,
}

impl ResultWindow {
    /// Validate raw (possibly negative) request values.
    pub fn new(
        start: i64,
        max_size: i64,
        total_requested: Option<i64>,
    ) -> Result<Self, QueryError> {
        let start = u64::try_from(start)
            .map_err(|_| QueryError::InvalidArgument(format!("negative window start {start}")))?;
        let max_size = u64::try_from(max_size).map_err(|_| {
            QueryError::InvalidArgument(format!("negative window size {max_size}"))
        })?;
        let total_requested = total_requested
            .map(|n| {
                u64::try_from(n).map_err(|_| {
                    QueryError::InvalidArgument(format!("negative requested total {n}"))
                })
            })
            .transpose()?;
        let window = Self {
            start,
            max_size,
            total_requested,
        };
        window.validate()?;
        Ok(window)
    }

    /// The whole match list.
    pub fn all() -> Self {
        Self {
            start: 0,
            max_size: u64::MAX >> 1,
            total_requested: None,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.start.checked_add(self.max_size).is_none() {
            return Err(QueryError::InvalidArgument(format!(
                "window {}+{} overflows",
                self.start, self.max_size
            )));
        }
        Ok(())
    }
}

/// Cooperative cancellation, checked between leaf visits.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryExpression {
    Raw(ExpressionNode),
    Encoded(EncodedExpression),
}

#[derive(Debug, Clone)]
pub struct Query {
    pub expression: QueryExpression,
    pub window: ResultWindow,
    pub cancel: Option<CancelFlag>,
}

impl Query {
    pub fn new(expression: ExpressionNode, window: ResultWindow) -> Self {
        Self {
            expression: QueryExpression::Raw(expression),
            window,
            cancel: None,
        }
    }

    pub fn encoded(expression: EncodedExpression, window: ResultWindow) -> Self {
        Self {
            expression: QueryExpression::Encoded(expression),
            window,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub formula: FormulaId,
    pub document: Option<DocumentId>,
    /// URL of the crawled document, if the occurrence belongs to one.
    pub url: Option<String>,
    /// Crawled payload of the document.
    pub data: Option<String>,
    pub xml_id: String,
    pub xpath: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnswerSet {
    pub total: u64,
    pub answers: Vec<Answer>,
    pub qvars: Vec<QvarInfo>,
    /// `false` if the traversal stopped before visiting every match.
    pub complete: bool,
}

// ============================================================================
// Engines
// ============================================================================

/// Everything an engine reads.
pub struct QueryContext<'a> {
    pub index: &'a FormulaIndex,
    pub dictionary: &'a dyn MeaningLookup,
    pub formulas: &'a dyn FormulaStore,
    pub crawl: &'a dyn CrawlStore,
    pub options: IndexingOptions,
}

/// Result of running an engine over an encoded query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchRun {
    pub total: u64,
    pub answers: Vec<Answer>,
    pub leaves: u64,
    pub complete: bool,
}

pub trait MatchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        ctx: &QueryContext<'_>,
        expr: &EncodedExpression,
        window: &ResultWindow,
        cancel: Option<&CancelFlag>,
    ) -> Result<MatchRun, QueryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Resolve answers inside the traversal callback.
    Streaming,
    /// Collect matching leaves first, resolve after releasing the trie.
    #[default]
    Batch,
}

impl EngineKind {
    pub fn engine(self) -> &'static dyn MatchEngine {
        match self {
            EngineKind::Streaming => &StreamingEngine,
            EngineKind::Batch => &BatchEngine,
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "streaming" => Ok(EngineKind::Streaming),
            "batch" => Ok(EngineKind::Batch),
            other => Err(format!("unknown engine `{other}` (expected streaming or batch)")),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EngineKind::Streaming => "streaming",
            EngineKind::Batch => "batch",
        })
    }
}

/// Accumulates totals and the answer window, one leaf at a time.
struct Collector<'c, 'a> {
    ctx: &'c QueryContext<'a>,
    window: ResultWindow,
    total: u64,
    leaves: u64,
    skipped: u64,
    answers: Vec<Answer>,
    documents: AHashMap<DocumentId, CrawlData>,
}

impl<'c, 'a> Collector<'c, 'a> {
    fn new(ctx: &'c QueryContext<'a>, window: ResultWindow) -> Self {
        Self {
            ctx,
            window,
            total: 0,
            leaves: 0,
            skipped: 0,
            answers: Vec::new(),
            documents: AHashMap::new(),
        }
    }

    fn window_full(&self) -> bool {
        self.answers.len() as u64 >= self.window.max_size
    }

    fn offer(&mut self, leaf: &LeafRef) -> Result<Visit, QueryError> {
        self.total = self.total.saturating_add(leaf.hits);
        self.leaves += 1;

        if !self.window_full() {
            for occurrence in self.ctx.formulas.occurrences_for(leaf.formula_id)? {
                if self.skipped < self.window.start {
                    self.skipped += 1;
                    continue;
                }
                if self.window_full() {
                    break;
                }
                let answer = self.resolve(occurrence)?;
                self.answers.push(answer);
            }
        }

        match self.window.total_requested {
            Some(requested) if self.window_full() && self.total >= requested => Ok(Visit::Stop),
            _ => Ok(Visit::Continue),
        }
    }

    fn resolve(&mut self, occurrence: Occurrence) -> Result<Answer, QueryError> {
        let crawl = match occurrence.document {
            Some(id) => match self.documents.get(&id) {
                Some(data) => Some(data.clone()),
                None => {
                    let data = self.ctx.crawl.get_document(id)?;
                    self.documents.insert(id, data.clone());
                    Some(data)
                }
            },
            None => None,
        };
        let (url, data) = match crawl {
            Some(c) => (Some(c.url), Some(c.data)),
            None => (None, None),
        };
        Ok(Answer {
            formula: occurrence.formula,
            document: occurrence.document,
            url,
            data,
            xml_id: occurrence.path.xml_id,
            xpath: occurrence.path.xpath,
        })
    }

    fn finish(self, complete: bool) -> MatchRun {
        MatchRun {
            total: self.total,
            answers: self.answers,
            leaves: self.leaves,
            complete,
        }
    }
}

fn cancelled(cancel: Option<&CancelFlag>) -> bool {
    cancel.is_some_and(CancelFlag::is_cancelled)
}

/// Resolves every leaf as soon as the traversal reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingEngine;

impl MatchEngine for StreamingEngine {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn run(
        &self,
        ctx: &QueryContext<'_>,
        expr: &EncodedExpression,
        window: &ResultWindow,
        cancel: Option<&CancelFlag>,
    ) -> Result<MatchRun, QueryError> {
        let mut collector = Collector::new(ctx, *window);
        let mut failure: Option<QueryError> = None;
        let mut was_cancelled = false;

        let outcome = ctx.index.traverse_matching(expr, |leaf| {
            if cancelled(cancel) {
                was_cancelled = true;
                return Visit::Stop;
            }
            match collector.offer(leaf) {
                Ok(visit) => visit,
                Err(err) => {
                    failure = Some(err);
                    Visit::Stop
                }
            }
        });

        if let Some(err) = failure {
            return Err(err);
        }
        if was_cancelled {
            debug!(leaves = collector.leaves, "streaming traversal cancelled");
        }
        Ok(collector.finish(!outcome.stopped))
    }
}

/// Collects all matching leaves under the read lock, then resolves them
/// without holding it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchEngine;

impl MatchEngine for BatchEngine {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn run(
        &self,
        ctx: &QueryContext<'_>,
        expr: &EncodedExpression,
        window: &ResultWindow,
        cancel: Option<&CancelFlag>,
    ) -> Result<MatchRun, QueryError> {
        let mut matched: Vec<LeafRef> = Vec::new();
        let outcome = ctx.index.traverse_matching(expr, |leaf| {
            if cancelled(cancel) {
                return Visit::Stop;
            }
            matched.push(*leaf);
            Visit::Continue
        });
        debug!(leaves = matched.len(), "batch traversal finished");
        enter(QueryState::Resolving);

        let mut collector = Collector::new(ctx, *window);
        let mut complete = !outcome.stopped;
        for leaf in &matched {
            if cancelled(cancel) {
                complete = false;
                break;
            }
            if collector.offer(leaf)? == Visit::Stop {
                complete = false;
                break;
            }
        }
        Ok(collector.finish(complete))
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Start,
    Encoding,
    Traversing,
    Resolving,
    Done,
    Failed,
}

fn enter(state: QueryState) {
    debug!(state = ?state, "query state");
}

/// Executes queries against one index with one engine.
pub struct QueryEngine<'a> {
    ctx: QueryContext<'a>,
    kind: EngineKind,
}

impl<'a> QueryEngine<'a> {
    pub fn new(ctx: QueryContext<'a>, kind: EngineKind) -> Self {
        Self { ctx, kind }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn execute(&self, query: &Query) -> Result<AnswerSet, QueryError> {
        enter(QueryState::Start);
        let result = self.execute_inner(query);
        enter(if result.is_ok() {
            QueryState::Done
        } else {
            QueryState::Failed
        });
        result
    }

    fn execute_inner(&self, query: &Query) -> Result<AnswerSet, QueryError> {
        query.window.validate()?;

        enter(QueryState::Encoding);
        let encoded;
        let expr = match &query.expression {
            QueryExpression::Raw(node) => {
                encoded = QueryEncoder::new(self.ctx.dictionary, self.ctx.options).encode(node)?;
                &encoded
            }
            QueryExpression::Encoded(expr) => {
                if !expr.is_well_formed() {
                    return Err(QueryError::Encoding(EncodingError::Malformed {
                        xpath: "/".to_string(),
                        reason: "token arities do not describe one tree".to_string(),
                    }));
                }
                expr
            }
        };

        enter(QueryState::Traversing);
        let run = self
            .kind
            .engine()
            .run(&self.ctx, expr, &query.window, query.cancel.as_ref())?;
        debug!(
            engine = self.kind.engine().name(),
            total = run.total,
            answers = run.answers.len(),
            leaves = run.leaves,
            complete = run.complete,
            "query finished"
        );

        Ok(AnswerSet {
            total: run.total,
            answers: run.answers,
            qvars: expr.qvars.clone(),
            complete: run.complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::MeaningDictionary;
    use crate::manager::IndexManager;
    use crate::store::{MemoryCrawlStore, MemoryFormulaStore};

    struct World {
        index: FormulaIndex,
        dictionary: MeaningDictionary,
        formulas: MemoryFormulaStore,
        crawl: MemoryCrawlStore,
    }

    impl World {
        fn new() -> Self {
            Self {
                index: FormulaIndex::new(),
                dictionary: MeaningDictionary::new(),
                formulas: MemoryFormulaStore::new(),
                crawl: MemoryCrawlStore::new(),
            }
        }

        fn add(&self, url: &str, expr: ExpressionNode) {
            let manager = IndexManager::new(
                &self.index,
                &self.dictionary,
                &self.formulas,
                &self.crawl,
                IndexingOptions::default(),
            );
            let doc = manager
                .index_crawl_data(&CrawlData {
                    url: url.to_string(),
                    data: format!("<p>{url}</p>"),
                })
                .unwrap();
            manager
                .index_document(&expr.rooted().with_xml_id(&format!("{url}#f")), doc)
                .unwrap();
        }

        fn engine(&self, kind: EngineKind) -> QueryEngine<'_> {
            QueryEngine::new(
                QueryContext {
                    index: &self.index,
                    dictionary: &self.dictionary,
                    formulas: &self.formulas,
                    crawl: &self.crawl,
                    options: IndexingOptions::default(),
                },
                kind,
            )
        }
    }

    fn plus(a: ExpressionNode, b: ExpressionNode) -> ExpressionNode {
        ExpressionNode::apply("plus", vec![a, b])
    }

    fn sample() -> World {
        let world = World::new();
        for i in 0..4 {
            world.add(
                &format!("doc{i}"),
                plus(ExpressionNode::ci("x"), ExpressionNode::cn(&i.to_string())),
            );
        }
        world
    }

    fn wildcard_query(window: ResultWindow) -> Query {
        Query::new(
            plus(ExpressionNode::qvar("a"), ExpressionNode::qvar("b")).rooted(),
            window,
        )
    }

    #[test]
    fn negative_windows_are_rejected() {
        assert!(matches!(
            ResultWindow::new(-1, 10, None),
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            ResultWindow::new(0, -5, None),
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            ResultWindow::new(0, 5, Some(-2)),
            Err(QueryError::InvalidArgument(_))
        ));
        assert_eq!(ResultWindow::new(2, 3, None).unwrap().start, 2);
    }

    #[test]
    fn oversized_window_is_rejected_before_encoding() {
        let world = sample();
        let query = Query::new(
            ExpressionNode::cn("never-seen").rooted(),
            ResultWindow {
                start: u64::MAX,
                max_size: 1,
                total_requested: None,
            },
        );
        let err = world.engine(EngineKind::Batch).execute(&query).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn engines_agree_on_totals_and_answers() {
        let world = sample();
        for window in [
            ResultWindow::all(),
            ResultWindow::new(1, 2, None).unwrap(),
            ResultWindow::new(0, 1, Some(2)).unwrap(),
            ResultWindow::new(10, 5, None).unwrap(),
        ] {
            let streaming = world
                .engine(EngineKind::Streaming)
                .execute(&wildcard_query(window))
                .unwrap();
            let batch = world
                .engine(EngineKind::Batch)
                .execute(&wildcard_query(window))
                .unwrap();
            assert_eq!(streaming, batch);
        }
    }

    #[test]
    fn window_pages_through_occurrences() {
        let world = sample();
        let engine = world.engine(EngineKind::Streaming);
        let all = engine.execute(&wildcard_query(ResultWindow::all())).unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.answers.len(), 4);
        assert!(all.complete);

        let page = engine
            .execute(&wildcard_query(ResultWindow::new(3, 5, None).unwrap()))
            .unwrap();
        assert_eq!(page.answers, all.answers[3..].to_vec());
        assert_eq!(page.total, 4);
    }

    #[test]
    fn requested_total_stops_early() {
        let world = sample();
        let set = world
            .engine(EngineKind::Batch)
            .execute(&wildcard_query(ResultWindow::new(0, 1, Some(1)).unwrap()))
            .unwrap();
        assert_eq!(set.answers.len(), 1);
        assert_eq!(set.total, 1);
        assert!(!set.complete);
    }

    #[test]
    fn cancelled_query_is_incomplete() {
        let world = sample();
        let cancel = CancelFlag::new();
        cancel.cancel();
        for kind in [EngineKind::Streaming, EngineKind::Batch] {
            let set = world
                .engine(kind)
                .execute(&wildcard_query(ResultWindow::all()).with_cancel(cancel.clone()))
                .unwrap();
            assert_eq!(set.total, 0);
            assert!(set.answers.is_empty());
            assert!(!set.complete);
        }
    }

    #[test]
    fn answers_carry_document_payload_and_location() {
        let world = sample();
        let set = world
            .engine(EngineKind::Batch)
            .execute(&Query::new(
                plus(ExpressionNode::ci("y"), ExpressionNode::cn("2")).rooted(),
                ResultWindow::all(),
            ))
            .unwrap();
        assert_eq!(set.total, 1);
        let answer = &set.answers[0];
        assert_eq!(answer.url.as_deref(), Some("doc2"));
        assert_eq!(answer.data.as_deref(), Some("<p>doc2</p>"));
        assert_eq!(answer.xml_id, "doc2#f");
        assert_eq!(answer.xpath, "/");
        assert!(set.qvars.is_empty());
    }

    #[test]
    fn qvars_are_reported_with_answers() {
        let world = sample();
        let set = world
            .engine(EngineKind::Streaming)
            .execute(&wildcard_query(ResultWindow::new(0, 0, None).unwrap()))
            .unwrap();
        assert_eq!(set.total, 4);
        assert!(set.answers.is_empty());
        let names: Vec<_> = set.qvars.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn malformed_pre_encoded_query_fails() {
        let world = sample();
        let err = world
            .engine(EngineKind::Batch)
            .execute(&Query::encoded(
                EncodedExpression::default(),
                ResultWindow::all(),
            ))
            .unwrap_err();
        assert!(matches!(err, QueryError::Encoding(EncodingError::Malformed { .. })));
    }

    #[test]
    fn engine_kind_parses_from_text() {
        assert_eq!("Streaming".parse::<EngineKind>(), Ok(EngineKind::Streaming));
        assert!("fast".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::default(), EngineKind::Batch);
    }
}
