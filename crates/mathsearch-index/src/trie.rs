//! Substitution trie.
//!
//! Every indexed formula is a path of tokens from the root; the node at the
//! end of the path carries the formula's leaf. Because prefix-order arity
//! encodings are prefix-free, a leaf never has children that continue the
//! same formula, and common prefixes are shared across the whole corpus.
//!
//! Nodes live in an arena addressed by [`NodeId`]; leaves live in a second
//! arena addressed by [`FormulaId`]. Both ids are stable for the lifetime of
//! the index and across snapshots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::{ImageError, NodeImage, TrieImage};
use crate::token::{EncodedExpression, QueryToken, Token};

/// Stable identifier of an indexed formula (one per leaf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FormulaId(u32);

impl FormulaId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrieError {
    #[error("cannot insert an expression containing query variables")]
    WildcardInsert,
    #[error("cannot insert an empty expression")]
    Empty,
    #[error("trie is full")]
    Exhausted,
}

#[derive(Debug, Default)]
pub(crate) struct TrieNode {
    pub(crate) children: BTreeMap<Token, NodeId>,
    pub(crate) leaf: Option<FormulaId>,
}

#[derive(Debug)]
pub struct Leaf {
    pub formula_id: FormulaId,
    hits: AtomicU64,
}

impl Leaf {
    fn new(formula_id: FormulaId, hits: u64) -> Self {
        Self {
            formula_id,
            hits: AtomicU64::new(hits),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }
}

/// What a traversal hands to its visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRef {
    pub formula_id: FormulaId,
    pub hits: u64,
}

/// Visitor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraversalOutcome {
    pub leaves_visited: u64,
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub formula_id: FormulaId,
    /// Whether this insertion allocated the leaf.
    pub created: bool,
}

// ============================================================================
// Trie
// ============================================================================

#[derive(Debug)]
pub struct SubstitutionTrie {
    nodes: Vec<TrieNode>,
    leaves: Vec<Leaf>,
}

impl SubstitutionTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            leaves: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaf(&self, id: FormulaId) -> Option<&Leaf> {
        self.leaves.get(id.raw() as usize)
    }

    pub fn hits(&self, id: FormulaId) -> Option<u64> {
        self.leaf(id).map(Leaf::hits)
    }

    /// Atomically add one hit. Only needs shared access.
    pub fn bump_hits(&self, id: FormulaId) -> Option<u64> {
        self.leaf(id)
            .map(|leaf| leaf.hits.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Sum of all hit counts.
    pub fn total_hits(&self) -> u64 {
        self.leaves.iter().map(Leaf::hits).sum()
    }

    /// Exact lookup of a wildcard-free expression.
    pub fn find(&self, expr: &EncodedExpression) -> Option<FormulaId> {
        let mut node = NodeId::ROOT;
        for token in &expr.tokens {
            let token = token.as_exact()?;
            node = *self.nodes[node.index()].children.get(&token)?;
        }
        self.nodes[node.index()].leaf
    }

    /// Insert a wildcard-free expression, extending the path as needed.
    ///
    /// Idempotent: inserting a present sequence returns its leaf and creates
    /// no nodes.
    pub fn insert(&mut self, expr: &EncodedExpression) -> Result<InsertOutcome, TrieError> {
        if expr.is_empty() {
            return Err(TrieError::Empty);
        }
        if expr.has_wildcards() {
            return Err(TrieError::WildcardInsert);
        }

        let mut node = NodeId::ROOT;
        for token in expr.tokens.iter().filter_map(QueryToken::as_exact) {
            node = match self.nodes[node.index()].children.get(&token) {
                Some(child) => *child,
                None => {
                    let child = NodeId(
                        u32::try_from(self.nodes.len()).map_err(|_| TrieError::Exhausted)?,
                    );
                    self.nodes.push(TrieNode::default());
                    self.nodes[node.index()].children.insert(token, child);
                    child
                }
            };
        }

        if let Some(formula_id) = self.nodes[node.index()].leaf {
            return Ok(InsertOutcome {
                formula_id,
                created: false,
            });
        }
        let formula_id =
            FormulaId(u32::try_from(self.leaves.len()).map_err(|_| TrieError::Exhausted)?);
        self.leaves.push(Leaf::new(formula_id, 0));
        self.nodes[node.index()].leaf = Some(formula_id);
        Ok(InsertOutcome {
            formula_id,
            created: true,
        })
    }

    /// Depth-first search for every leaf that unifies with `expr`.
    ///
    /// Exact tokens follow the matching child. A wildcard consumes one
    /// complete subtree (as delimited by the arity counts) and binds it to
    /// its slot; later occurrences of the same slot must repeat the bound
    /// tokens. Children are explored in token order, so the sequence of
    /// visited leaves is deterministic.
    pub fn traverse_matching<F>(&self, expr: &EncodedExpression, mut visit: F) -> TraversalOutcome
    where
        F: FnMut(&LeafRef) -> Visit,
    {
        let mut outcome = TraversalOutcome::default();
        if expr.is_empty() {
            return outcome;
        }

        let mut stack = vec![Frame::Match {
            node: NodeId::ROOT,
            pos: 0,
            bindings: Bindings::with_slots(expr.qvars.len()),
        }];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Match {
                    node,
                    pos,
                    bindings,
                } => {
                    let Some(token) = expr.tokens.get(pos) else {
                        if let Some(formula_id) = self.nodes[node.index()].leaf {
                            let leaf = LeafRef {
                                formula_id,
                                hits: self.leaves[formula_id.raw() as usize].hits(),
                            };
                            outcome.leaves_visited += 1;
                            if visit(&leaf) == Visit::Stop {
                                outcome.stopped = true;
                                break;
                            }
                        }
                        continue;
                    };
                    match token {
                        QueryToken::Exact(t) => {
                            if let Some(child) = self.nodes[node.index()].children.get(t) {
                                stack.push(Frame::Match {
                                    node: *child,
                                    pos: pos + 1,
                                    bindings,
                                });
                            }
                        }
                        QueryToken::Wildcard(slot) => {
                            let bound = bindings
                                .get(slot.index())
                                .map(|tokens| self.follow(node, tokens));
                            match bound {
                                Some(Some(end)) => stack.push(Frame::Match {
                                    node: end,
                                    pos: pos + 1,
                                    bindings,
                                }),
                                // Bound, but the same subtree does not continue here.
                                Some(None) => {}
                                None => stack.push(Frame::Skip {
                                    node,
                                    pos,
                                    open: 1,
                                    consumed: Vec::new(),
                                    bindings,
                                }),
                            }
                        }
                    }
                }
                Frame::Skip {
                    node,
                    pos,
                    open,
                    consumed,
                    mut bindings,
                } => {
                    if open == 0 {
                        if let Some(QueryToken::Wildcard(slot)) = expr.tokens.get(pos) {
                            bindings.bind(slot.index(), consumed);
                        }
                        stack.push(Frame::Match {
                            node,
                            pos: pos + 1,
                            bindings,
                        });
                        continue;
                    }
                    for (token, child) in self.nodes[node.index()].children.iter().rev() {
                        let mut consumed = consumed.clone();
                        consumed.push(*token);
                        stack.push(Frame::Skip {
                            node: *child,
                            pos,
                            open: open - 1 + u64::from(token.arity),
                            consumed,
                            bindings: bindings.clone(),
                        });
                    }
                }
            }
        }

        outcome
    }

    fn follow(&self, mut node: NodeId, tokens: &[Token]) -> Option<NodeId> {
        for token in tokens {
            node = *self.nodes[node.index()].children.get(token)?;
        }
        Some(node)
    }

    // ========================================================================
    // Images
    // ========================================================================

    pub fn snapshot(&self) -> TrieImage {
        TrieImage {
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeImage {
                    children: n.children.iter().map(|(t, c)| (*t, c.raw())).collect(),
                    leaf: n.leaf.map(FormulaId::raw),
                })
                .collect(),
            hits: self.leaves.iter().map(Leaf::hits).collect(),
        }
    }

    /// Rebuild a trie from an image, checking that every reference is in
    /// range and that each leaf is reachable from exactly one node.
    pub fn load(image: TrieImage) -> Result<Self, ImageError> {
        if image.nodes.is_empty() {
            return Err(ImageError::Inconsistent("image has no root".to_string()));
        }
        let node_count = image.nodes.len();
        let mut owner: Vec<bool> = vec![false; image.hits.len()];
        let mut nodes = Vec::with_capacity(node_count);

        for (index, node) in image.nodes.into_iter().enumerate() {
            let mut children = BTreeMap::new();
            for (token, child) in node.children {
                if child as usize >= node_count || child == 0 {
                    return Err(ImageError::Inconsistent(format!(
                        "node {index} points at invalid child {child}"
                    )));
                }
                children.insert(token, NodeId(child));
            }
            let leaf = match node.leaf {
                Some(raw) => {
                    let Some(slot) = owner.get_mut(raw as usize) else {
                        return Err(ImageError::Inconsistent(format!(
                            "node {index} points at missing leaf {raw}"
                        )));
                    };
                    if std::mem::replace(slot, true) {
                        return Err(ImageError::Inconsistent(format!(
                            "leaf {raw} is owned by more than one node"
                        )));
                    }
                    Some(FormulaId(raw))
                }
                None => None,
            };
            nodes.push(TrieNode { children, leaf });
        }
        if let Some(orphan) = owner.iter().position(|owned| !owned) {
            return Err(ImageError::Inconsistent(format!(
                "leaf {orphan} is not attached to any node"
            )));
        }
        check_tree_shape(&nodes)?;

        let leaves = image
            .hits
            .into_iter()
            .enumerate()
            .map(|(i, hits)| Leaf::new(FormulaId(i as u32), hits))
            .collect();
        Ok(Self { nodes, leaves })
    }
}

/// Every node but the root has exactly one parent, and every node is
/// reachable from the root. Together these rule out cycles.
fn check_tree_shape(nodes: &[TrieNode]) -> Result<(), ImageError> {
    let mut parents = vec![0u32; nodes.len()];
    for node in nodes {
        for child in node.children.values() {
            parents[child.index()] += 1;
        }
    }
    if let Some((index, count)) = parents
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, count)| **count != 1)
    {
        return Err(ImageError::Inconsistent(format!(
            "node {index} has {count} parents"
        )));
    }

    let mut reached = 0usize;
    let mut stack = vec![NodeId::ROOT];
    while let Some(node) = stack.pop() {
        reached += 1;
        stack.extend(nodes[node.index()].children.values().copied());
    }
    if reached != nodes.len() {
        return Err(ImageError::Inconsistent(format!(
            "{} nodes are not reachable from the root",
            nodes.len() - reached
        )));
    }
    Ok(())
}

impl Default for SubstitutionTrie {
    fn default() -> Self {
        Self::new()
    }
}

enum Frame {
    Match {
        node: NodeId,
        pos: usize,
        bindings: Bindings,
    },
    /// Inside a wildcard: `open` subtrees still need to be consumed.
    Skip {
        node: NodeId,
        pos: usize,
        open: u64,
        consumed: Vec<Token>,
        bindings: Bindings,
    },
}

#[derive(Clone, Default)]
struct Bindings(Vec<Option<Vec<Token>>>);

impl Bindings {
    fn with_slots(slots: usize) -> Self {
        Self(vec![None; slots])
    }

    fn get(&self, slot: usize) -> Option<&[Token]> {
        self.0.get(slot).and_then(|b| b.as_deref())
    }

    fn bind(&mut self, slot: usize, tokens: Vec<Token>) {
        if slot >= self.0.len() {
            self.0.resize(slot + 1, None);
        }
        self.0[slot] = Some(tokens);
    }
}

// ============================================================================
// Shared index
// ============================================================================

/// The trie shared between indexing and queries.
///
/// Insertions take the write lock for one insertion only; traversals and
/// hit-count updates take the read lock.
#[derive(Debug, Default)]
pub struct FormulaIndex {
    trie: RwLock<SubstitutionTrie>,
}

impl FormulaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trie(trie: SubstitutionTrie) -> Self {
        Self {
            trie: RwLock::new(trie),
        }
    }

    pub fn insert(&self, expr: &EncodedExpression) -> Result<InsertOutcome, TrieError> {
        self.trie.write().insert(expr)
    }

    pub fn bump_hits(&self, id: FormulaId) -> Option<u64> {
        self.trie.read().bump_hits(id)
    }

    pub fn hits(&self, id: FormulaId) -> Option<u64> {
        self.trie.read().hits(id)
    }

    pub fn find(&self, expr: &EncodedExpression) -> Option<FormulaId> {
        self.trie.read().find(expr)
    }

    pub fn traverse_matching<F>(&self, expr: &EncodedExpression, visit: F) -> TraversalOutcome
    where
        F: FnMut(&LeafRef) -> Visit,
    {
        self.trie.read().traverse_matching(expr, visit)
    }

    /// Shared access for callers that need several reads under one lock.
    pub fn read(&self) -> RwLockReadGuard<'_, SubstitutionTrie> {
        self.trie.read()
    }

    pub fn node_count(&self) -> usize {
        self.trie.read().node_count()
    }

    pub fn leaf_count(&self) -> usize {
        self.trie.read().leaf_count()
    }

    pub fn snapshot(&self) -> TrieImage {
        self.trie.read().snapshot()
    }

    /// Swap in a freshly loaded trie.
    pub fn replace(&self, trie: SubstitutionTrie) {
        *self.trie.write() = trie;
    }
}
