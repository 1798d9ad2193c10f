//! Linear token form of expression trees.
//!
//! An expression is flattened in prefix order; each token carries the arity
//! of its node, so the sequence alone determines the tree shape. A query may
//! additionally contain wildcards that stand for one complete subtree.

use serde::{Deserialize, Serialize};

/// Dictionary id of a symbol (`tag#text`), or the canonical number of a
/// renamed variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MeaningId(u32);

impl MeaningId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// One node of an encoded expression.
///
/// Field order matters: tokens are ordered by arity first, then meaning, so
/// trie children (and therefore query answers) come out in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token {
    pub arity: u32,
    pub meaning: MeaningId,
    /// `true` for `ci` nodes. With renaming on, `meaning` is then the
    /// first-occurrence number of the variable instead of a dictionary id.
    pub variable: bool,
}

impl Token {
    pub const fn constant(arity: u32, meaning: MeaningId) -> Self {
        Self {
            arity,
            meaning,
            variable: false,
        }
    }

    pub const fn variable(meaning: MeaningId) -> Self {
        Self {
            arity: 0,
            meaning,
            variable: true,
        }
    }
}

/// Index into [`EncodedExpression::qvars`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct QvarSlot(pub u32);

impl QvarSlot {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryToken {
    Exact(Token),
    /// Matches any complete subtree. Repeated slots must bind equal subtrees.
    Wildcard(QvarSlot),
}

impl QueryToken {
    pub fn as_exact(&self) -> Option<Token> {
        match self {
            QueryToken::Exact(t) => Some(*t),
            QueryToken::Wildcard(_) => None,
        }
    }
}

/// Name and location of a query variable, reported back with the answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QvarInfo {
    pub name: String,
    pub xpath: String,
}

/// An encoded expression: prefix-order tokens plus the qvar side table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncodedExpression {
    pub tokens: Vec<QueryToken>,
    pub qvars: Vec<QvarInfo>,
}

impl EncodedExpression {
    /// Build a wildcard-free encoding from plain tokens.
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            tokens: tokens.into_iter().map(QueryToken::Exact).collect(),
            qvars: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn has_wildcards(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, QueryToken::Wildcard(_)))
    }

    /// Whether the arity counts describe exactly one complete tree.
    pub fn is_well_formed(&self) -> bool {
        let mut open: u64 = 1;
        for token in &self.tokens {
            if open == 0 {
                return false;
            }
            open -= 1;
            if let QueryToken::Exact(t) = token {
                open += u64::from(t.arity);
            }
        }
        open == 0 && !self.tokens.is_empty()
    }
}
