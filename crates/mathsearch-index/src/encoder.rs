//! Expression encoder: `ExpressionNode` tree → prefix-order tokens.
//!
//! Two entry points share one walk:
//!
//! - [`HarvestEncoder`] interns every symbol and rejects qvars,
//! - [`QueryEncoder`] only looks symbols up and turns qvars into wildcards.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mathsearch_cmml::ExpressionNode;

use crate::dictionary::{MeaningDictionary, MeaningLookup};
use crate::token::{EncodedExpression, MeaningId, QueryToken, QvarInfo, QvarSlot, Token};

/// Options that change how formulas are encoded. Index and queries must
/// agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingOptions {
    /// Replace variable names by their first-occurrence number, so
    /// alpha-equivalent formulas share one leaf.
    pub rename_ci: bool,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self { rename_ci: true }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("malformed expression at {xpath}: {reason}")]
    Malformed { xpath: String, reason: String },
    #[error("query variable `{name}` at {xpath} is not allowed in indexed formulas")]
    QvarInHarvest { name: String, xpath: String },
}

// ============================================================================
// Encoders
// ============================================================================

/// Indexing-side encoder: interns symbols into the dictionary.
pub struct HarvestEncoder<'a> {
    dictionary: &'a MeaningDictionary,
    options: IndexingOptions,
}

impl<'a> HarvestEncoder<'a> {
    pub fn new(dictionary: &'a MeaningDictionary, options: IndexingOptions) -> Self {
        Self {
            dictionary,
            options,
        }
    }

    /// Encode `node`, interning its symbols only once the whole tree has
    /// been accepted. A rejected expression leaves the dictionary untouched.
    pub fn encode(&self, node: &ExpressionNode) -> Result<EncodedExpression, EncodingError> {
        let mut pending: Vec<String> = Vec::new();
        let mut out = encode_tree(node, self.options, false, |symbol| {
            pending.push(symbol.to_string());
            Ok(PENDING_MEANING)
        })?;

        // Symbols were resolved in token order, skipping renamed variables.
        let mut symbols = pending.iter();
        for token in out.tokens.iter_mut() {
            let QueryToken::Exact(token) = token else {
                continue;
            };
            if token.variable && self.options.rename_ci {
                continue;
            }
            if let Some(symbol) = symbols.next() {
                token.meaning = self.dictionary.put(symbol);
            }
        }
        Ok(out)
    }
}

const PENDING_MEANING: MeaningId = MeaningId::new(u32::MAX);

/// Query-side encoder: symbols must already be known.
pub struct QueryEncoder<'a> {
    dictionary: &'a dyn MeaningLookup,
    options: IndexingOptions,
}

impl<'a> QueryEncoder<'a> {
    pub fn new(dictionary: &'a dyn MeaningLookup, options: IndexingOptions) -> Self {
        Self {
            dictionary,
            options,
        }
    }

    pub fn encode(&self, node: &ExpressionNode) -> Result<EncodedExpression, EncodingError> {
        encode_tree(node, self.options, true, |symbol| {
            self.dictionary
                .meaning_of(symbol)
                .ok_or_else(|| EncodingError::UnknownSymbol(symbol.to_string()))
        })
    }
}

fn encode_tree<F>(
    root: &ExpressionNode,
    options: IndexingOptions,
    allow_qvars: bool,
    mut resolve: F,
) -> Result<EncodedExpression, EncodingError>
where
    F: FnMut(&str) -> Result<MeaningId, EncodingError>,
{
    let mut out = EncodedExpression::default();
    let mut renamed: AHashMap<&str, MeaningId> = AHashMap::new();
    let mut named_slots: AHashMap<&str, QvarSlot> = AHashMap::new();

    // Children are pushed in reverse so they pop in document order.
    let mut stack: Vec<&ExpressionNode> = vec![root];
    while let Some(node) = stack.pop() {
        if node.tag.is_empty() {
            return Err(EncodingError::Malformed {
                xpath: node.xpath.clone(),
                reason: "empty tag".to_string(),
            });
        }

        if node.is_qvar() {
            if !allow_qvars {
                return Err(EncodingError::QvarInHarvest {
                    name: node.text.clone(),
                    xpath: node.xpath.clone(),
                });
            }
            if !node.children.is_empty() {
                return Err(EncodingError::Malformed {
                    xpath: node.xpath.clone(),
                    reason: "query variable with children".to_string(),
                });
            }
            let slot = if node.text.is_empty() {
                push_qvar(&mut out, node)
            } else if let Some(slot) = named_slots.get(node.text.as_str()) {
                *slot
            } else {
                let slot = push_qvar(&mut out, node);
                named_slots.insert(node.text.as_str(), slot);
                slot
            };
            out.tokens.push(QueryToken::Wildcard(slot));
            continue;
        }

        let arity = u32::try_from(node.children.len()).map_err(|_| EncodingError::Malformed {
            xpath: node.xpath.clone(),
            reason: "too many children".to_string(),
        })?;

        let token = if node.is_variable() && options.rename_ci {
            let next = MeaningId::new(renamed.len() as u32);
            let meaning = *renamed.entry(node.text.as_str()).or_insert(next);
            Token {
                arity,
                meaning,
                variable: true,
            }
        } else {
            Token {
                arity,
                meaning: resolve(&node.symbol())?,
                variable: node.is_variable(),
            }
        };
        out.tokens.push(QueryToken::Exact(token));
        stack.extend(node.children.iter().rev());
    }

    Ok(out)
}

fn push_qvar(out: &mut EncodedExpression, node: &ExpressionNode) -> QvarSlot {
    let slot = QvarSlot(out.qvars.len() as u32);
    out.qvars.push(QvarInfo {
        name: node.text.clone(),
        xpath: node.xpath.clone(),
    });
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plus(a: ExpressionNode, b: ExpressionNode) -> ExpressionNode {
        ExpressionNode::apply("plus", vec![a, b]).rooted()
    }

    #[test]
    fn prefix_order_with_arities() {
        let dict = MeaningDictionary::new();
        let enc = HarvestEncoder::new(&dict, IndexingOptions { rename_ci: false });
        let expr = enc
            .encode(&plus(ExpressionNode::ci("x"), ExpressionNode::cn("1")))
            .unwrap();
        let arities: Vec<u32> = expr
            .tokens
            .iter()
            .map(|t| t.as_exact().unwrap().arity)
            .collect();
        assert_eq!(arities, vec![3, 0, 0, 0]);
        assert!(expr.is_well_formed());
        assert_eq!(dict.len(), 4);
    }

    #[test]
    fn renaming_makes_alpha_equivalent_formulas_equal() {
        let dict = MeaningDictionary::new();
        let on = HarvestEncoder::new(&dict, IndexingOptions { rename_ci: true });
        let off = HarvestEncoder::new(&dict, IndexingOptions { rename_ci: false });
        let xy = plus(ExpressionNode::ci("x"), ExpressionNode::ci("y"));
        let ab = plus(ExpressionNode::ci("a"), ExpressionNode::ci("b"));
        let xx = plus(ExpressionNode::ci("x"), ExpressionNode::ci("x"));

        assert_eq!(on.encode(&xy).unwrap(), on.encode(&ab).unwrap());
        assert_ne!(on.encode(&xy).unwrap(), on.encode(&xx).unwrap());
        assert_ne!(off.encode(&xy).unwrap(), off.encode(&ab).unwrap());
    }

    #[test]
    fn harvest_encoder_rejects_qvars() {
        let dict = MeaningDictionary::new();
        let enc = HarvestEncoder::new(&dict, IndexingOptions::default());
        let err = enc
            .encode(&plus(ExpressionNode::qvar("a"), ExpressionNode::cn("1")))
            .unwrap_err();
        assert!(matches!(err, EncodingError::QvarInHarvest { .. }));
    }

    #[test]
    fn rejected_harvest_expression_interns_nothing() {
        let dict = MeaningDictionary::new();
        let enc = HarvestEncoder::new(&dict, IndexingOptions::default());
        let tainted = plus(
            ExpressionNode::apply("sin", vec![ExpressionNode::cn("42")]),
            ExpressionNode::qvar("a"),
        );
        assert!(enc.encode(&tainted).is_err());
        assert!(dict.is_empty());

        let query = QueryEncoder::new(&dict, IndexingOptions::default());
        assert!(matches!(
            query.encode(&ExpressionNode::cn("42").rooted()),
            Err(EncodingError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn deferred_interning_matches_symbol_order() {
        let dict = MeaningDictionary::new();
        let enc = HarvestEncoder::new(&dict, IndexingOptions::default());
        let expr = enc
            .encode(&plus(ExpressionNode::ci("x"), ExpressionNode::cn("1")))
            .unwrap();
        let meanings: Vec<Option<MeaningId>> = ["apply#", "plus#", "cn#1"]
            .iter()
            .map(|s| dict.get(s))
            .collect();
        assert_eq!(
            meanings,
            vec![
                Some(MeaningId::new(0)),
                Some(MeaningId::new(1)),
                Some(MeaningId::new(2))
            ]
        );
        let tokens: Vec<Token> = expr.tokens.iter().filter_map(QueryToken::as_exact).collect();
        assert_eq!(tokens[0].meaning, MeaningId::new(0));
        assert_eq!(tokens[1].meaning, MeaningId::new(1));
        assert!(tokens[2].variable);
        assert_eq!(tokens[3].meaning, MeaningId::new(2));
    }

    #[test]
    fn query_encoder_shares_named_slots() {
        let dict = MeaningDictionary::new();
        HarvestEncoder::new(&dict, IndexingOptions::default())
            .encode(&plus(ExpressionNode::cn("1"), ExpressionNode::cn("1")))
            .unwrap();
        let enc = QueryEncoder::new(&dict, IndexingOptions::default());
        let expr = enc
            .encode(&plus(ExpressionNode::qvar("a"), ExpressionNode::qvar("a")))
            .unwrap();
        assert_eq!(expr.qvars.len(), 1);
        assert_eq!(expr.qvars[0].xpath, "/*[2]");
        assert_eq!(expr.tokens[2], expr.tokens[3]);

        let anonymous = enc
            .encode(&plus(ExpressionNode::qvar(""), ExpressionNode::qvar("")))
            .unwrap();
        assert_eq!(anonymous.qvars.len(), 2);
    }

    #[test]
    fn query_encoder_reports_unknown_symbols() {
        let dict = MeaningDictionary::new();
        let enc = QueryEncoder::new(&dict, IndexingOptions::default());
        let err = enc.encode(&ExpressionNode::cn("7").rooted()).unwrap_err();
        assert_eq!(err, EncodingError::UnknownSymbol("cn#7".to_string()));
        assert!(dict.is_empty());
    }

    #[test]
    fn qvar_with_children_is_malformed() {
        let dict = MeaningDictionary::new();
        let enc = QueryEncoder::new(&dict, IndexingOptions::default());
        let bad = ExpressionNode::with_children("mws:qvar", vec![ExpressionNode::cn("1")]).rooted();
        assert!(matches!(
            enc.encode(&bad).unwrap_err(),
            EncodingError::Malformed { .. }
        ));
    }
}
