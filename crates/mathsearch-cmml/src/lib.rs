//! Content MathML expression trees for MathSearch.
//!
//! This crate defines the in-memory form of a harvested formula
//! ([`ExpressionNode`]) and the parsers for the three XML surfaces the
//! search engine consumes:
//!
//! - bare Content MathML fragments (`parse_expression`),
//! - harvests: `<mws:harvest>` files produced by the crawler (`parse_harvest`),
//! - queries: `<mws:query>` requests sent by the front end (`parse_query`).
//!
//! Parsing never recurses on document depth; deeply nested formulas are
//! built with an explicit stack.

pub mod harvest;
pub mod parser;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use harvest::{
    parse_harvest, parse_query, Harvest, HarvestData, HarvestExpr, QueryRequest,
    DEFAULT_ANSWER_SIZE,
};
pub use parser::parse_expression;

/// Tag used for query variables (wildcards).
pub const QVAR_TAG: &str = "mws:qvar";

/// Tag used for content identifiers (variables).
pub const CI_TAG: &str = "ci";

// ============================================================================
// Expression trees
// ============================================================================

/// One node of a parsed Content MathML tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionNode {
    /// Element name (`apply`, `ci`, `cn`, `plus`, `mws:qvar`, ...).
    pub tag: String,
    /// Trimmed text content (identifier name, number, qvar name).
    pub text: String,
    pub children: Vec<ExpressionNode>,
    /// Location of this node inside its formula, e.g. `/*[2]/*[1]`.
    pub xpath: String,
    /// Harvest-level identifier of the formula (only set on roots).
    #[serde(default)]
    pub xml_id: Option<String>,
}

impl ExpressionNode {
    /// A leaf node. Xpaths are assigned by [`ExpressionNode::assign_xpaths`].
    pub fn leaf(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: text.to_string(),
            children: Vec::new(),
            xpath: String::new(),
            xml_id: None,
        }
    }

    pub fn with_children(tag: &str, children: Vec<ExpressionNode>) -> Self {
        Self {
            tag: tag.to_string(),
            text: String::new(),
            children,
            xpath: String::new(),
            xml_id: None,
        }
    }

    /// `<apply><op/> args... </apply>`
    pub fn apply(op: &str, args: Vec<ExpressionNode>) -> Self {
        let mut children = Vec::with_capacity(args.len() + 1);
        children.push(Self::leaf(op, ""));
        children.extend(args);
        Self::with_children("apply", children)
    }

    pub fn ci(name: &str) -> Self {
        Self::leaf(CI_TAG, name)
    }

    pub fn cn(value: &str) -> Self {
        Self::leaf("cn", value)
    }

    pub fn qvar(name: &str) -> Self {
        Self::leaf(QVAR_TAG, name)
    }

    /// Identity of this node for the meaning dictionary.
    pub fn symbol(&self) -> String {
        format!("{}#{}", self.tag, self.text)
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }

    /// Whether this node is a variable occurrence (`ci`).
    pub fn is_variable(&self) -> bool {
        self.tag == CI_TAG
    }

    pub fn is_qvar(&self) -> bool {
        self.tag == QVAR_TAG
    }

    /// Number of nodes in this tree, root included.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Whether the tree contains at least one qvar.
    pub fn has_qvars(&self) -> bool {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_qvar() {
                return true;
            }
            stack.extend(node.children.iter());
        }
        false
    }

    /// Recompute every xpath, treating `self` as the formula root.
    pub fn assign_xpaths(&mut self) {
        self.xpath = "/".to_string();
        let mut stack: Vec<&mut ExpressionNode> = vec![self];
        while let Some(node) = stack.pop() {
            let parent = node.xpath.clone();
            for (i, child) in node.children.iter_mut().enumerate() {
                child.xpath = child_xpath(&parent, i);
                stack.push(child);
            }
        }
    }

    /// Builder-style variant of [`ExpressionNode::assign_xpaths`].
    pub fn rooted(mut self) -> Self {
        self.assign_xpaths();
        self
    }

    pub fn with_xml_id(mut self, xml_id: &str) -> Self {
        self.xml_id = Some(xml_id.to_string());
        self
    }
}

pub(crate) fn child_xpath(parent: &str, index: usize) -> String {
    if parent == "/" {
        format!("/*[{}]", index + 1)
    } else {
        format!("{}/*[{}]", parent, index + 1)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CmmlError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("unexpected end of input inside <{0}>")]
    UnexpectedEnd(String),
    #[error("<{0}> has no content element")]
    Empty(String),
    #[error("<{element}> is missing attribute `{attribute}`")]
    MissingAttribute { element: String, attribute: String },
    #[error("<{element}> attribute `{attribute}` has invalid value `{value}`")]
    BadAttribute {
        element: String,
        attribute: String,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpaths_follow_child_positions() {
        let expr = ExpressionNode::apply("plus", vec![ExpressionNode::ci("x"), ExpressionNode::cn("1")])
            .rooted();
        assert_eq!(expr.xpath, "/");
        assert_eq!(expr.children[0].xpath, "/*[1]");
        assert_eq!(expr.children[2].xpath, "/*[3]");

        let nested = ExpressionNode::apply("minus", vec![expr]).rooted();
        assert_eq!(nested.children[1].children[1].xpath, "/*[2]/*[2]");
    }

    #[test]
    fn symbol_joins_tag_and_text() {
        assert_eq!(ExpressionNode::ci("x").symbol(), "ci#x");
        assert_eq!(ExpressionNode::leaf("plus", "").symbol(), "plus#");
    }

    #[test]
    fn size_and_qvar_detection() {
        let expr = ExpressionNode::apply("plus", vec![ExpressionNode::qvar("a"), ExpressionNode::cn("1")]);
        assert_eq!(expr.size(), 4);
        assert!(expr.has_qvars());
        assert!(!ExpressionNode::cn("1").has_qvars());
    }
}
