//! Content MathML fragment parser.
//!
//! Builds an [`ExpressionNode`] tree from XML events with an explicit stack.
//! Presentation wrappers are normalized away:
//!
//! - `<math>` and `<semantics>` are replaced by their first content child,
//! - `<annotation>` / `<annotation-xml>` subtrees are skipped,
//! - element prefixes are dropped, except `mws:` which marks engine-level
//!   elements such as `mws:qvar`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use crate::{CmmlError, ExpressionNode, QVAR_TAG};

const WRAPPER_TAGS: [&str; 2] = ["math", "semantics"];
const SKIPPED_TAGS: [&str; 2] = ["annotation", "annotation-xml"];

/// Parse a single Content MathML fragment.
///
/// The fragment may be wrapped in `<math>` (and `<semantics>`). The returned
/// root has xpaths assigned and no `xml_id`.
pub fn parse_expression(xml: &str) -> Result<ExpressionNode, CmmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let start = e.into_owned();
                return read_content_element(&mut reader, &start);
            }
            Event::Empty(e) => {
                let mut node = node_from_start(&e)?;
                finish_leaf(&mut node, &e)?;
                return unwrap_root(node)
                    .map(ExpressionNode::rooted)
                    .ok_or_else(|| CmmlError::Empty(element_name(&e)));
            }
            Event::Eof => return Err(CmmlError::Empty("document".to_string())),
            _ => {}
        }
    }
}

/// Read the element opened by `start` (already consumed) and return the
/// normalized formula it contains, with xpaths assigned.
pub(crate) fn read_content_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<ExpressionNode, CmmlError> {
    let tree = read_tree(reader, start)?;
    let name = tree.tag.clone();
    unwrap_root(tree)
        .map(ExpressionNode::rooted)
        .ok_or(CmmlError::Empty(name))
}

/// Read the children of a container element (e.g. `mws:expr`) and return the
/// first normalized content child.
pub(crate) fn read_wrapped_expression(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<ExpressionNode, CmmlError> {
    let container = read_tree(reader, start)?;
    let name = container.tag.clone();
    container
        .children
        .into_iter()
        .next()
        .and_then(unwrap_root)
        .map(ExpressionNode::rooted)
        .ok_or(CmmlError::Empty(name))
}

/// Build the raw tree for the element opened by `start`.
fn read_tree(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<ExpressionNode, CmmlError> {
    let mut stack: Vec<ExpressionNode> = vec![node_from_start(start)?];

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = normalized_tag(e.name());
                if SKIPPED_TAGS.contains(&tag.as_str()) {
                    let end = e.to_end().into_owned();
                    reader.read_to_end(end.name())?;
                    continue;
                }
                stack.push(node_from_start(&e)?);
            }
            Event::Empty(e) => {
                let tag = normalized_tag(e.name());
                if SKIPPED_TAGS.contains(&tag.as_str()) {
                    continue;
                }
                let mut node = node_from_start(&e)?;
                finish_leaf(&mut node, &e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(t.unescape()?.trim());
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(String::from_utf8_lossy(&c.into_inner()).trim());
                }
            }
            Event::End(_) => {
                let Some(done) = stack.pop() else {
                    return Err(CmmlError::UnexpectedEnd(element_name(start)));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => return Ok(done),
                }
            }
            Event::Eof => {
                let open = stack
                    .last()
                    .map(|n| n.tag.clone())
                    .unwrap_or_else(|| element_name(start));
                return Err(CmmlError::UnexpectedEnd(open));
            }
            _ => {}
        }
    }
}

fn node_from_start(e: &BytesStart<'_>) -> Result<ExpressionNode, CmmlError> {
    Ok(ExpressionNode::leaf(&normalized_tag(e.name()), ""))
}

/// Self-closing elements carry their payload in attributes (`<mws:qvar name="x"/>`).
fn finish_leaf(node: &mut ExpressionNode, e: &BytesStart<'_>) -> Result<(), CmmlError> {
    if node.tag == QVAR_TAG {
        if let Some(name) = attribute(e, "name")? {
            node.text = name;
        }
    }
    Ok(())
}

/// Replace `math` / `semantics` wrappers by their first child, repeatedly.
fn unwrap_root(mut node: ExpressionNode) -> Option<ExpressionNode> {
    while WRAPPER_TAGS.contains(&node.tag.as_str()) {
        node = node.children.into_iter().next()?;
    }
    unwrap_nested(&mut node);
    Some(node)
}

/// Wrappers can also appear below the root (e.g. `<semantics>` inside an
/// `apply` produced by some converters).
fn unwrap_nested(root: &mut ExpressionNode) {
    let mut stack: Vec<&mut ExpressionNode> = vec![root];
    while let Some(node) = stack.pop() {
        for child in node.children.iter_mut() {
            while WRAPPER_TAGS.contains(&child.tag.as_str()) && !child.children.is_empty() {
                let inner = child.children.remove(0);
                *child = inner;
            }
        }
        stack.extend(node.children.iter_mut());
    }
}

/// Qualified element names lose their prefix unless it is `mws`.
pub(crate) fn normalized_tag(name: QName<'_>) -> String {
    let local = String::from_utf8_lossy(name.local_name().as_ref()).into_owned();
    match name.prefix() {
        Some(prefix) if prefix.as_ref() == b"mws" => format!("mws:{local}"),
        _ => local,
    }
}

pub(crate) fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Look up an attribute by qualified or local name.
pub(crate) fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, CmmlError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = attr.key;
        let matches = key.as_ref() == name.as_bytes() || key.local_name().as_ref() == name.as_bytes();
        if matches {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apply_with_operator_and_operands() {
        let expr = parse_expression(
            "<math><apply><plus/><ci>x</ci><cn>1</cn></apply></math>",
        )
        .expect("parse");
        assert_eq!(expr.tag, "apply");
        assert_eq!(expr.children.len(), 3);
        assert_eq!(expr.children[0].symbol(), "plus#");
        assert_eq!(expr.children[1].symbol(), "ci#x");
        assert_eq!(expr.children[2].xpath, "/*[3]");
    }

    #[test]
    fn drops_annotations_inside_semantics() {
        let xml = r#"<math xmlns="http://www.w3.org/1998/Math/MathML">
            <semantics>
              <apply><times/><ci>a</ci><ci>b</ci></apply>
              <annotation-xml encoding="MathML-Presentation"><mi>a</mi></annotation-xml>
              <annotation encoding="application/x-tex">a b</annotation>
            </semantics>
        </math>"#;
        let expr = parse_expression(xml).expect("parse");
        assert_eq!(expr.tag, "apply");
        assert_eq!(expr.children[0].tag, "times");
        assert_eq!(expr.size(), 4);
    }

    #[test]
    fn keeps_mws_prefix_and_strips_others() {
        let xml = r#"<m:apply xmlns:m="http://www.w3.org/1998/Math/MathML"
                     xmlns:mws="http://search.mathweb.org/ns">
            <m:plus/><mws:qvar>a</mws:qvar><mws:qvar name="b"/>
        </m:apply>"#;
        let expr = parse_expression(xml).expect("parse");
        assert_eq!(expr.tag, "apply");
        assert_eq!(expr.children[1].tag, QVAR_TAG);
        assert_eq!(expr.children[1].text, "a");
        assert_eq!(expr.children[2].text, "b");
    }

    #[test]
    fn unterminated_fragment_is_an_error() {
        let err = parse_expression("<apply><plus/><ci>x</ci>").unwrap_err();
        assert!(matches!(err, CmmlError::UnexpectedEnd(_) | CmmlError::Xml(_)));
    }

    #[test]
    fn empty_math_is_rejected() {
        let err = parse_expression("<math></math>").unwrap_err();
        assert!(matches!(err, CmmlError::Empty(_)));
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let depth = 1_000;
        let mut xml = String::new();
        for _ in 0..depth {
            xml.push_str("<apply><minus/>");
        }
        xml.push_str("<ci>x</ci>");
        for _ in 0..depth {
            xml.push_str("</apply>");
        }
        let expr = parse_expression(&xml).expect("parse");
        assert_eq!(expr.size(), depth * 2 + 1);
    }
}
