//! Harvest and query parsing against realistic crawler output.

use mathsearch_cmml::{parse_expression, parse_harvest, parse_query, ExpressionNode};
use proptest::prelude::*;

const HARVEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mws:harvest xmlns:mws="http://search.mathweb.org/ns" xmlns:m="http://www.w3.org/1998/Math/MathML">
  <mws:data mws:data_id="1">
    <id>http://example.org/algebra</id>
    <text>Some &lt;b&gt;context&lt;/b&gt;</text>
  </mws:data>
  <mws:expr url="algebra#eq1" mws:data_id="1">
    <m:math>
      <m:semantics>
        <m:apply><m:plus/><m:ci>x</m:ci><m:cn>1</m:cn></m:apply>
        <m:annotation encoding="application/x-tex">x+1</m:annotation>
      </m:semantics>
    </m:math>
  </mws:expr>
  <mws:expr url="algebra#eq2" mws:data_id="1">
    <m:apply><m:times/><m:ci>a</m:ci><m:ci>b</m:ci></m:apply>
  </mws:expr>
  <mws:expr url="orphan#eq1">
    <m:cn>42</m:cn>
  </mws:expr>
</mws:harvest>"#;

#[test]
fn harvest_collects_data_and_expressions() {
    let harvest = parse_harvest(HARVEST).expect("parse harvest");
    assert_eq!(harvest.data.len(), 1);
    assert_eq!(harvest.exprs.len(), 3);

    let data = harvest.data_by_id("1").expect("data 1");
    assert!(data.payload.contains("http://example.org/algebra"));

    let first = &harvest.exprs[0];
    assert_eq!(first.url, "algebra#eq1");
    assert_eq!(first.data_id.as_deref(), Some("1"));
    assert_eq!(first.root.xml_id.as_deref(), Some("algebra#eq1"));
    assert_eq!(first.root.tag, "apply");
    assert_eq!(first.root.xpath, "/");
    assert_eq!(first.root.size(), 4);

    assert_eq!(harvest.exprs[2].data_id, None);
    assert_eq!(harvest.exprs[2].root.symbol(), "cn#42");
}

#[test]
fn query_with_pagination_and_qvars() {
    let req = parse_query(
        r#"<mws:query xmlns:mws="http://search.mathweb.org/ns"
                      limitmin="5" answsize="10" totalreq="no">
             <mws:expr>
               <apply><plus/><mws:qvar>a</mws:qvar><cn>1</cn></apply>
             </mws:expr>
           </mws:query>"#,
    )
    .expect("parse query");
    assert_eq!(req.limit_min, 5);
    assert_eq!(req.answer_size, 10);
    assert_eq!(req.total_requested, Some(0));
    assert!(req.exprs[0].has_qvars());
}

#[test]
fn negative_pagination_is_passed_through() {
    let req = parse_query(r#"<mws:query limitmin="-1"><mws:expr><ci>x</ci></mws:expr></mws:query>"#)
        .expect("parse query");
    assert_eq!(req.limit_min, -1);
}

fn render(node: &ExpressionNode) -> String {
    if node.children.is_empty() {
        if node.text.is_empty() {
            format!("<{}/>", node.tag)
        } else {
            format!("<{0}>{1}</{0}>", node.tag, node.text)
        }
    } else {
        let inner: String = node.children.iter().map(render).collect();
        format!("<{0}>{1}</{0}>", node.tag, inner)
    }
}

fn arb_expression() -> impl Strategy<Value = ExpressionNode> {
    let leaf = prop_oneof![
        "[a-z]{1,3}".prop_map(|s| ExpressionNode::ci(&s)),
        (0u32..100).prop_map(|n| ExpressionNode::cn(&n.to_string())),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        (
            prop_oneof![Just("plus"), Just("times"), Just("minus")],
            prop::collection::vec(inner, 1..3),
        )
            .prop_map(|(op, args)| ExpressionNode::apply(op, args))
    })
}

proptest! {
    #[test]
    fn rendered_trees_parse_back_to_the_same_shape(expr in arb_expression()) {
        let expected = expr.clone().rooted();
        let parsed = parse_expression(&format!("<math>{}</math>", render(&expr))).unwrap();
        prop_assert_eq!(parsed, expected);
    }
}
