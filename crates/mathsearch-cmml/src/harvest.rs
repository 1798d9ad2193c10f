//! Harvest and query documents.
//!
//! A harvest is the crawler's output for a batch of documents:
//!
//! ```xml
//! <mws:harvest xmlns:mws="http://search.mathweb.org/ns">
//!   <mws:data mws:data_id="7"><id>http://example.org/page</id></mws:data>
//!   <mws:expr url="page#eq1" mws:data_id="7">
//!     <math><apply><plus/><ci>x</ci><cn>1</cn></apply></math>
//!   </mws:expr>
//! </mws:harvest>
//! ```
//!
//! A query carries one or more expressions (usually with qvars) plus the
//! pagination attributes `limitmin`, `answsize` and `totalreq`.

use serde::{Deserialize, Serialize};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::parser::{attribute, element_name, normalized_tag, read_wrapped_expression};
use crate::{CmmlError, ExpressionNode};

/// Answers returned when a query does not set `answsize`.
pub const DEFAULT_ANSWER_SIZE: i64 = 30;

/// Opaque crawled payload attached to a harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestData {
    /// Harvest-local id referenced by expressions.
    pub data_id: String,
    /// Raw inner XML of `<mws:data>`.
    pub payload: String,
}

/// One formula of a harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestExpr {
    /// The `url` attribute; also stored as the root's `xml_id`.
    pub url: String,
    pub data_id: Option<String>,
    pub root: ExpressionNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Harvest {
    pub data: Vec<HarvestData>,
    pub exprs: Vec<HarvestExpr>,
}

impl HarvestData {
    /// Text of the first `<id>` or `<url>` element of the payload, which the
    /// crawler uses for the document's address.
    pub fn document_url(&self) -> Option<String> {
        let mut reader = Reader::from_str(&self.payload);
        reader.trim_text(true);
        loop {
            match reader.read_event().ok()? {
                Event::Start(e) if matches!(e.local_name().as_ref(), b"id" | b"url") => {
                    let end = e.to_end().into_owned();
                    let text = reader.read_text(end.name()).ok()?;
                    let text = text.trim();
                    return (!text.is_empty()).then(|| text.to_string());
                }
                Event::Eof => return None,
                _ => {}
            }
        }
    }
}

impl Harvest {
    pub fn data_by_id(&self, data_id: &str) -> Option<&HarvestData> {
        self.data.iter().find(|d| d.data_id == data_id)
    }
}

/// Parse a `<mws:harvest>` document.
pub fn parse_harvest(xml: &str) -> Result<Harvest, CmmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut harvest = Harvest::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match normalized_tag(e.name()).as_str() {
                "mws:data" => {
                    let data_id = required_attribute(&e, "data_id")?;
                    let end = e.to_end().into_owned();
                    let payload = reader.read_text(end.name())?.trim().to_string();
                    harvest.data.push(HarvestData { data_id, payload });
                }
                "mws:expr" => {
                    let start = e.into_owned();
                    harvest.exprs.push(read_harvest_expr(&mut reader, &start)?);
                }
                _ => {}
            },
            Event::Empty(e) if normalized_tag(e.name()) == "mws:data" => {
                let data_id = required_attribute(&e, "data_id")?;
                harvest.data.push(HarvestData {
                    data_id,
                    payload: String::new(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(harvest)
}

fn read_harvest_expr(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<HarvestExpr, CmmlError> {
    let url = required_attribute(start, "url")?;
    let data_id = attribute(start, "data_id")?;
    let root = read_wrapped_expression(reader, start)?.with_xml_id(&url);
    Ok(HarvestExpr { url, data_id, root })
}

// ============================================================================
// Queries
// ============================================================================

/// A parsed `<mws:query>`.
///
/// Pagination values are kept signed: validation (and the rejection of
/// negative values) belongs to the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// `limitmin`: number of leading answers to skip.
    pub limit_min: i64,
    /// `answsize`: maximum number of answers to return.
    pub answer_size: i64,
    /// `totalreq`: `None` asks for an exact total (`yes`), `Some(n)` accepts
    /// any total of at least `n` (`no` is `Some(0)`).
    pub total_requested: Option<i64>,
    pub exprs: Vec<ExpressionNode>,
}

/// Parse a `<mws:query>` document.
pub fn parse_query(xml: &str) -> Result<QueryRequest, CmmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut request: Option<QueryRequest> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match normalized_tag(e.name()).as_str() {
                "mws:query" => request = Some(query_header(&e)?),
                "mws:expr" => {
                    let start = e.into_owned();
                    let expr = read_wrapped_expression(&mut reader, &start)?;
                    match request.as_mut() {
                        Some(req) => req.exprs.push(expr),
                        None => return Err(missing_query_root(&start)),
                    }
                }
                _ => {}
            },
            Event::Empty(e) if normalized_tag(e.name()) == "mws:query" => {
                request = Some(query_header(&e)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    request.ok_or_else(|| CmmlError::Empty("mws:query".to_string()))
}

fn query_header(e: &BytesStart<'_>) -> Result<QueryRequest, CmmlError> {
    let limit_min = int_attribute(e, "limitmin")?.unwrap_or(0);
    let answer_size = int_attribute(e, "answsize")?.unwrap_or(DEFAULT_ANSWER_SIZE);
    let total_requested = match attribute(e, "totalreq")? {
        None => None,
        Some(v) => match v.trim() {
            "yes" => None,
            "no" => Some(0),
            other => Some(other.parse::<i64>().map_err(|_| CmmlError::BadAttribute {
                element: element_name(e),
                attribute: "totalreq".to_string(),
                value: v.clone(),
            })?),
        },
    };
    Ok(QueryRequest {
        limit_min,
        answer_size,
        total_requested,
        exprs: Vec::new(),
    })
}

fn missing_query_root(start: &BytesStart<'_>) -> CmmlError {
    CmmlError::MissingAttribute {
        element: element_name(start),
        attribute: "enclosing mws:query".to_string(),
    }
}

fn required_attribute(e: &BytesStart<'_>, name: &str) -> Result<String, CmmlError> {
    attribute(e, name)?.ok_or_else(|| CmmlError::MissingAttribute {
        element: element_name(e),
        attribute: name.to_string(),
    })
}

fn int_attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<i64>, CmmlError> {
    let Some(raw) = attribute(e, name)? else {
        return Ok(None);
    };
    raw.trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|_| CmmlError::BadAttribute {
            element: element_name(e),
            attribute: name.to_string(),
            value: raw,
        })
}
