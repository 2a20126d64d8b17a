//! Record extraction: turn a parsed payload into a batch of normalized records.
//!
//! There is one extractor per [`Format`], selected once per URL by the
//! sniffed format. Extractors record per-record problems in the run's
//! [`ErrorSink`] and keep going; only a broken locator expression or a
//! payload of the wrong kind fails a whole page.

pub mod json;
pub mod rdf;
pub mod stac;
pub mod xml;

use serde_json::Value;

use crate::config::HarvestSource;
use crate::error::{HarvesterError, Result};
use crate::locator::{json_count, JsonLocator, XmlLocator};
use crate::tree::Element;
use crate::types::{ErrorSink, Format, Payload, RecordBatch, RecordOrigin, XmlDocument};

pub use json::JsonExtractor;
pub use rdf::RdfExtractor;
pub use stac::StacExtractor;
pub use xml::XmlExtractor;

/// Everything an extractor needs besides the payload itself.
pub struct ExtractContext<'a> {
    pub source: &'a HarvestSource,
    /// Page URL the payload was fetched from.
    pub url: &'a str,
    pub origin: &'a RecordOrigin,
    pub errors: &'a mut ErrorSink,
}

impl<'a> ExtractContext<'a> {
    pub fn new(
        source: &'a HarvestSource,
        url: &'a str,
        origin: &'a RecordOrigin,
        errors: &'a mut ErrorSink,
    ) -> Self {
        Self {
            source,
            url,
            origin,
            errors,
        }
    }

    /// Error context for the record at `index` on this page.
    fn record_context(&self, index: usize) -> String {
        format!("{} record #{index}", self.url)
    }
}

/// Turns a parsed payload into records keyed by identifier.
pub trait RecordExtractor {
    /// Format this extractor handles.
    fn format(&self) -> Format;

    /// Extract every record of the payload.
    ///
    /// # Returns
    /// The page's records. Per-record failures are recorded in
    /// `context.errors` and leave the rest of the batch intact.
    fn extract(&self, payload: &Payload, context: &mut ExtractContext<'_>) -> Result<RecordBatch>;
}

/// Get the extractor for a sniffed format.
#[must_use]
pub fn extractor_for(format: Format) -> &'static dyn RecordExtractor {
    match format {
        Format::Json => &JsonExtractor,
        Format::Xml => &XmlExtractor,
        Format::RdfXml => &RdfExtractor,
        Format::Stac => &StacExtractor,
    }
}

/// Append the provenance children every harvested record carries.
pub fn append_provenance(record: &mut Element, id: &str, origin: &RecordOrigin) {
    record.append_field("uuid", id);
    record.append_field("apiUrl", origin.api_url.as_str());
    record.append_field("nodeUrl", origin.node_url.as_str());
}

/// Read the total number of records announced by a payload.
///
/// # Returns
/// * `Ok(count)` when the locator selects a non-negative integer
/// * `Err(HarvesterError::LocatorMissing)` when it selects nothing usable
/// * `Err(HarvesterError::InvalidLocator)` when the expression is broken
pub fn total_count(payload: &Payload, expression: &str) -> Result<u64> {
    let missing = || HarvesterError::LocatorMissing {
        expression: expression.to_string(),
        context: None,
    };

    match payload {
        Payload::Json(value) => JsonLocator::parse(expression)?
            .select(value)
            .and_then(json_count)
            .ok_or_else(missing),
        Payload::Xml(doc) => XmlLocator::parse(expression)?
            .select_string(&doc.root, &doc.namespaces)?
            .and_then(|s| s.parse().ok())
            .ok_or_else(missing),
    }
}

fn expect_json(payload: &Payload) -> Result<&Value> {
    match payload {
        Payload::Json(value) => Ok(value),
        Payload::Xml(_) => Err(HarvesterError::UnexpectedPayload { expected: "JSON" }),
    }
}

fn expect_xml(payload: &Payload) -> Result<&XmlDocument> {
    match payload {
        Payload::Xml(doc) => Ok(doc),
        Payload::Json(_) => Err(HarvesterError::UnexpectedPayload { expected: "XML" }),
    }
}
