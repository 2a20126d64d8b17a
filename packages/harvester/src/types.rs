//! Core data types for the harvester.
//!
//! These types describe what flows through a harvest run: fetched payloads,
//! per-page record batches, the run-wide error list and the final report.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use roxmltree::{Document, ParsingOptions};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{HarvesterError, Result};
use crate::locator::NamespaceMap;
use crate::tree::Element;

/// Wire format of a fetched payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Generic XML.
    Xml,
    /// RDF/XML graph.
    RdfXml,
    /// STAC Item, ItemCollection or FeatureCollection (JSON).
    Stac,
    /// Any other JSON.
    Json,
}

impl Format {
    /// Get the lowercase name, used in logs and rule lookup paths.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::RdfXml => "rdfxml",
            Self::Stac => "stac",
            Self::Json => "json",
        }
    }

    /// Whether payloads of this format are XML documents.
    #[must_use]
    pub fn is_xml(&self) -> bool {
        matches!(self, Self::Xml | Self::RdfXml)
    }

    /// Whether payloads of this format carry many records without a
    /// configured records locator.
    #[must_use]
    pub fn carries_records(&self) -> bool {
        matches!(self, Self::RdfXml | Self::Stac)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetched text of one URL or page together with its detected format.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub url: String,
    pub text: String,
    pub format: Format,
}

impl RawPayload {
    /// Parse the text according to the detected format.
    pub fn parse(&self) -> Result<Payload> {
        tracing::debug!(url = %self.url, format = %self.format, bytes = self.text.len(), "Parsing payload");
        Payload::parse(&self.text, self.format)
    }
}

/// An XML payload converted into an owned tree.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub root: Element,
    pub namespaces: NamespaceMap,
}

impl XmlDocument {
    /// Parse XML text.
    pub fn parse(text: &str) -> Result<Self> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options)?;
        Ok(Self {
            root: Element::from_xml(doc.root_element()),
            namespaces: NamespaceMap::from_document(&doc),
        })
    }
}

/// A parsed payload.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Xml(XmlDocument),
}

impl Payload {
    /// Parse `text` as the given format.
    ///
    /// A leading byte order mark and whitespace are skipped, as they are by
    /// format detection.
    pub fn parse(text: &str, format: Format) -> Result<Self> {
        let text = text.trim_start_matches('\u{feff}').trim_start();
        if format.is_xml() {
            Ok(Self::Xml(XmlDocument::parse(text)?))
        } else {
            Ok(Self::Json(serde_json::from_str(text)?))
        }
    }
}

/// Where a record was harvested from; becomes the provenance fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrigin {
    /// Page URL without its query string.
    pub api_url: String,
    /// Scheme and authority of the page URL.
    pub node_url: String,
}

impl RecordOrigin {
    /// Derive the origin from a page URL.
    ///
    /// # Examples
    /// ```
    /// use simpleurl_harvester::types::RecordOrigin;
    ///
    /// let origin = RecordOrigin::from_url("https://data.example.org:8443/api/3/search?rows=10").unwrap();
    /// assert_eq!(origin.api_url, "https://data.example.org:8443/api/3/search");
    /// assert_eq!(origin.node_url, "https://data.example.org:8443");
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let api_url = url.split('?').next().unwrap_or(url).to_string();
        let parsed = Url::parse(&api_url).map_err(|_| HarvesterError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| HarvesterError::InvalidUrl(url.to_string()))?;
        let node_url = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };
        Ok(Self { api_url, node_url })
    }
}

/// Records of one page, keyed by identifier. Last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    records: BTreeMap<String, Element>,
}

impl RecordBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any previous record with the same identifier.
    pub fn insert(&mut self, id: impl Into<String>, record: Element) -> Option<Element> {
        let id = id.into();
        let previous = self.records.insert(id.clone(), record);
        if previous.is_some() {
            tracing::debug!(id = %id, "Duplicate identifier in page, keeping last record");
        }
        previous
    }

    /// Get a record by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.records.get(id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identifiers in the batch, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Iterate over `(identifier, record)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Element)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }
}

impl IntoIterator for RecordBatch {
    type Item = (String, Element);
    type IntoIter = std::collections::btree_map::IntoIter<String, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl FromIterator<(String, Element)> for RecordBatch {
    fn from_iter<T: IntoIterator<Item = (String, Element)>>(iter: T) -> Self {
        let mut batch = Self::new();
        for (id, record) in iter {
            batch.insert(id, record);
        }
        batch
    }
}

/// A recoverable failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestError {
    /// Source URL, locator or record the failure relates to.
    pub context: String,
    /// Human readable description.
    pub message: String,
    /// Underlying cause, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl fmt::Display for HarvestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

/// Append-only list of recoverable failures for one run.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    errors: Vec<HarvestError>,
}

impl ErrorSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure with its underlying error.
    pub fn record(
        &mut self,
        context: impl Into<String>,
        message: impl Into<String>,
        cause: &dyn std::error::Error,
    ) {
        let mut chain = cause.to_string();
        let mut source = cause.source();
        while let Some(inner) = source {
            chain.push_str(": ");
            chain.push_str(&inner.to_string());
            source = inner.source();
        }
        self.errors.push(HarvestError {
            context: context.into(),
            message: message.into(),
            cause: Some(chain),
        });
    }

    /// Record a failure without an underlying error.
    pub fn record_message(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.errors.push(HarvestError {
            context: context.into(),
            message: message.into(),
            cause: None,
        });
    }

    /// Recorded errors, in order.
    #[must_use]
    pub fn errors(&self) -> &[HarvestError] {
        &self.errors
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Take ownership of the recorded errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<HarvestError> {
        self.errors
    }
}

/// Outcome of aligning one batch with the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlignStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl std::ops::AddAssign for AlignStats {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// State that lives for exactly one run.
#[derive(Debug, Default)]
pub struct HarvestRun {
    /// Every identifier handed to the indexer during the run.
    pub identifiers: BTreeSet<String>,
    /// Recoverable failures.
    pub errors: ErrorSink,
    /// Accumulated align statistics.
    pub stats: AlignStats,
    pub urls_attempted: usize,
    pub urls_failed: usize,
    pub pages_processed: usize,
}

/// Report of a finished (or cancelled) run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub urls_attempted: usize,
    pub urls_failed: usize,
    pub pages_processed: usize,
    /// Number of distinct identifiers seen during the run.
    pub records_processed: usize,
    pub stats: AlignStats,
    /// Records removed by reconciliation. `None` when reconciliation did not run.
    pub removed: Option<usize>,
    pub errors: Vec<HarvestError>,
}

impl HarvestReport {
    /// Whether the run finished without recording any error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_flags() {
        assert!(Format::Xml.is_xml());
        assert!(Format::RdfXml.is_xml());
        assert!(!Format::Stac.is_xml());
        assert!(Format::Stac.carries_records());
        assert!(Format::RdfXml.carries_records());
        assert!(!Format::Json.carries_records());
        assert_eq!(Format::RdfXml.to_string(), "rdfxml");
    }

    #[test]
    fn test_payload_parse_by_format() {
        assert!(matches!(
            Payload::parse(r#"{"a":1}"#, Format::Json),
            Ok(Payload::Json(_))
        ));
        assert!(matches!(
            Payload::parse("\u{feff}<a/>", Format::Xml),
            Ok(Payload::Xml(_))
        ));
        assert!(matches!(
            Payload::parse("<a>", Format::Xml),
            Err(HarvesterError::XmlParse(_))
        ));
        assert!(matches!(
            Payload::parse("nope", Format::Stac),
            Err(HarvesterError::JsonParse(_))
        ));
    }

    #[test]
    fn test_payload_parse_accepts_what_classify_accepts() {
        let stac = "\u{feff}{\"type\": \"Feature\", \"stac_version\": \"1.0.0\", \"properties\": {}}";
        assert_eq!(crate::sniff::classify(stac), Format::Stac);
        assert!(matches!(Payload::parse(stac, Format::Stac), Ok(Payload::Json(_))));

        let xml = "\n  <?xml version=\"1.0\"?><a/>";
        assert_eq!(crate::sniff::classify(xml), Format::Xml);
        let Ok(Payload::Xml(doc)) = Payload::parse(xml, Format::Xml) else {
            panic!("expected an XML payload");
        };
        assert_eq!(doc.root.name, "a");

        let json = "\u{feff}\r\n{\"result\": []}";
        assert_eq!(crate::sniff::classify(json), Format::Json);
        assert!(matches!(Payload::parse(json, Format::Json), Ok(Payload::Json(_))));
    }

    #[test]
    fn test_record_origin() {
        let origin = RecordOrigin::from_url("https://example.org/api/records?from=0&size=10").unwrap();
        assert_eq!(origin.api_url, "https://example.org/api/records");
        assert_eq!(origin.node_url, "https://example.org");
        assert!(RecordOrigin::from_url("not a url").is_err());
    }

    #[test]
    fn test_batch_last_write_wins() {
        let mut batch = RecordBatch::new();
        batch.insert("a", Element::new("first"));
        let previous = batch.insert("a", Element::new("second"));

        assert_eq!(previous.map(|e| e.name), Some("first".to_string()));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get("a").map(|e| e.name.as_str()), Some("second"));
    }

    #[test]
    fn test_error_sink_records_cause_chain() {
        let mut sink = ErrorSink::new();
        let err = HarvesterError::Config("bad".to_string());
        sink.record("https://example.org", "Failed to harvest", &err);
        sink.record_message("record x", "dropped");

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.errors()[0].to_string(),
            "https://example.org: Failed to harvest (Configuration error: bad)"
        );
        assert_eq!(sink.errors()[1].cause, None);
    }

    #[test]
    fn test_align_stats_accumulate() {
        let mut total = AlignStats::default();
        total += AlignStats {
            added: 2,
            updated: 1,
            unchanged: 0,
        };
        total += AlignStats {
            added: 1,
            updated: 0,
            unchanged: 4,
        };
        assert_eq!(
            total,
            AlignStats {
                added: 3,
                updated: 1,
                unchanged: 4
            }
        );
    }
}
