//! Content format detection.
//!
//! Remote endpoints rarely label their payloads reliably, so the format is
//! inferred from the content itself: RDF/XML first, then any XML, then JSON
//! with STAC heuristics on top.

use roxmltree::{Document, ParsingOptions};
use serde_json::Value;

use crate::types::Format;

/// RDF syntax namespace.
pub const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// `rel` values that only STAC catalogs use together with `links`.
const STAC_LINK_RELS: [&str; 7] = [
    "self",
    "items",
    "collections",
    "root",
    "parent",
    "child",
    "collection",
];

/// Classify raw text. Never fails: anything that is not XML is treated as
/// JSON, and a JSON parse error only surfaces when the payload is parsed.
///
/// # Examples
/// ```
/// use simpleurl_harvester::sniff::classify;
/// use simpleurl_harvester::types::Format;
///
/// assert_eq!(classify(r#"{"stac_version": "1.0.0"}"#), Format::Stac);
/// assert_eq!(classify(r#"{"result": []}"#), Format::Json);
/// assert_eq!(classify("<records/>"), Format::Xml);
/// ```
#[must_use]
pub fn classify(text: &str) -> Format {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with('<') {
        return if is_rdf_like(trimmed) {
            Format::RdfXml
        } else {
            Format::Xml
        };
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if is_stac_like(&value) => Format::Stac,
        _ => Format::Json,
    }
}

/// Whether XML text is an RDF/XML document.
///
/// Checks the root element when the text parses; otherwise falls back to
/// looking for an `rdf:RDF` start tag.
#[must_use]
pub fn is_rdf_like(xml: &str) -> bool {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    match Document::parse_with_options(xml, options) {
        Ok(doc) => {
            let root = doc.root_element();
            root.tag_name().name() == "RDF" && root.tag_name().namespace() == Some(RDF_NAMESPACE)
        }
        Err(_) => xml.contains("<rdf:RDF"),
    }
}

/// Whether a JSON value looks like a STAC document.
///
/// No single field is authoritative across STAC implementations, so several
/// weak signals are OR-ed.
#[must_use]
pub fn is_stac_like(value: &Value) -> bool {
    value.get("stac_version").is_some()
        || has_stac_links(value)
        || has_stac_features(value)
        || is_feature_like(value)
}

fn has_stac_links(value: &Value) -> bool {
    value
        .get("links")
        .and_then(Value::as_array)
        .is_some_and(|links| {
            links.iter().any(|link| {
                link.get("rel")
                    .and_then(Value::as_str)
                    .is_some_and(|rel| STAC_LINK_RELS.contains(&rel))
            })
        })
}

fn has_stac_features(value: &Value) -> bool {
    value
        .get("features")
        .and_then(Value::as_array)
        .and_then(|features| features.first())
        .is_some_and(|first| {
            first.get("type").and_then(Value::as_str) == Some("Feature") && has_properties_or_assets(first)
        })
}

fn is_feature_like(value: &Value) -> bool {
    matches!(
        value.get("type").and_then(Value::as_str),
        Some("Feature" | "FeatureCollection")
    ) && has_properties_or_assets(value)
}

fn has_properties_or_assets(value: &Value) -> bool {
    value.get("properties").is_some() || value.get("assets").is_some()
}
