//! Records from generic XML responses (CSW, OAI-PMH, custom feeds).

use super::{append_provenance, expect_xml, ExtractContext, RecordExtractor};
use crate::error::{HarvesterError, Result};
use crate::ident;
use crate::locator::XmlLocator;
use crate::types::{Format, Payload, RecordBatch};

/// Extracts the node-set selected by `records_path`; each node is a record.
///
/// Without a records locator the document root is the only record.
pub struct XmlExtractor;

impl RecordExtractor for XmlExtractor {
    fn format(&self) -> Format {
        Format::Xml
    }

    fn extract(&self, payload: &Payload, context: &mut ExtractContext<'_>) -> Result<RecordBatch> {
        let doc = expect_xml(payload)?;
        let source = context.source;

        let nodes = match source.records_path.as_deref() {
            Some(expr) => XmlLocator::parse(expr)?.select_elements(&doc.root, &doc.namespaces)?,
            None => vec![&doc.root],
        };
        let id_locator = source
            .record_id_path
            .as_deref()
            .map(XmlLocator::parse)
            .transpose()?;

        let mut batch = RecordBatch::new();

        if nodes.is_empty() {
            context.errors.record(
                context.url,
                "No records found",
                &HarvesterError::LocatorMissing {
                    expression: source.records_path.clone().unwrap_or_default(),
                    context: None,
                },
            );
            return Ok(batch);
        }
        tracing::debug!(url = context.url, count = nodes.len(), "Records found in XML response");

        for (index, node) in nodes.into_iter().enumerate() {
            let found = match &id_locator {
                Some(locator) => locator
                    .select_string(node, &doc.namespaces)?
                    .map(|raw| ident::resolve(&raw)),
                None => None,
            };

            let id = match (found, &id_locator) {
                (Some(id), _) => id,
                (None, None) => ident::content_hash(&node.to_xml_string()),
                (None, Some(locator)) => {
                    let err = HarvesterError::LocatorMissing {
                        expression: locator.expression().to_string(),
                        context: Some(node.qualified_name()),
                    };
                    tracing::warn!(url = context.url, index, error = %err, "Record without identifier, hashing content");
                    let label = context.record_context(index);
                    context
                        .errors
                        .record(label, "Identifier missing, using content hash", &err);
                    ident::content_hash(&node.to_xml_string())
                }
            };

            let mut record = node.clone();
            append_provenance(&mut record, &id, context.origin);
            batch.insert(id, record);
        }

        Ok(batch)
    }
}
