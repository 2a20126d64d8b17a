//! Records from STAC APIs: a single Item, or an ItemCollection /
//! FeatureCollection whose features are the records.

use serde_json::Value;

use super::{append_provenance, expect_json, ExtractContext, RecordExtractor};
use crate::error::{HarvesterError, Result};
use crate::ident;
use crate::locator::{json_scalar_string, JsonLocator};
use crate::tree::Element;
use crate::types::{Format, Payload, RecordBatch};

/// Root element name of a converted STAC item.
pub const ITEM_ELEMENT: &str = "stacItem";

/// Items container used when no records locator is configured.
const DEFAULT_ITEMS_PATH: &str = "features";

/// Extracts STAC items, identified by their own `id` unless configured otherwise.
pub struct StacExtractor;

impl RecordExtractor for StacExtractor {
    fn format(&self) -> Format {
        Format::Stac
    }

    fn extract(&self, payload: &Payload, context: &mut ExtractContext<'_>) -> Result<RecordBatch> {
        let value = expect_json(payload)?;
        let source = context.source;

        let id_locator = source
            .record_id_path
            .as_deref()
            .map(JsonLocator::parse)
            .transpose()?;

        let mut batch = RecordBatch::new();

        if !is_collection(value) {
            tracing::debug!(url = context.url, "Processing single STAC item");
            let (id, record) = convert_item(value, id_locator.as_ref(), context);
            batch.insert(id, record);
            return Ok(batch);
        }

        let items_expr = source.records_path.as_deref().unwrap_or(DEFAULT_ITEMS_PATH);
        let items = match JsonLocator::parse(items_expr)?.select(value) {
            Some(Value::Array(items)) => items,
            _ => {
                context.errors.record(
                    context.url,
                    "No STAC items found",
                    &HarvesterError::LocatorMissing {
                        expression: items_expr.to_string(),
                        context: None,
                    },
                );
                return Ok(batch);
            }
        };
        tracing::debug!(url = context.url, count = items.len(), "Records found in STAC collection");

        for item in items {
            let (id, record) = convert_item(item, id_locator.as_ref(), context);
            batch.insert(id, record);
        }
        Ok(batch)
    }
}

/// A collection carries a non-empty `features` array.
fn is_collection(value: &Value) -> bool {
    value
        .get("features")
        .and_then(Value::as_array)
        .is_some_and(|features| !features.is_empty())
}

fn convert_item(
    item: &Value,
    id_locator: Option<&JsonLocator>,
    context: &ExtractContext<'_>,
) -> (String, Element) {
    let id = item_id(item, id_locator);

    let mut record = Element::from_json(ITEM_ELEMENT, item);
    append_provenance(&mut record, &id, context.origin);
    if let Some(version) = item.get("stac_version").and_then(json_scalar_string) {
        record.append_field("stacVersion", version);
    }
    (id, record)
}

/// Identifier of an item: configured locator, then the item's `id`, then
/// the content hash of the whole item.
fn item_id(item: &Value, id_locator: Option<&JsonLocator>) -> String {
    let configured = id_locator
        .and_then(|locator| locator.select(item))
        .and_then(json_scalar_string)
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| ident::resolve(raw.trim()));
    if let Some(id) = configured {
        return id;
    }

    if let Some(id) = item
        .get("id")
        .and_then(json_scalar_string)
        .filter(|id| !id.trim().is_empty())
    {
        return id;
    }

    tracing::debug!("STAC item without identifier, hashing content");
    ident::content_hash(&item.to_string())
}
