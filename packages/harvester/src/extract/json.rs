//! Records from generic JSON APIs (CKAN, OGC API Records, custom feeds).

use serde_json::Value;

use super::{append_provenance, expect_json, ExtractContext, RecordExtractor};
use crate::error::{HarvesterError, Result};
use crate::ident;
use crate::locator::{json_scalar_string, JsonLocator};
use crate::tree::Element;
use crate::types::{Format, Payload, RecordBatch};

/// Root element name of a converted JSON record.
pub const RECORD_ELEMENT: &str = "record";

/// Extracts records from a JSON payload via `records_path` and `record_id_path`.
pub struct JsonExtractor;

impl RecordExtractor for JsonExtractor {
    fn format(&self) -> Format {
        Format::Json
    }

    fn extract(&self, payload: &Payload, context: &mut ExtractContext<'_>) -> Result<RecordBatch> {
        let value = expect_json(payload)?;
        let source = context.source;

        let records_expr = source.records_path.as_deref().unwrap_or_default();
        let records_locator = JsonLocator::parse(records_expr)?;
        let id_locator = source
            .record_id_path
            .as_deref()
            .map(|expr| JsonLocator::parse(expr).map(|locator| (expr, locator)))
            .transpose()?;

        let mut batch = RecordBatch::new();

        let Some(container) = records_locator.select(value) else {
            context.errors.record(
                context.url,
                "No records found",
                &HarvesterError::LocatorMissing {
                    expression: records_expr.to_string(),
                    context: None,
                },
            );
            return Ok(batch);
        };

        let items: Vec<&Value> = match container {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        tracing::debug!(url = context.url, count = items.len(), "Records found in JSON response");

        for (index, item) in items.into_iter().enumerate() {
            let id = match &id_locator {
                None => ident::content_hash(&item.to_string()),
                Some((expr, locator)) => match record_id(item, expr, locator) {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        let err = HarvesterError::LocatorMissing {
                            expression: (*expr).to_string(),
                            context: None,
                        };
                        tracing::warn!(url = context.url, index, error = %err, "Record without identifier, hashing content");
                        let label = context.record_context(index);
                        context.errors.record(
                            label,
                            "Identifier missing, using content hash",
                            &err,
                        );
                        ident::content_hash(&item.to_string())
                    }
                    Err(err) => {
                        tracing::warn!(url = context.url, index, error = %err, "Dropping record");
                        let label = context.record_context(index);
                        context.errors.record(label, "Record dropped", &err);
                        continue;
                    }
                },
            };

            let mut record = Element::from_json(RECORD_ELEMENT, item);
            append_provenance(&mut record, &id, context.origin);
            batch.insert(id, record);
        }

        Ok(batch)
    }
}

/// Resolve the identifier of one JSON record.
///
/// # Returns
/// * `Ok(Some(id))` for a scalar value
/// * `Ok(None)` when the value is missing, `null` or blank
/// * `Err(HarvesterError::IdResolution)` when it is an object or array
fn record_id(item: &Value, expression: &str, locator: &JsonLocator) -> Result<Option<String>> {
    match locator.select(item) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(_)) => Err(HarvesterError::IdResolution {
            expression: expression.to_string(),
            reason: "value is an object".to_string(),
        }),
        Some(Value::Array(_)) => Err(HarvesterError::IdResolution {
            expression: expression.to_string(),
            reason: "value is an array".to_string(),
        }),
        Some(scalar) => Ok(json_scalar_string(scalar)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(|raw| ident::resolve(&raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvestSource;
    use crate::types::{ErrorSink, RecordOrigin};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(source: &HarvestSource, value: Value) -> (Result<RecordBatch>, ErrorSink) {
        let url = "https://data.example.org/api/3/action/package_search?rows=10&start=0";
        let origin = RecordOrigin::from_url(url).unwrap();
        let mut errors = ErrorSink::new();
        let result = {
            let mut context = ExtractContext::new(source, url, &origin, &mut errors);
            JsonExtractor.extract(&Payload::Json(value), &mut context)
        };
        (result, errors)
    }

    fn ckan_source() -> HarvestSource {
        HarvestSource::new("ckan", "https://data.example.org").with_records("/result/results", "id")
    }

    #[test]
    fn test_extracts_array_of_records() {
        let value = json!({"result": {"count": 2, "results": [
            {"id": "a1", "title": "Roads"},
            {"id": "https://data.example.org/dataset/b2", "title": "Rivers"}
        ]}});
        let (batch, errors) = run(&ckan_source(), value);
        let batch = batch.unwrap();

        assert!(errors.is_empty());
        assert_eq!(batch.ids().collect::<Vec<_>>(), vec!["a1", "b2"]);

        let record = batch.get("b2").unwrap();
        assert_eq!(record.name, "record");
        assert_eq!(record.child("title").map(Element::text), Some("Rivers"));
        assert_eq!(record.child("uuid").map(Element::text), Some("b2"));
        assert_eq!(
            record.child("apiUrl").map(Element::text),
            Some("https://data.example.org/api/3/action/package_search")
        );
        assert_eq!(
            record.child("nodeUrl").map(Element::text),
            Some("https://data.example.org")
        );
    }

    #[test]
    fn test_single_object_is_one_record() {
        let value = json!({"result": {"results": {"id": 7, "title": "Only"}}});
        let (batch, _) = run(&ckan_source(), value);
        assert_eq!(batch.unwrap().ids().collect::<Vec<_>>(), vec!["7"]);
    }

    #[test]
    fn test_missing_container_is_recorded() {
        let (batch, errors) = run(&ckan_source(), json!({"result": {}}));
        assert!(batch.unwrap().is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors.errors()[0].cause.as_deref().unwrap().contains("/result/results"));
    }

    #[test]
    fn test_missing_id_falls_back_to_hash() {
        let record = json!({"title": "No id"});
        let value = json!({"result": {"results": [{"id": "a"}, record.clone(), {"id": null}]}});
        let (batch, errors) = run(&ckan_source(), value);
        let batch = batch.unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(errors.len(), 2);
        assert!(batch.get(&ident::content_hash(&record.to_string())).is_some());
    }

    #[test]
    fn test_structured_id_drops_record() {
        let value = json!({"result": {"results": [
            {"id": "a"},
            {"id": {"nested": true}},
            {"id": "c"},
            {"id": ["x"]}
        ]}});
        let (batch, errors) = run(&ckan_source(), value);

        assert_eq!(batch.unwrap().ids().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(errors.len(), 2);
        assert!(errors.errors()[0].message.contains("dropped"));
    }

    #[test]
    fn test_no_id_locator_hashes_every_record() {
        let source = HarvestSource::new("feed", "https://data.example.org").with_records("items", "");
        let value = json!({"items": [{"a": 1}, {"a": 2}]});
        let (batch, errors) = run(&source, value);

        assert_eq!(batch.unwrap().len(), 2);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_invalid_locator_fails_page() {
        let source = HarvestSource::new("bad", "https://data.example.org").with_records("/a/~2", "id");
        let (batch, _) = run(&source, json!({}));
        assert!(matches!(batch, Err(HarvesterError::InvalidLocator { .. })));
    }

    #[test]
    fn test_xml_payload_rejected() {
        let source = ckan_source();
        let url = "https://data.example.org/api";
        let origin = RecordOrigin::from_url(url).unwrap();
        let mut errors = ErrorSink::new();
        let mut context = ExtractContext::new(&source, url, &origin, &mut errors);
        let payload = Payload::parse("<a/>", Format::Xml).unwrap();

        assert!(matches!(
            JsonExtractor.extract(&payload, &mut context),
            Err(HarvesterError::UnexpectedPayload { .. })
        ));
    }
}
