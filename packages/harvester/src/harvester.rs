//! Main harvester service that ties all components together.
//!
//! A run walks the configured URLs one by one. Each URL is fetched once to
//! detect its format and read the total record count, which yields the page
//! sequence. Every page is then extracted, transformed and handed to the
//! indexer before the next one is fetched. When all URLs have been tried,
//! the indexer reconciles against every identifier seen during the run.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::config::{HarvestSource, DEFAULT_FALLBACK_RULES_DIR, DEFAULT_RULES_DIR};
use crate::error::Result;
use crate::extract::{self, ExtractContext};
use crate::http::{bytes_to_string, Fetcher};
use crate::indexer::Indexer;
use crate::paging;
use crate::sniff;
use crate::transform::{RuleRegistry, TransformDispatch, Transformer};
use crate::types::{Format, HarvestReport, HarvestRun, RawPayload, RecordOrigin};

/// Harvests sources through a [`Fetcher`] into an [`Indexer`].
pub struct Harvester<F, I> {
    fetcher: F,
    indexer: I,
    rules: RuleRegistry,
    transformer: Option<Box<dyn Transformer>>,
}

impl<F: Fetcher, I: Indexer> Harvester<F, I> {
    /// Create a harvester using the default rule directories and no
    /// transformation engine.
    pub fn new(fetcher: F, indexer: I) -> Self {
        Self {
            fetcher,
            indexer,
            rules: RuleRegistry::new(DEFAULT_RULES_DIR, DEFAULT_FALLBACK_RULES_DIR),
            transformer: None,
        }
    }

    /// Use a different rule registry.
    #[must_use]
    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = rules;
        self
    }

    /// Set the engine used for sources with a transformation rule.
    #[must_use]
    pub fn with_transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    /// Harvest every URL of `source`.
    ///
    /// Never fails: problems are collected in the report. `cancel` is
    /// checked before each configured URL; a URL already in progress runs to
    /// its last page. Once the flag is seen the run stops, the report is
    /// flagged as cancelled and reconciliation is skipped.
    ///
    /// # Arguments
    /// * `source` - The source to harvest
    /// * `cancel` - Cooperative cancellation flag
    ///
    /// # Returns
    /// A `HarvestReport` with counts, statistics and recoverable errors
    pub fn run(&mut self, source: &HarvestSource, cancel: &AtomicBool) -> HarvestReport {
        let started_at = Utc::now();
        let mut run = HarvestRun::default();
        let mut cancelled = false;

        let urls = source.urls();
        tracing::info!(source = %source.name, urls = urls.len(), "Starting harvest");

        for url in urls {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            run.urls_attempted += 1;

            if let Err(err) = self.harvest_url(source, url, &mut run) {
                run.urls_failed += 1;
                tracing::warn!(url, error = %err, "Failed to harvest URL");
                run.errors.record(url, "Failed to harvest URL", &err);
            }
        }

        let removed = if cancelled {
            tracing::warn!(source = %source.name, "Harvest cancelled, skipping reconciliation");
            None
        } else {
            match self.indexer.cleanup_removed(&run.identifiers) {
                Ok(removed) => Some(removed),
                Err(err) => {
                    tracing::warn!(error = %err, "Reconciliation failed");
                    run.errors.record(source.name.as_str(), "Reconciliation failed", &err);
                    None
                }
            }
        };

        let report = HarvestReport {
            source: source.name.clone(),
            started_at,
            finished_at: Utc::now(),
            cancelled,
            urls_attempted: run.urls_attempted,
            urls_failed: run.urls_failed,
            pages_processed: run.pages_processed,
            records_processed: run.identifiers.len(),
            stats: run.stats,
            removed,
            errors: run.errors.into_errors(),
        };

        tracing::info!(
            source = %report.source,
            records = report.records_processed,
            added = report.stats.added,
            updated = report.stats.updated,
            unchanged = report.stats.unchanged,
            removed = report.removed.unwrap_or(0),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Harvest finished"
        );
        report
    }

    /// Harvest all pages of one configured URL.
    fn harvest_url(
        &mut self,
        source: &HarvestSource,
        url: &str,
        run: &mut HarvestRun,
    ) -> Result<()> {
        let raw = self.fetch_raw(url, None)?;
        let format = raw.format;
        let first = raw.parse()?;

        let total = match (source.total_count_path.as_deref(), format) {
            (None, _) | (_, Format::RdfXml) => None,
            (Some(expr), _) => match extract::total_count(&first, expr) {
                Ok(total) => Some(total),
                Err(err) => {
                    tracing::warn!(url, error = %err, "Total record count unavailable, paging disabled");
                    run.errors.record(url, "Total record count unavailable", &err);
                    None
                }
            },
        };

        let pages = paging::sequence(
            url,
            source.page_size_param.as_deref(),
            source.page_from_param.as_deref(),
            total,
        );
        tracing::info!(url, format = %format, total, pages = pages.len(), "Harvesting URL");

        if source.records_path.is_none() && !format.carries_records() {
            tracing::warn!(url, format = %format, "No records locator configured, nothing to extract");
            run.errors.record_message(url, "No records locator configured, nothing extracted");
            return Ok(());
        }

        let extractor = extract::extractor_for(format);
        let dispatch = TransformDispatch::new(
            source.transform_rule.as_deref(),
            format,
            &self.rules,
            self.transformer.as_deref(),
        );

        let mut first = Some(first);
        for page_url in &pages {
            let payload = match first.take() {
                Some(payload) => payload,
                None => self.fetch_raw(page_url, Some(format))?.parse()?,
            };

            let origin = RecordOrigin::from_url(page_url)?;
            let batch = {
                let mut context = ExtractContext::new(source, page_url, &origin, &mut run.errors);
                extractor.extract(&payload, &mut context)?
            };
            let batch = dispatch.apply_batch(batch, &mut run.errors);
            run.pages_processed += 1;
            tracing::debug!(url = %page_url, records = batch.len(), "Page extracted");

            match self.indexer.align(&batch, &mut run.errors) {
                Ok(stats) => {
                    run.stats += stats;
                    run.identifiers.extend(batch.ids().map(String::from));
                }
                Err(err) => {
                    tracing::warn!(url = %page_url, error = %err, "Indexer rejected page");
                    run.errors.record(page_url.as_str(), "Indexer rejected page", &err);
                }
            }
        }

        Ok(())
    }

    /// Fetch a URL and tag its text with a format.
    ///
    /// Later pages of a URL keep the format detected on its first page.
    fn fetch_raw(&self, url: &str, format: Option<Format>) -> Result<RawPayload> {
        let text = bytes_to_string(&self.fetcher.fetch(url)?);
        let format = format.unwrap_or_else(|| sniff::classify(&text));
        Ok(RawPayload {
            url: url.to_string(),
            text,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvesterError;
    use crate::types::{AlignStats, ErrorSink, RecordBatch};
    use std::cell::RefCell;
    use std::collections::{BTreeSet, HashMap};

    #[derive(Default)]
    struct MapFetcher {
        bodies: HashMap<String, String>,
        calls: RefCell<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_string(), body.to_string());
            self
        }
    }

    impl Fetcher for MapFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(url.to_string());
            self.bodies
                .get(url)
                .map(|b| b.as_bytes().to_vec())
                .ok_or_else(|| HarvesterError::RetriesExhausted {
                    attempts: 1,
                    message: format!("no body for {url}"),
                })
        }
    }

    #[derive(Default)]
    struct RecordingIndexer {
        batches: Vec<Vec<String>>,
        cleanups: Vec<BTreeSet<String>>,
    }

    impl Indexer for RecordingIndexer {
        fn align(&mut self, batch: &RecordBatch, _errors: &mut ErrorSink) -> Result<AlignStats> {
            self.batches.push(batch.ids().map(String::from).collect());
            Ok(AlignStats {
                added: batch.len(),
                ..AlignStats::default()
            })
        }

        fn cleanup_removed(&mut self, seen: &BTreeSet<String>) -> Result<usize> {
            self.cleanups.push(seen.clone());
            Ok(0)
        }
    }

    #[test]
    fn test_single_page_json() {
        let fetcher = MapFetcher::default().with(
            "https://example.org/api",
            r#"{"items": [{"id": "a"}, {"id": "b"}]}"#,
        );
        let mut harvester = Harvester::new(fetcher, RecordingIndexer::default());
        let source = HarvestSource::new("s", "https://example.org/api").with_records("items", "id");

        let report = harvester.run(&source, &AtomicBool::new(false));

        assert!(report.is_clean());
        assert_eq!(report.records_processed, 2);
        assert_eq!(report.stats.added, 2);
        assert_eq!(report.removed, Some(0));
        assert_eq!(harvester.indexer().batches, vec![vec!["a", "b"]]);
        assert_eq!(harvester.indexer().cleanups.len(), 1);
    }

    #[test]
    fn test_json_without_records_path_extracts_nothing() {
        let fetcher = MapFetcher::default().with("https://example.org/api", r#"{"items": []}"#);
        let mut harvester = Harvester::new(fetcher, RecordingIndexer::default());
        let source = HarvestSource::new("s", "https://example.org/api");

        let report = harvester.run(&source, &AtomicBool::new(false));

        assert_eq!(report.pages_processed, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].cause, None);
        assert!(harvester.indexer().batches.is_empty());
        assert_eq!(harvester.indexer().cleanups, vec![BTreeSet::new()]);
    }

    #[test]
    fn test_unparsable_page_fails_url_only() {
        let fetcher = MapFetcher::default()
            .with("https://a.example.org/api", "<broken")
            .with("https://b.example.org/api", r#"{"items": [{"id": "b"}]}"#);
        let mut harvester = Harvester::new(fetcher, RecordingIndexer::default());
        let source = HarvestSource::new("s", "https://a.example.org/api\nhttps://b.example.org/api")
            .with_records("items", "id");

        let report = harvester.run(&source, &AtomicBool::new(false));

        assert_eq!(report.urls_attempted, 2);
        assert_eq!(report.urls_failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].context, "https://a.example.org/api");
        assert_eq!(harvester.indexer().cleanups.len(), 1);
        assert!(harvester.indexer().cleanups[0].contains("b"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let fetcher = MapFetcher::default().with("https://example.org/api", "{}");
        let mut harvester = Harvester::new(fetcher, RecordingIndexer::default());
        let source = HarvestSource::new("s", "https://example.org/api").with_records("items", "id");

        let report = harvester.run(&source, &AtomicBool::new(true));

        assert!(report.cancelled);
        assert_eq!(report.urls_attempted, 0);
        assert_eq!(report.removed, None);
        assert!(harvester.fetcher().calls.borrow().is_empty());
        assert!(harvester.indexer().batches.is_empty());
        assert!(harvester.indexer().cleanups.is_empty());
    }
}
