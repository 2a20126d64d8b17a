//! Hand-off of harvested records to the catalog.
//!
//! The harvester talks to the catalog through [`Indexer`]. The shipped
//! [`DirectoryIndexer`] keeps one XML file per record identifier in a
//! directory, which is enough for inspecting harvests and for feeding a
//! downstream loader.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HarvesterError, Result};
use crate::ident;
use crate::types::{AlignStats, ErrorSink, RecordBatch};

/// File extension of stored records.
const RECORD_EXTENSION: &str = "xml";

/// Longest identifier used verbatim as a file name.
const MAX_FILE_STEM_LEN: usize = 120;

/// Reconciliation and indexing layer.
pub trait Indexer {
    /// Insert or update every record of a batch.
    ///
    /// Failures for single records go to `errors`; an `Err` means the whole
    /// batch was rejected.
    fn align(&mut self, batch: &RecordBatch, errors: &mut ErrorSink) -> Result<AlignStats>;

    /// Remove every indexed record whose identifier is not in `seen`.
    ///
    /// # Returns
    /// Number of records removed.
    fn cleanup_removed(&mut self, seen: &BTreeSet<String>) -> Result<usize>;
}

/// Stores each record as `<dir>/<identifier>.xml`.
#[derive(Debug, Clone)]
pub struct DirectoryIndexer {
    dir: PathBuf,
}

impl DirectoryIndexer {
    /// Open (and create if needed) an output directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(HarvesterError::Index(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a record with identifier `id` is stored at.
    #[must_use]
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXTENSION}", file_stem(id)))
    }
}

/// File stem for an identifier: the identifier itself when it is a safe
/// name, its content hash otherwise.
fn file_stem(id: &str) -> String {
    let safe = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe && !id.is_empty() && id.len() <= MAX_FILE_STEM_LEN && !id.starts_with('.') {
        id.to_string()
    } else {
        ident::content_hash(id)
    }
}

impl Indexer for DirectoryIndexer {
    fn align(&mut self, batch: &RecordBatch, errors: &mut ErrorSink) -> Result<AlignStats> {
        let mut stats = AlignStats::default();

        for (id, record) in batch.iter() {
            let path = self.record_path(id);
            let content = record.to_xml_string();

            let existing = match fs::read_to_string(&path) {
                Ok(existing) => Some(existing),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    errors.record(format!("record {id}"), "Failed to read indexed record", &e);
                    continue;
                }
            };

            if existing.as_deref() == Some(content.as_str()) {
                stats.unchanged += 1;
                continue;
            }

            if let Err(e) = fs::write(&path, &content) {
                errors.record(format!("record {id}"), "Failed to write record", &e);
                continue;
            }
            if existing.is_some() {
                stats.updated += 1;
            } else {
                stats.added += 1;
            }
        }

        tracing::debug!(
            added = stats.added,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "Aligned batch"
        );
        Ok(stats)
    }

    fn cleanup_removed(&mut self, seen: &BTreeSet<String>) -> Result<usize> {
        if seen.is_empty() {
            tracing::warn!(
                dir = %self.dir.display(),
                "No records harvested, keeping existing records"
            );
            return Ok(0);
        }

        let keep: BTreeSet<PathBuf> = seen.iter().map(|id| self.record_path(id)).collect();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION);
            if is_record && !keep.contains(&path) {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "Removed record");
                removed += 1;
            }
        }

        tracing::info!(removed, "Removed records no longer in source");
        Ok(removed)
    }
}
