//! Simple URL harvester - Harvest metadata records from plain HTTP endpoints.
//!
//! This crate pulls metadata records from endpoints that serve JSON, XML,
//! RDF/XML or STAC, normalizes every record into a generic XML tree and
//! hands the records to an indexer keyed by a stable identifier.
//!
//! # Example
//!
//! ```
//! use simpleurl_harvester::{paging, sniff, types::Format};
//!
//! assert_eq!(sniff::classify(r#"{"type": "Feature", "properties": {}}"#), Format::Stac);
//!
//! let pages = paging::sequence("https://example.org/api?rows=10&start=0", Some("rows"), Some("start"), Some(15));
//! assert_eq!(pages.len(), 2);
//! ```
//!
//! # Architecture
//!
//! The harvester is organized into several modules:
//!
//! - [`config`]: Source definitions, settings and constants
//! - [`types`]: Core data types (payloads, batches, reports)
//! - [`error`]: Error types and Result alias
//! - [`http`]: HTTP transport
//! - [`tree`]: Generic record tree
//! - [`locator`]: JSON and XML path expressions
//! - [`sniff`]: Content format detection
//! - [`paging`]: Page URL sequencing
//! - [`ident`]: Record identifier derivation
//! - [`extract`]: Per-format record extraction
//! - [`transform`]: Optional stylesheet transformation
//! - [`indexer`]: Record hand-off and reconciliation
//! - [`harvester`]: Main harvester service
//! - [`cli`]: Command-line interface

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod harvester;
pub mod http;
pub mod ident;
pub mod indexer;
pub mod locator;
pub mod paging;
pub mod sniff;
pub mod transform;
pub mod tree;
pub mod types;

// Re-export main entry points
pub use harvester::Harvester;
pub use indexer::{DirectoryIndexer, Indexer};

// Re-export commonly used items
pub use config::HarvestSource;
pub use error::{HarvesterError, Result};
pub use types::{Format, HarvestReport, RecordBatch};
