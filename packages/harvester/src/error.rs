//! Error types for the harvester.
//!
//! Uses the dual-error pattern: `HarvesterError` for library consumers
//! with detailed error context, and [`HarvestError`](crate::types::HarvestError)
//! entries for the recoverable failures collected during a run.

use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: '{0}'")]
    InvalidUrl(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to fetch a page of a source.
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// All retry attempts failed.
    #[error("Request failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// XML parsing failed.
    #[error("XML parsing failed: {0}")]
    XmlParse(#[from] roxmltree::Error),

    /// JSON parsing failed.
    #[error("JSON parsing failed: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Locator expression could not be parsed or applied to this payload.
    #[error("Invalid locator '{expression}': {reason}")]
    InvalidLocator { expression: String, reason: String },

    /// Locator did not select anything usable.
    #[error("Nothing found at '{expression}'{}", .context.as_ref().map(|c| format!(" in {c}")).unwrap_or_default())]
    LocatorMissing {
        expression: String,
        context: Option<String>,
    },

    /// Payload kind does not match the extractor.
    #[error("Expected a {expected} payload")]
    UnexpectedPayload { expected: &'static str },

    /// Record identifier could not be derived.
    #[error("Cannot resolve record identifier at '{expression}': {reason}")]
    IdResolution { expression: String, reason: String },

    /// Transformation rule was not found in any rule location.
    #[error("Transformation rule '{0}' not found")]
    RuleNotFound(String),

    /// External transformation failed.
    #[error("Transformation '{rule}' failed: {message}")]
    Transform { rule: String, message: String },

    /// Indexer could not store or reconcile records.
    #[error("Indexer error: {0}")]
    Index(String),

    /// Invalid harvester configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;
