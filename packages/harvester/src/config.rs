//! Configuration for the harvester: constants, source definitions and
//! environment settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{HarvesterError, Result};

/// HTTP timeout in seconds.
///
/// Catalog endpoints can be slow to render large pages.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// User agent string identifying this harvester.
pub const USER_AGENT: &str = concat!("simpleurl-harvester/", env!("CARGO_PKG_VERSION"));

/// Maximum number of attempts for transient HTTP failures.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Largest page sequence built for one URL. A source reporting more pages is
/// harvested from its first page only.
pub const MAX_PAGES: u64 = 10_000;

/// Directory searched first for transformation rules.
pub const DEFAULT_RULES_DIR: &str = "rules";

/// Directory holding per-format fallback rules (`<dir>/<format>/<rule>.xsl`).
pub const DEFAULT_FALLBACK_RULES_DIR: &str = "rules/formats";

/// XSLT processor invoked for transformations.
pub const DEFAULT_XSLTPROC: &str = "xsltproc";

/// One configured endpoint to harvest.
///
/// Empty strings are treated as "not configured", so a YAML file can list
/// every key and leave the unused ones blank.
///
/// # Examples
/// ```
/// use simpleurl_harvester::config::HarvestSource;
///
/// let source = HarvestSource::from_yaml_str(r#"
/// name: open-data
/// url: https://data.example.org/api/3/action/package_search?rows=10&start=0
/// page_size_param: rows
/// page_from_param: start
/// total_count_path: /result/count
/// records_path: /result/results
/// record_id_path: id
/// "#).unwrap();
///
/// assert_eq!(source.urls().len(), 1);
/// assert_eq!(source.page_size_param.as_deref(), Some("rows"));
/// assert_eq!(source.transform_rule, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestSource {
    /// Name used in logs and reports.
    pub name: String,
    /// One or more URLs, separated by newlines.
    pub url: String,
    /// Query parameter holding the page size.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page_size_param: Option<String>,
    /// Query parameter holding the offset of the first record of a page.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page_from_param: Option<String>,
    /// Locator of the total number of records in the first response.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub total_count_path: Option<String>,
    /// Locator of the repeating record nodes.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub records_path: Option<String>,
    /// Locator of the identifier, relative to a record.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub record_id_path: Option<String>,
    /// Transformation rule applied to every record.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub transform_rule: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    Some(value.into()).filter(|s| !s.trim().is_empty())
}

impl HarvestSource {
    /// Create a source for one or more newline-separated URLs.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the paging query parameters.
    #[must_use]
    pub fn with_paging(mut self, size_param: &str, from_param: &str) -> Self {
        self.page_size_param = non_empty(size_param);
        self.page_from_param = non_empty(from_param);
        self
    }

    /// Set the total count locator.
    #[must_use]
    pub fn with_total_count_path(mut self, path: &str) -> Self {
        self.total_count_path = non_empty(path);
        self
    }

    /// Set the records and identifier locators.
    #[must_use]
    pub fn with_records(mut self, records_path: &str, record_id_path: &str) -> Self {
        self.records_path = non_empty(records_path);
        self.record_id_path = non_empty(record_id_path);
        self
    }

    /// Set the transformation rule.
    #[must_use]
    pub fn with_transform_rule(mut self, rule: &str) -> Self {
        self.transform_rule = non_empty(rule);
        self
    }

    /// Configured URLs in order, trimmed, blank lines skipped.
    #[must_use]
    pub fn urls(&self) -> Vec<&str> {
        self.url
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Check that the source can be harvested.
    ///
    /// # Returns
    /// * `Ok(())` if valid
    /// * `Err(HarvesterError::Config)` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarvesterError::Config("source name is empty".to_string()));
        }
        if self.urls().is_empty() {
            return Err(HarvesterError::Config(format!(
                "source '{}' has no URL",
                self.name
            )));
        }
        if self.page_size_param.is_some() && self.page_from_param.is_none() {
            return Err(HarvesterError::Config(format!(
                "source '{}' sets page_size_param without page_from_param",
                self.name
            )));
        }
        Ok(())
    }

    /// Parse and validate a source from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let source: Self = serde_yaml_ng::from_str(yaml)?;
        source.validate()?;
        Ok(source)
    }

    /// Read, parse and validate a source from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}

/// Process-wide settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterSettings {
    pub http_timeout_secs: u64,
    pub rules_dir: PathBuf,
    pub fallback_rules_dir: PathBuf,
    pub xsltproc: String,
}

impl Default for HarvesterSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            rules_dir: PathBuf::from(DEFAULT_RULES_DIR),
            fallback_rules_dir: PathBuf::from(DEFAULT_FALLBACK_RULES_DIR),
            xsltproc: DEFAULT_XSLTPROC.to_string(),
        }
    }
}

impl HarvesterSettings {
    /// Load settings from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let http_timeout_secs = lookup("HARVESTER_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.http_timeout_secs);

        let rules_dir = lookup("HARVESTER_RULES_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.rules_dir);

        let fallback_rules_dir = lookup("HARVESTER_FALLBACK_RULES_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.fallback_rules_dir);

        let xsltproc = lookup("HARVESTER_XSLTPROC").unwrap_or(defaults.xsltproc);

        Self {
            http_timeout_secs,
            rules_dir,
            fallback_rules_dir,
            xsltproc,
        }
    }
}
