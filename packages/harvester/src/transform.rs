//! Optional per-record transformation through an external rule engine.
//!
//! A source may name a transformation rule (an XSLT stylesheet). Rules are
//! looked up in the primary rules directory first, then in a per-format
//! fallback directory. A record whose transformation fails is dropped from
//! its batch; the rest of the batch moves on.

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{HarvesterError, Result};
use crate::tree::Element;
use crate::types::{ErrorSink, Format, RecordBatch, XmlDocument};

/// Rule file extensions recognised as already naming a file.
const RULE_EXTENSIONS: [&str; 2] = ["xsl", "xslt"];

/// Applies a stylesheet to a record tree.
pub trait Transformer {
    /// Transform `record` with the stylesheet at `stylesheet`.
    ///
    /// # Arguments
    /// * `record` - Record tree, serialized as the input document
    /// * `stylesheet` - Resolved rule file
    /// * `params` - String parameters passed to the stylesheet
    fn transform(&self, record: &Element, stylesheet: &Path, params: &[(&str, &str)]) -> Result<Element>;
}

/// Locates rule files on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRegistry {
    primary: PathBuf,
    fallback: PathBuf,
}

impl RuleRegistry {
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// Find the file for `rule`.
    ///
    /// Looks for `<primary>/<rule>.xsl` (or `<primary>/<rule>` when the rule
    /// already has a stylesheet extension), then for
    /// `<fallback>/<format>/<rule>.xsl`.
    ///
    /// # Returns
    /// * `Ok(path)` of the first existing candidate
    /// * `Err(HarvesterError::RuleNotFound)` if there is none, or if the rule
    ///   tries to leave the rule directories
    pub fn locate(&self, rule: &str, format: Format) -> Result<PathBuf> {
        let relative = Path::new(rule);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if rule.trim().is_empty() || escapes {
            return Err(HarvesterError::RuleNotFound(rule.to_string()));
        }

        let has_extension = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| RULE_EXTENSIONS.contains(&ext));
        let file_name = if has_extension {
            rule.to_string()
        } else {
            format!("{rule}.xsl")
        };

        let candidates = [
            self.primary.join(&file_name),
            self.fallback.join(format.as_str()).join(&file_name),
        ];
        for candidate in candidates {
            if candidate.is_file() {
                return Ok(candidate);
            }
            tracing::debug!(rule, path = %candidate.display(), "Rule not found at location");
        }
        Err(HarvesterError::RuleNotFound(rule.to_string()))
    }
}

/// Per-URL transformation step: identity without a rule.
pub struct TransformDispatch<'a> {
    rule: Option<&'a str>,
    format: Format,
    registry: &'a RuleRegistry,
    engine: Option<&'a dyn Transformer>,
}

impl<'a> TransformDispatch<'a> {
    pub fn new(
        rule: Option<&'a str>,
        format: Format,
        registry: &'a RuleRegistry,
        engine: Option<&'a dyn Transformer>,
    ) -> Self {
        Self {
            rule,
            format,
            registry,
            engine,
        }
    }

    /// Transform one record, passing its identifier as the `uuid` parameter.
    pub fn apply(&self, record: Element, id: &str) -> Result<Element> {
        let Some(rule) = self.rule else {
            return Ok(record);
        };
        let engine = self.engine.ok_or_else(|| HarvesterError::Transform {
            rule: rule.to_string(),
            message: "no transformation engine configured".to_string(),
        })?;

        let stylesheet = self.registry.locate(rule, self.format)?;
        engine.transform(&record, &stylesheet, &[("uuid", id)])
    }

    /// Transform every record of a batch.
    ///
    /// Records that fail are dropped, with one error recorded each.
    pub fn apply_batch(&self, batch: RecordBatch, errors: &mut ErrorSink) -> RecordBatch {
        if self.rule.is_none() {
            return batch;
        }

        let mut out = RecordBatch::new();
        for (id, record) in batch {
            match self.apply(record, &id) {
                Ok(transformed) => {
                    out.insert(id, transformed);
                }
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "Transformation failed, dropping record");
                    errors.record(format!("record {id}"), "Transformation failed", &err);
                }
            }
        }
        out
    }
}

/// Runs stylesheets through an external `xsltproc` process.
#[derive(Debug, Clone)]
pub struct XsltProcTransformer {
    program: String,
}

impl XsltProcTransformer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Transformer for XsltProcTransformer {
    fn transform(&self, record: &Element, stylesheet: &Path, params: &[(&str, &str)]) -> Result<Element> {
        let rule = stylesheet.display().to_string();
        let failed = |message: String| HarvesterError::Transform {
            rule: rule.clone(),
            message,
        };

        let mut command = Command::new(&self.program);
        for (name, value) in params {
            command.arg("--stringparam").arg(name).arg(value);
        }
        command
            .arg(stylesheet)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        tracing::debug!(program = %self.program, stylesheet = %rule, "Running transformation");

        let mut child = command
            .spawn()
            .map_err(|e| failed(format!("failed to execute {}: {e}", self.program)))?;
        // stdin is closed before waiting; a write error is reported only once
        // the child has been reaped
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(record.to_xml_string().as_bytes()),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(failed(format!(
                "{} exited with code {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        if !stderr.is_empty() {
            tracing::debug!(stderr = %stderr, "xsltproc stderr (non-fatal)");
        }
        written.map_err(|e| failed(format!("failed to write record to {}: {e}", self.program)))?;

        XmlDocument::parse(&stdout)
            .map(|doc| doc.root)
            .map_err(|e| failed(format!("output is not XML: {e}")))
    }
}
