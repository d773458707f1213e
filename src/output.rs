//! Result types produced by a batch run.

use crate::error::CompanyError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Generated values for one company, keyed by placeholder identifier.
///
/// Values keep their JSON shape (lists, nested objects) so the persisted
/// `_data.json` artifact matches what the generative service returned.
/// Flattening to text happens only at merge time via [`FieldValues::text`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(Map<String, Value>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The value for `key` flattened to display text.
    pub fn text(&self, key: &str) -> Option<String> {
        self.0.get(key).map(value_to_text)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for FieldValues {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Flatten a JSON value to the text that goes into the document.
///
/// Lists become comma-separated, objects contribute their non-empty
/// values, and `null` renders as `N/A`.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "N/A".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .values()
            .filter(|v| !is_empty_value(v))
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// A retrieved logo image for one company.
#[derive(Clone, PartialEq, Eq)]
pub struct AssetReference {
    /// File name the merged document references (`<safe_name>_logo.png`).
    pub file_name: String,
    /// PNG bytes.
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Where the image came from, when fetched from the network.
    pub source_url: Option<String>,
}

impl std::fmt::Debug for AssetReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetReference")
            .field("file_name", &self.file_name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("content_type", &self.content_type)
            .field("source_url", &self.source_url)
            .finish()
    }
}

/// What happened during the logo phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LogoOutcome {
    /// Downloaded from the given URL.
    Found { url: String },
    /// An existing logo file in the output directory was reused.
    Reused,
    /// The search returned no usable candidate.
    Missing,
    /// Search or download failed; the profile was built without a logo.
    Failed { reason: String },
    /// Logo lookup is disabled.
    Disabled,
}

impl LogoOutcome {
    pub fn has_logo(&self) -> bool {
        matches!(self, LogoOutcome::Found { .. } | LogoOutcome::Reused)
    }
}

/// Paths of the artifacts written for one company.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyArtifacts {
    pub data_json: Option<PathBuf>,
    pub logo: Option<PathBuf>,
    pub html: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
}

/// Outcome of the pipeline for a single company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyResult {
    /// Company name as supplied (trimmed).
    pub company: String,
    /// Filename-safe stem used for all artifacts.
    pub safe_name: String,
    /// Generated values; empty when generation failed or no fields were requested.
    pub fields: FieldValues,
    /// Requested fields the generative service did not return.
    pub missing_fields: Vec<String>,
    pub logo: LogoOutcome,
    pub artifacts: CompanyArtifacts,
    pub duration_ms: u64,
    /// Set when any phase failed. Earlier artifacts may still exist.
    pub error: Option<CompanyError>,
}

impl CompanyResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counters for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_companies: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Companies never started because the batch was stopped.
    pub skipped: usize,
    pub logos_found: usize,
    pub total_duration_ms: u64,
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub template: PathBuf,
    /// Placeholders found in the template, sorted.
    pub placeholders: Vec<String>,
    /// The subset requested from the generative service.
    pub requested_fields: Vec<String>,
    pub output_dir: PathBuf,
    pub companies: Vec<CompanyResult>,
    pub stats: BatchStats,
    /// True when the batch ended early because of a stop request.
    pub stopped: bool,
}

impl BatchOutput {
    /// Treat any per-company failure as an error.
    pub fn into_result(self) -> Result<Self, crate::error::ProfileError> {
        if self.stats.failed > 0 {
            return Err(crate::error::ProfileError::PartialFailure {
                succeeded: self.stats.succeeded,
                failed: self.stats.failed,
                total: self.stats.total_companies,
            });
        }
        Ok(self)
    }
}
