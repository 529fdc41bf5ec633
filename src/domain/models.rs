use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One parsed CSV data line: header name to trimmed value.
pub type Record = BTreeMap<String, String>;

pub type PostId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(SourceKind::Local),
            "remote" | "url" | "dropbox" => Ok(SourceKind::Remote),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Local => f.write_str("local"),
            SourceKind::Remote => f.write_str("remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum CsvSource {
    Local(PathBuf),
    Remote(String),
}

impl CsvSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            CsvSource::Local(_) => SourceKind::Local,
            CsvSource::Remote(_) => SourceKind::Remote,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CsvSource::Local(path) => format!("local:{}", path.display()),
            CsvSource::Remote(url) => format!("remote:{}", url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// `None` means unlimited.
    pub memory_limit_bytes: Option<u64>,
    /// `None` means unlimited.
    pub max_execution_secs: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: Some(256 * 1024 * 1024),
            max_execution_secs: Some(300),
        }
    }
}

/// Persisted importer settings. Every field has a default so a partially
/// written settings record still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub post_type: String,
    pub post_status: String,
    pub template_id: Option<u64>,
    pub local_path: Option<String>,
    pub remote_url: Option<String>,
    pub required_columns: Vec<String>,
    pub skip_duplicates: bool,
    pub import_images: bool,
    pub limits: ResourceLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            post_type: "post".to_string(),
            post_status: "draft".to_string(),
            template_id: None,
            local_path: None,
            remote_url: None,
            required_columns: vec!["post_title".to_string()],
            skip_duplicates: true,
            import_images: true,
            limits: ResourceLimits::default(),
        }
    }
}

/// Immutable per-run snapshot of the validated settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub post_type: String,
    pub post_status: String,
    pub template_id: Option<u64>,
    pub source: CsvSource,
    pub required_columns: Vec<String>,
    pub skip_duplicates: bool,
    pub import_images: bool,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
    pub delimiter: char,
    pub total_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceValidation {
    pub source: String,
    pub headers: Vec<String>,
    pub delimiter: char,
    pub total_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub post_type: String,
    pub status: String,
    pub title: String,
    pub content: String,
    pub template_id: Option<u64>,
    pub meta: BTreeMap<String, String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Created(PostId),
    Skipped(PostId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub processed: usize,
    pub total: usize,
    pub errors: usize,
    pub created: usize,
    pub skipped: usize,
    pub message: String,
}

impl ImportResult {
    pub fn not_started(message: impl Into<String>) -> Self {
        Self {
            success: false,
            processed: 0,
            total: 0,
            errors: 0,
            created: 0,
            skipped: 0,
            message: message.into(),
        }
    }
}
