use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid post type: '{0}'")]
    InvalidPostType(String),
    #[error("Invalid post status: '{0}'")]
    InvalidStatus(String),
    #[error("Template not found: {0}")]
    TemplateNotFound(u64),
    #[error("No CSV source is configured (neither local path nor remote URL is set)")]
    NoSourceReady,
    #[error("Configuration file error: {0}")]
    File(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("CSV file not found: {0}")]
    NotFound(String),
    #[error("CSV file not readable: {0}")]
    Unreadable(String),
    #[error("Remote source returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("Download failed: {0}")]
    Download(String),
    #[error("CSV file is empty")]
    Empty,
    #[error("CSV header row contains no column names")]
    EmptyHeader,
    #[error("Only one column detected, delimiter could not be determined")]
    SingleColumn,
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("CSV parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("Row {row}: title is empty")]
    MissingTitle { row: usize },
    #[error("Row {row}: failed to create post: {reason}")]
    CreateFailed { row: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("An import is already running (started {started_secs_ago}s ago)")]
    AlreadyRunning { started_secs_ago: i64 },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Health check failed: {0}")]
    Unhealthy(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for SourceError {
    fn from(e: csv::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}
