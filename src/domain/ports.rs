use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use crate::domain::{
    error::{ImportError, SourceError},
    models::{CsvSource, CsvTable, NewPost, PostId},
};

/// Persistent key-value storage for settings, progress, lock and statistics.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ImportError>;

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ImportError>;

    /// Atomically stores `value` only if `key` is absent. Returns whether the
    /// value was written.
    async fn put_if_absent(&self, key: &str, value: &serde_json::Value) -> Result<bool, ImportError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, ImportError>;

    /// Atomically removes `key` only while it still holds `expected`.
    /// Returns whether the value was removed.
    async fn compare_and_delete(&self, key: &str, expected: &serde_json::Value) -> Result<bool, ImportError>;
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn find_by_title(&self, post_type: &str, title: &str) -> Result<Option<PostId>, ImportError>;

    async fn create_post(&self, post: &NewPost) -> Result<PostId, ImportError>;

    async fn attach_image(&self, post_id: PostId, image_url: &str) -> Result<(), ImportError>;

    async fn template_exists(&self, template_id: u64) -> Result<bool, ImportError>;

    async fn count(&self, post_type: &str) -> Result<usize, ImportError>;
}

/// A CSV source made available on the local filesystem. A downloaded file is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub description: String,
    temp: Option<TempPath>,
}

impl LoadedSource {
    pub fn local(path: PathBuf, description: String) -> Self {
        Self { path, description, temp: None }
    }

    pub fn temporary(temp: TempPath, description: String) -> Self {
        Self {
            path: temp.to_path_buf(),
            description,
            temp: Some(temp),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &CsvSource) -> Result<LoadedSource, SourceError>;
}

pub trait CsvParser: Send + Sync {
    fn parse_file(&self, path: &Path) -> Result<CsvTable, SourceError>;

    fn parse_bytes(&self, bytes: &[u8]) -> Result<CsvTable, SourceError>;
}
