use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, error};
use crate::domain::{
    error::SourceError,
    models::CsvSource,
    ports::{LoadedSource, SourceFetcher},
};

pub struct HttpSourceFetcher {
    client: Client,
}

impl HttpSourceFetcher {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Download(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_local(&self, path: &Path) -> Result<LoadedSource, SourceError> {
        debug!("Checking local CSV file: {}", path.display());
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            error!("Local CSV file {} is not accessible: {}", path.display(), e);
            match e.kind() {
                std::io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
                _ => SourceError::Unreadable(format!("{}: {}", path.display(), e)),
            }
        })?;

        if !metadata.is_file() {
            return Err(SourceError::Unreadable(format!("{} is not a regular file", path.display())));
        }

        info!("Using local CSV file {} ({} bytes)", path.display(), metadata.len());
        Ok(LoadedSource::local(path.to_path_buf(), format!("local:{}", path.display())))
    }

    async fn fetch_remote(&self, url: &str) -> Result<LoadedSource, SourceError> {
        let download_url = normalize_remote_url(url);
        debug!("Downloading remote CSV from {}", download_url);

        let response = self.client.get(&download_url).send().await.map_err(|e| {
            error!("Failed to request {}: {}", download_url, e);
            SourceError::Download(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Remote CSV request to {} returned {}", download_url, status);
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                url: download_url,
            });
        }

        let (std_file, temp_path) = NamedTempFile::new()
            .map_err(|e| SourceError::Download(format!("cannot create temporary file: {}", e)))?
            .into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                error!("Download of {} interrupted: {}", download_url, e);
                SourceError::Download(e.to_string())
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SourceError::Download(e.to_string()))?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| SourceError::Download(e.to_string()))?;

        if bytes_written == 0 {
            error!("Remote CSV at {} is empty", download_url);
            return Err(SourceError::Empty);
        }

        info!("✅ Downloaded {} bytes from {} to {}", bytes_written, download_url, temp_path.display());
        Ok(LoadedSource::temporary(temp_path, format!("remote:{}", url)))
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, source: &CsvSource) -> Result<LoadedSource, SourceError> {
        match source {
            CsvSource::Local(path) => self.fetch_local(path).await,
            CsvSource::Remote(url) => self.fetch_remote(url).await,
        }
    }
}

/// Rewrites Dropbox share links to their direct-download form.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    if !url.contains("dropbox.com") {
        return url.to_string();
    }
    if url.contains("dl=0") {
        return url.replace("dl=0", "dl=1");
    }
    if url.contains("dl=1") || url.contains("raw=1") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}dl=1", url, separator)
}
