use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, error};
use crate::domain::{error::ConfigError, models::Settings};

pub const ENV_DATA_DIR: &str = "CSV_IMPORTER_DATA_DIR";
pub const ENV_LOG: &str = "CSV_IMPORTER_LOG";
pub const ENV_BACKEND: &str = "CSV_IMPORTER_BACKEND";
pub const ENV_UPLOAD_DIR: &str = "CSV_IMPORTER_UPLOAD_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    File,
    Memory,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Backend::File),
            "memory" => Ok(Backend::Memory),
            other => Err(ConfigError::File(format!("unknown backend '{}'", other))),
        }
    }
}

/// Process-level configuration. Plugin settings live in the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: Backend,
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/uploads`.
    pub upload_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub http_timeout_secs: u64,
    pub scheduler_poll_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::File,
            data_dir: PathBuf::from("data"),
            upload_dir: None,
            log_filter: None,
            http_timeout_secs: 30,
            scheduler_poll_secs: 60,
        }
    }
}

impl AppConfig {
    /// Reads the YAML file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading application config from {}", path.display());
                let text = std::fs::read_to_string(path).map_err(|e| {
                    error!("Failed to read config file {}: {}", path.display(), e);
                    ConfigError::File(format!("{}: {}", path.display(), e))
                })?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        info!("Using {:?} backend with data dir {}", config.backend, config.data_dir.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::File(format!("invalid YAML: {}", e)))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            debug!("{} overrides data dir: {}", ENV_DATA_DIR, dir);
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_UPLOAD_DIR).filter(|v| !v.is_empty()) {
            self.upload_dir = Some(PathBuf::from(dir));
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log_filter = Some(filter);
        }
        if let Some(backend) = lookup(ENV_BACKEND).filter(|v| !v.is_empty()) {
            self.backend = backend.parse()?;
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn posts_dir(&self) -> PathBuf {
        self.data_dir.join("posts")
    }
}

/// Reads import settings from a YAML document, filling omitted fields with defaults.
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
    serde_yaml::from_str(&text).map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))
}
