use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn, error};
use crate::domain::{
    error::{ConfigError, ImportError},
    models::{CsvSource, ImportConfig, Settings, SourceKind},
    ports::{PostRepository, StateRepository},
};
use crate::infrastructure::cache::MemoryCache;

pub const SETTINGS_KEY: &str = "settings";
pub const VALID_STATUSES: [&str; 4] = ["publish", "draft", "pending", "private"];

const CONFIG_NAMESPACE: &str = "config";
const TEMPLATE_NAMESPACE: &str = "templates";
/// Cached source validations. Any settings change invalidates them.
pub const VALIDATION_NAMESPACE: &str = "validation";
const CONFIG_TTL: Duration = Duration::from_secs(300);

fn post_type_pattern() -> &'static Regex {
    static POST_TYPE: OnceLock<Regex> = OnceLock::new();
    POST_TYPE.get_or_init(|| Regex::new(r"^[a-z0-9_-]{1,20}$").expect("post type pattern is valid"))
}

pub struct ConfigLoader {
    state_repo: Arc<dyn StateRepository>,
    posts: Arc<dyn PostRepository>,
    cache: Arc<MemoryCache>,
}

impl ConfigLoader {
    pub fn new(
        state_repo: Arc<dyn StateRepository>,
        posts: Arc<dyn PostRepository>,
        cache: Arc<MemoryCache>,
    ) -> Self {
        Self { state_repo, posts, cache }
    }

    pub async fn load_settings(&self) -> Result<Settings, ImportError> {
        if let Some(settings) = self.cache.get::<Settings>(CONFIG_NAMESPACE, SETTINGS_KEY) {
            debug!("Settings served from cache");
            return Ok(settings);
        }

        let settings = match self.state_repo.get(SETTINGS_KEY).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                error!("Stored settings are malformed: {}", e);
                ImportError::Config(ConfigError::File(format!("stored settings: {}", e)))
            })?,
            None => {
                debug!("No settings stored, using defaults");
                Settings::default()
            }
        };

        self.cache.set(CONFIG_NAMESPACE, SETTINGS_KEY, &settings, CONFIG_TTL);
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), ImportError> {
        self.state_repo
            .put(SETTINGS_KEY, &serde_json::to_value(settings)?)
            .await?;
        self.cache.flush_namespace(CONFIG_NAMESPACE);
        self.cache.flush_namespace(TEMPLATE_NAMESPACE);
        self.cache.flush_namespace(VALIDATION_NAMESPACE);
        info!("Settings saved (post type '{}', status '{}')", settings.post_type, settings.post_status);
        Ok(())
    }

    /// Loads and validates the settings into an immutable per-run snapshot.
    /// `requested` picks a source kind; otherwise remote wins over local.
    pub async fn load(&self, requested: Option<SourceKind>) -> Result<ImportConfig, ImportError> {
        let settings = self.load_settings().await?;
        debug!("Validating settings: {:?}", settings);

        if !post_type_pattern().is_match(&settings.post_type) {
            warn!("Rejecting invalid post type '{}'", settings.post_type);
            return Err(ConfigError::InvalidPostType(settings.post_type).into());
        }

        if !VALID_STATUSES.contains(&settings.post_status.as_str()) {
            warn!("Rejecting invalid post status '{}'", settings.post_status);
            return Err(ConfigError::InvalidStatus(settings.post_status).into());
        }

        if let Some(template_id) = settings.template_id {
            if !self.template_exists(template_id).await? {
                warn!("Configured template {} does not exist", template_id);
                return Err(ConfigError::TemplateNotFound(template_id).into());
            }
        }

        let source = select_source(&settings, requested)?;
        info!("Loaded import configuration for source {}", source.describe());

        Ok(ImportConfig {
            post_type: settings.post_type,
            post_status: settings.post_status,
            template_id: settings.template_id,
            source,
            required_columns: settings.required_columns,
            skip_duplicates: settings.skip_duplicates,
            import_images: settings.import_images,
            limits: settings.limits,
        })
    }

    async fn template_exists(&self, template_id: u64) -> Result<bool, ImportError> {
        let key = template_id.to_string();
        if let Some(true) = self.cache.get::<bool>(TEMPLATE_NAMESPACE, &key) {
            return Ok(true);
        }
        let exists = self.posts.template_exists(template_id).await?;
        if exists {
            self.cache.set(TEMPLATE_NAMESPACE, &key, &true, CONFIG_TTL);
        }
        Ok(exists)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn select_source(settings: &Settings, requested: Option<SourceKind>) -> Result<CsvSource, ConfigError> {
    let local = non_empty(&settings.local_path).map(|p| CsvSource::Local(PathBuf::from(p)));
    let remote = non_empty(&settings.remote_url).map(|u| CsvSource::Remote(u.to_string()));

    let selected = match requested {
        Some(SourceKind::Local) => local,
        Some(SourceKind::Remote) => remote,
        None => remote.or(local),
    };
    selected.ok_or(ConfigError::NoSourceReady)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NewPost;
    use crate::infrastructure::posts::MemoryPostRepository;
    use crate::infrastructure::store::MemoryStateRepository;
    use std::collections::BTreeMap;

    struct Fixture {
        state: Arc<MemoryStateRepository>,
        posts: Arc<MemoryPostRepository>,
        loader: ConfigLoader,
    }

    fn fixture() -> Fixture {
        let state = Arc::new(MemoryStateRepository::new());
        let posts = Arc::new(MemoryPostRepository::new());
        let loader = ConfigLoader::new(state.clone(), posts.clone(), Arc::new(MemoryCache::new(1 << 20)));
        Fixture { state, posts, loader }
    }

    fn settings_with_local() -> Settings {
        Settings {
            local_path: Some("/data/import.csv".to_string()),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_defaults_without_source_are_not_ready() {
        let f = fixture();
        let settings = f.loader.load_settings().await.unwrap();
        assert_eq!(settings, Settings::default());
        assert!(matches!(
            f.loader.load(None).await,
            Err(ImportError::Config(ConfigError::NoSourceReady))
        ));
    }

    #[tokio::test]
    async fn test_partial_settings_fill_defaults() {
        let f = fixture();
        f.state
            .put(SETTINGS_KEY, &serde_json::json!({"post_type": "product", "local_path": "/a.csv"}))
            .await
            .unwrap();
        let config = f.loader.load(None).await.unwrap();
        assert_eq!(config.post_type, "product");
        assert_eq!(config.post_status, "draft");
        assert!(config.skip_duplicates);
        assert_eq!(config.source, CsvSource::Local(PathBuf::from("/a.csv")));
    }

    #[tokio::test]
    async fn test_invalid_post_type_and_status() {
        let f = fixture();
        let mut settings = settings_with_local();
        settings.post_type = "Bad Type!".to_string();
        f.loader.save_settings(&settings).await.unwrap();
        assert!(matches!(
            f.loader.load(None).await,
            Err(ImportError::Config(ConfigError::InvalidPostType(_)))
        ));

        settings.post_type = "post".to_string();
        settings.post_status = "archived".to_string();
        f.loader.save_settings(&settings).await.unwrap();
        assert!(matches!(
            f.loader.load(None).await,
            Err(ImportError::Config(ConfigError::InvalidStatus(_)))
        ));
    }

    #[tokio::test]
    async fn test_template_must_exist() {
        let f = fixture();
        let mut settings = settings_with_local();
        settings.template_id = Some(1);
        f.loader.save_settings(&settings).await.unwrap();
        assert!(matches!(
            f.loader.load(None).await,
            Err(ImportError::Config(ConfigError::TemplateNotFound(1)))
        ));

        f.posts
            .create_post(&NewPost {
                post_type: "template".to_string(),
                status: "publish".to_string(),
                title: "Layout".to_string(),
                content: String::new(),
                template_id: None,
                meta: BTreeMap::new(),
                image_url: None,
            })
            .await
            .unwrap();
        assert_eq!(f.loader.load(None).await.unwrap().template_id, Some(1));
    }

    #[tokio::test]
    async fn test_source_selection() {
        let f = fixture();
        let settings = Settings {
            local_path: Some("/a.csv".to_string()),
            remote_url: Some("https://example.com/b.csv".to_string()),
            ..Settings::default()
        };
        f.loader.save_settings(&settings).await.unwrap();

        let default = f.loader.load(None).await.unwrap();
        assert_eq!(default.source.kind(), SourceKind::Remote);
        let local = f.loader.load(Some(SourceKind::Local)).await.unwrap();
        assert_eq!(local.source, CsvSource::Local(PathBuf::from("/a.csv")));

        let only_local = settings_with_local();
        f.loader.save_settings(&only_local).await.unwrap();
        assert!(matches!(
            f.loader.load(Some(SourceKind::Remote)).await,
            Err(ImportError::Config(ConfigError::NoSourceReady))
        ));
    }

    #[tokio::test]
    async fn test_saving_invalidates_cached_settings() {
        let f = fixture();
        f.loader.load_settings().await.unwrap();
        let mut settings = settings_with_local();
        settings.post_type = "page".to_string();
        f.loader.save_settings(&settings).await.unwrap();
        assert_eq!(f.loader.load_settings().await.unwrap().post_type, "page");
    }
}
