use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, debug, error};
use crate::{
    application::{
        admin_service::AdminService,
        config_loader::{ConfigLoader, SETTINGS_KEY},
        health::{HealthChecker, HostEnvironment},
        import_service::ImportService,
        progress_store::ProgressStore,
        scheduler::Scheduler,
        statistics::StatisticsService,
    },
    config::{AppConfig, Backend},
    domain::{
        error::{ImportError, SourceError},
        models::{ResourceLimits, Settings},
        ports::{PostRepository, StateRepository},
    },
    infrastructure::{
        cache::MemoryCache,
        parsers::StreamingCsvParser,
        posts::{FilePostRepository, MemoryPostRepository},
        source::HttpSourceFetcher,
        store::{FileStateRepository, MemoryStateRepository},
    },
};

/// Fully wired application services.
pub struct App {
    pub admin: AdminService,
    pub scheduler: Arc<Scheduler>,
    pub poll_interval: Duration,
}

impl App {
    pub async fn build(config: &AppConfig) -> Result<Self, ImportError> {
        debug!("Initializing application services");

        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| {
                error!("Failed to build HTTP client: {}", e);
                SourceError::Download(e.to_string())
            })?;
        debug!("HTTP client initialized (timeout {}s)", config.http_timeout_secs);

        let upload_dir = config.upload_dir();
        tokio::fs::create_dir_all(&upload_dir).await.map_err(|e| {
            error!("Failed to create upload dir {}: {}", upload_dir.display(), e);
            e
        })?;

        let (state_repo, posts): (Arc<dyn StateRepository>, Arc<dyn PostRepository>) = match config.backend {
            Backend::File => {
                debug!("Initializing file repositories under {}", config.data_dir.display());
                let state_repo = FileStateRepository::open(config.state_dir()).await?;
                let posts = FilePostRepository::open(config.posts_dir(), client.clone()).await?;
                info!("File repositories ready in {}", config.data_dir.display());
                (Arc::new(state_repo), Arc::new(posts))
            }
            Backend::Memory => {
                info!("Using in-memory repositories, nothing will persist past this process");
                (Arc::new(MemoryStateRepository::new()), Arc::new(MemoryPostRepository::new()))
            }
        };

        // the cache ceiling follows the stored memory limit
        let limits = match state_repo.get(SETTINGS_KEY).await? {
            Some(value) => serde_json::from_value::<Settings>(value)
                .map(|s| s.limits)
                .unwrap_or_default(),
            None => ResourceLimits::default(),
        };
        let cache = Arc::new(MemoryCache::for_memory_limit(limits.memory_limit_bytes));
        let config_loader = Arc::new(ConfigLoader::new(state_repo.clone(), posts.clone(), cache.clone()));
        debug!("Memory cache sized at {} bytes", cache.max_bytes());

        let progress = Arc::new(ProgressStore::new(state_repo.clone()));
        let stats = Arc::new(StatisticsService::new(state_repo.clone()));
        let health = Arc::new(HealthChecker::new(HostEnvironment::detect(upload_dir), progress.clone()));

        let importer = Arc::new(ImportService::new(
            config_loader.clone(),
            Arc::new(HttpSourceFetcher::with_client(client)),
            Arc::new(StreamingCsvParser::new()),
            posts,
            progress.clone(),
            stats.clone(),
            cache.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            state_repo,
            config_loader.clone(),
            health.clone(),
            importer.clone(),
            progress.clone(),
            stats.clone(),
        ));
        let admin = AdminService::new(
            importer,
            scheduler.clone(),
            progress,
            health,
            config_loader,
            stats,
            cache,
        );

        info!("Application services initialized");
        Ok(Self {
            admin,
            scheduler,
            poll_interval: Duration::from_secs(config.scheduler_poll_secs.max(1)),
        })
    }
}
