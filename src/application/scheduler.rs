use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, debug, error, warn};
use crate::application::{
    config_loader::ConfigLoader,
    health::HealthChecker,
    import_service::ImportService,
    progress_store::ProgressStore,
    statistics::StatisticsService,
};
use crate::domain::{error::ImportError, models::ImportResult, ports::StateRepository};

pub const SCHEDULER_KEY: &str = "scheduler";
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerState {
    pub enabled: bool,
    pub enabled_at: Option<DateTime<Utc>>,
    pub enabled_by: Option<String>,
    pub interval_secs: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            enabled: false,
            enabled_at: None,
            enabled_by: None,
            interval_secs: DEFAULT_INTERVAL_SECS,
            last_tick: None,
        }
    }
}

impl SchedulerState {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_tick {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.interval_secs as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Disabled,
    NotDue { next_in_secs: i64 },
    Ran { result: ImportResult },
}

pub struct Scheduler {
    state_repo: Arc<dyn StateRepository>,
    config_loader: Arc<ConfigLoader>,
    health: Arc<HealthChecker>,
    importer: Arc<ImportService>,
    progress: Arc<ProgressStore>,
    stats: Arc<StatisticsService>,
}

impl Scheduler {
    pub fn new(
        state_repo: Arc<dyn StateRepository>,
        config_loader: Arc<ConfigLoader>,
        health: Arc<HealthChecker>,
        importer: Arc<ImportService>,
        progress: Arc<ProgressStore>,
        stats: Arc<StatisticsService>,
    ) -> Self {
        Self {
            state_repo,
            config_loader,
            health,
            importer,
            progress,
            stats,
        }
    }

    pub async fn state(&self) -> Result<SchedulerState, ImportError> {
        match self.state_repo.get(SCHEDULER_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Resetting unreadable scheduler state: {}", e);
                SchedulerState::default()
            })),
            None => Ok(SchedulerState::default()),
        }
    }

    async fn save(&self, state: &SchedulerState) -> Result<(), ImportError> {
        self.state_repo.put(SCHEDULER_KEY, &serde_json::to_value(state)?).await
    }

    /// Enables periodic imports. Refused while the health snapshot reports
    /// any failing check.
    pub async fn enable(&self, actor: &str, interval_secs: Option<u64>) -> Result<SchedulerState, ImportError> {
        let settings = self.config_loader.load_settings().await?;
        let report = self.health.snapshot(&settings.limits).await;
        if !report.healthy {
            let failing: Vec<String> = report.failing().iter().map(|c| format!("{}: {}", c.name, c.detail)).collect();
            let details = failing.join("; ");
            warn!("Scheduler activation by {} blocked: {}", actor, details);
            self.stats.append_audit("enable_blocked", actor, Some(details.clone())).await?;
            return Err(ImportError::Unhealthy(details));
        }

        let mut state = self.state().await?;
        state.enabled = true;
        state.enabled_at = Some(Utc::now());
        state.enabled_by = Some(actor.to_string());
        if let Some(secs) = interval_secs.filter(|s| *s > 0) {
            state.interval_secs = secs;
        }
        self.save(&state).await?;
        self.stats
            .append_audit("enable", actor, Some(format!("interval {}s", state.interval_secs)))
            .await?;

        info!("✅ Scheduler enabled by {} (every {}s)", actor, state.interval_secs);
        Ok(state)
    }

    pub async fn disable(&self, actor: &str) -> Result<SchedulerState, ImportError> {
        let mut state = self.state().await?;
        state.enabled = false;
        self.save(&state).await?;
        self.stats.append_audit("disable", actor, None).await?;
        info!("Scheduler disabled by {}", actor);
        Ok(state)
    }

    /// One periodic pass: heals a stale run, then imports when enabled and due.
    pub async fn tick(&self) -> Result<TickOutcome, ImportError> {
        let now = Utc::now();
        let progress = self.progress.read().await?;
        debug!("Scheduler tick, current run status: {}", progress.status);

        let mut state = self.state().await?;
        if !state.enabled {
            debug!("Scheduler disabled, nothing to do");
            return Ok(TickOutcome::Disabled);
        }
        if !state.is_due(now) {
            let next_in_secs = state
                .last_tick
                .map(|last| state.interval_secs as i64 - (now - last).num_seconds())
                .unwrap_or(0);
            debug!("Next scheduled import in {}s", next_in_secs);
            return Ok(TickOutcome::NotDue { next_in_secs });
        }

        state.last_tick = Some(now);
        self.save(&state).await?;

        info!("Running scheduled import");
        let result = self.importer.run(None).await;
        Ok(TickOutcome::Ran { result })
    }

    /// Ticks every `poll` until `shutdown` resolves.
    pub async fn run_loop<F>(&self, poll: Duration, shutdown: F) -> Result<(), ImportError>
    where
        F: std::future::Future<Output = ()>,
    {
        info!("Starting scheduler loop, polling every {}s", poll.as_secs());
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(poll);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler loop stopped after {} ticks", tick_count);
                    return Ok(());
                }
                _ = interval.tick() => {
                    tick_count += 1;
                    debug!("Scheduler tick {}", tick_count);
                    match self.tick().await {
                        Ok(TickOutcome::Ran { result }) => {
                            info!("Scheduled import finished: {}", result.message);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Scheduler tick {} failed: {}", tick_count, e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::health::HostEnvironment;
    use crate::domain::models::{ResourceLimits, Settings};
    use crate::infrastructure::cache::MemoryCache;
    use crate::infrastructure::parsers::StreamingCsvParser;
    use crate::infrastructure::posts::MemoryPostRepository;
    use crate::infrastructure::source::HttpSourceFetcher;
    use crate::infrastructure::store::MemoryStateRepository;
    use std::path::Path;

    struct Fixture {
        loader: Arc<ConfigLoader>,
        stats: Arc<StatisticsService>,
        posts: Arc<MemoryPostRepository>,
        scheduler: Scheduler,
    }

    fn fixture(upload_dir: &Path) -> Fixture {
        let state = Arc::new(MemoryStateRepository::new());
        let posts = Arc::new(MemoryPostRepository::new());
        let cache = Arc::new(MemoryCache::new(1 << 20));
        let loader = Arc::new(ConfigLoader::new(state.clone(), posts.clone(), cache.clone()));
        let progress = Arc::new(ProgressStore::new(state.clone()));
        let stats = Arc::new(StatisticsService::new(state.clone()));
        let health = Arc::new(HealthChecker::new(
            HostEnvironment::detect(upload_dir.to_path_buf()),
            progress.clone(),
        ));
        let importer = Arc::new(ImportService::new(
            loader.clone(),
            Arc::new(HttpSourceFetcher::new(Duration::from_secs(5)).unwrap()),
            Arc::new(StreamingCsvParser::new()),
            posts.clone(),
            progress.clone(),
            stats.clone(),
            cache,
        ));
        let scheduler = Scheduler::new(state, loader.clone(), health, importer, progress, stats.clone());
        Fixture { loader, stats, posts, scheduler }
    }

    fn unlimited() -> ResourceLimits {
        ResourceLimits { memory_limit_bytes: None, max_execution_secs: None }
    }

    #[tokio::test]
    async fn test_enable_is_blocked_when_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir.path().join("missing"));

        let err = f.scheduler.enable("admin", None).await.unwrap_err();
        assert!(matches!(err, ImportError::Unhealthy(ref d) if d.contains("upload_dir_writable")));
        assert!(!f.scheduler.state().await.unwrap().enabled);

        let log = f.stats.audit_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "enable_blocked");
    }

    #[tokio::test]
    async fn test_disabled_scheduler_does_not_import() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path());
        assert_eq!(f.scheduler.tick().await.unwrap(), TickOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_enable_disable_and_tick() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("feed.csv");
        std::fs::write(&csv, "post_title,sku\nOne,1\nTwo,2\n").unwrap();
        let f = fixture(dir.path());
        f.loader
            .save_settings(&Settings {
                local_path: Some(csv.display().to_string()),
                import_images: false,
                limits: unlimited(),
                ..Settings::default()
            })
            .await
            .unwrap();

        // disk space depends on the host; only run the activation path where it passes
        let state = match f.scheduler.enable("admin", Some(60)).await {
            Ok(state) => state,
            Err(ImportError::Unhealthy(details)) if details.contains("disk_space") => return,
            Err(e) => panic!("unexpected error: {}", e),
        };
        assert!(state.enabled);
        assert_eq!(state.enabled_by.as_deref(), Some("admin"));
        assert_eq!(state.interval_secs, 60);

        let TickOutcome::Ran { result } = f.scheduler.tick().await.unwrap() else {
            panic!("expected the first tick to run an import")
        };
        assert_eq!(result.created, 2);
        assert_eq!(f.posts.snapshot().len(), 2);
        assert!(matches!(f.scheduler.tick().await.unwrap(), TickOutcome::NotDue { .. }));

        f.scheduler.disable("admin").await.unwrap();
        assert_eq!(f.scheduler.tick().await.unwrap(), TickOutcome::Disabled);

        let actions: Vec<String> = f.stats.audit_log().await.unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["enable", "disable"]);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path());
        f.scheduler
            .run_loop(Duration::from_millis(10), tokio::time::sleep(Duration::from_millis(35)))
            .await
            .unwrap();
    }
}
