use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, debug, error, warn};
use crate::application::{
    config_loader::{ConfigLoader, VALIDATION_NAMESPACE},
    progress_store::{status_message, ProgressStore, RunCounters, RunTicket},
    row_mapper::RowMapper,
    statistics::{Severity, StatisticsService},
};
use crate::domain::{
    error::{ImportError, SourceError},
    models::{CsvTable, ImportConfig, ImportResult, RowOutcome, SourceKind, SourceValidation},
    ports::{CsvParser, PostRepository, SourceFetcher},
    progress::RunStatus,
};
use crate::infrastructure::cache::MemoryCache;

/// Progress is persisted every this many rows, and after the last one.
pub const PROGRESS_EVERY: usize = 5;

const VALIDATION_TTL: Duration = Duration::from_secs(300);

pub struct ImportService {
    config_loader: Arc<ConfigLoader>,
    fetcher: Arc<dyn SourceFetcher>,
    parser: Arc<dyn CsvParser>,
    mapper: RowMapper,
    progress: Arc<ProgressStore>,
    stats: Arc<StatisticsService>,
    cache: Arc<MemoryCache>,
}

impl ImportService {
    pub fn new(
        config_loader: Arc<ConfigLoader>,
        fetcher: Arc<dyn SourceFetcher>,
        parser: Arc<dyn CsvParser>,
        posts: Arc<dyn PostRepository>,
        progress: Arc<ProgressStore>,
        stats: Arc<StatisticsService>,
        cache: Arc<MemoryCache>,
    ) -> Self {
        Self {
            config_loader,
            fetcher,
            parser,
            mapper: RowMapper::new(posts),
            progress,
            stats,
            cache,
        }
    }

    /// Runs one import end to end. Never panics and never leaves the lock
    /// held by this run behind.
    pub async fn run(&self, requested: Option<SourceKind>) -> ImportResult {
        info!("Starting CSV import (requested source: {:?})", requested);

        // Step 1: Load and validate configuration
        debug!("Step 1: Loading import configuration");
        let config = match self.config_loader.load(requested).await {
            Ok(config) => config,
            Err(e) => {
                error!("Import not started, configuration is invalid: {}", e);
                self.note_error(Severity::Critical, format!("Configuration error: {}", e), None).await;
                return ImportResult::not_started(e.to_string());
            }
        };
        let source_label = config.source.describe();
        info!("Import configured - post type: {}, status: {}, source: {}", config.post_type, config.post_status, source_label);

        // Step 2: Acquire the run lock
        debug!("Step 2: Acquiring import lock");
        let ticket = match self.progress.begin().await {
            Ok(ticket) => ticket,
            Err(e @ ImportError::AlreadyRunning { .. }) => {
                warn!("Import request rejected: {}", e);
                return ImportResult::not_started(e.to_string());
            }
            Err(e) => {
                error!("Failed to initialise import state: {}", e);
                self.note_error(Severity::Critical, format!("State store error: {}", e), None).await;
                return ImportResult::not_started(e.to_string());
            }
        };
        let started = Instant::now();

        // Step 3: Load the CSV source
        debug!("Step 3: Loading CSV from {}", source_label);
        let table = match self.load_table(&config).await {
            Ok(table) => table,
            Err(e) => {
                error!("Failed to load CSV from {}: {}", source_label, e);
                let message = format!("Import failed: {}", e);
                self.finish(&ticket, RunCounters::default(), RunStatus::Failed, Some(message.clone())).await;
                self.note_error(Severity::Critical, message.clone(), Some(ticket.run_id.to_string())).await;
                return ImportResult::not_started(message);
            }
        };
        info!("Successfully loaded {} rows ({} columns, delimiter {:?})", table.total_rows, table.headers.len(), table.delimiter);

        // Step 4: Import rows
        let total = table.rows.len();
        debug!("Step 4: Importing {} rows as '{}'", total, config.post_type);
        let mut counters = RunCounters { processed: 0, total, errors: 0 };
        self.report(&ticket, counters, RunStatus::Processing).await;

        let (mut created, mut skipped) = (0usize, 0usize);
        for (index, record) in table.rows.iter().enumerate() {
            let row = index + 1;
            match self.mapper.import_row(&config, row, record).await {
                Ok(RowOutcome::Created(_)) => created += 1,
                Ok(RowOutcome::Skipped(_)) => skipped += 1,
                Err(e) => {
                    counters.errors += 1;
                    warn!("{}", e);
                    self.note_error(Severity::Warning, e.to_string(), Some(ticket.run_id.to_string())).await;
                }
            }
            counters.processed = row;

            if row % PROGRESS_EVERY == 0 || row == total {
                self.report(&ticket, counters, RunStatus::Processing).await;
            }
        }

        // Step 5: Finalise
        let status = if counters.errors == 0 {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        };
        debug!("Step 5: Finishing run {} as {}", ticket.run_id, status);
        self.finish(&ticket, counters, status, None).await;

        let processed = created + skipped;
        let result = ImportResult {
            success: processed > 0 || counters.errors == 0,
            processed,
            total,
            errors: counters.errors,
            created,
            skipped,
            message: status_message(status, processed, total, counters.errors),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.stats.record_run(&result, &source_label, elapsed_ms).await {
            warn!("Failed to record import statistics: {}", e);
        }

        info!(
            "✅ Import finished from {} - {} created, {} skipped, {} errors out of {} rows in {}ms",
            source_label, created, skipped, counters.errors, total, elapsed_ms
        );
        result
    }

    /// Checks that the configured source can be loaded and carries the
    /// required columns, without importing anything.
    pub async fn validate_source(&self, requested: Option<SourceKind>) -> Result<SourceValidation, ImportError> {
        let config = self.config_loader.load(requested).await?;
        let label = config.source.describe();

        if let Some(cached) = self.cache.get::<SourceValidation>(VALIDATION_NAMESPACE, &label) {
            debug!("Validation of {} served from cache", label);
            return Ok(cached);
        }

        debug!("Validating CSV source {}", label);
        let table = self.fetch_and_parse(&config).await?;
        if table.headers.len() < 2 {
            warn!("Source {} has a single column, delimiter could not be determined", label);
            return Err(SourceError::SingleColumn.into());
        }
        check_required_columns(&config, &table)?;

        let validation = SourceValidation {
            source: label.clone(),
            headers: table.headers,
            delimiter: table.delimiter,
            total_rows: table.total_rows,
        };
        self.cache.set(VALIDATION_NAMESPACE, &label, &validation, VALIDATION_TTL);
        info!("✅ Source {} is valid: {} columns, {} rows", label, validation.headers.len(), validation.total_rows);
        Ok(validation)
    }

    async fn load_table(&self, config: &ImportConfig) -> Result<CsvTable, ImportError> {
        let table = self.fetch_and_parse(config).await?;
        check_required_columns(config, &table)?;
        Ok(table)
    }

    async fn fetch_and_parse(&self, config: &ImportConfig) -> Result<CsvTable, ImportError> {
        let loaded = self.fetcher.fetch(&config.source).await.map_err(|e| {
            error!("Failed to fetch {}: {}", config.source.describe(), e);
            e
        })?;
        debug!("Source available at {} (temporary: {})", loaded.path.display(), loaded.is_temporary());

        let parser = Arc::clone(&self.parser);
        let path = loaded.path.clone();
        let table = tokio::task::spawn_blocking(move || parser.parse_file(&path))
            .await
            .map_err(|e| SourceError::Parse(format!("parser task failed: {}", e)))??;

        drop(loaded);
        Ok(table)
    }

    async fn report(&self, ticket: &RunTicket, counters: RunCounters, status: RunStatus) {
        if let Err(e) = self.progress.update(ticket, counters, status).await {
            warn!("Failed to persist progress for run {}: {}", ticket.run_id, e);
        }
    }

    async fn finish(&self, ticket: &RunTicket, counters: RunCounters, status: RunStatus, message: Option<String>) {
        if let Err(e) = self.progress.finish(ticket, counters, status, message).await {
            error!("Failed to finalise run {}: {}", ticket.run_id, e);
        }
    }

    async fn note_error(&self, severity: Severity, message: String, context: Option<String>) {
        if let Err(e) = self.stats.record_error(severity, message, context).await {
            warn!("Failed to record error statistics: {}", e);
        }
    }
}

fn check_required_columns(config: &ImportConfig, table: &CsvTable) -> Result<(), SourceError> {
    for column in &config.required_columns {
        if !table.headers.iter().any(|h| h == column) {
            warn!("Required column '{}' missing from headers {:?}", column, table.headers);
            return Err(SourceError::MissingColumn(column.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::progress_store::LOCK_KEY;
    use crate::domain::models::Settings;
    use crate::domain::ports::StateRepository;
    use crate::infrastructure::parsers::StreamingCsvParser;
    use crate::infrastructure::posts::MemoryPostRepository;
    use crate::infrastructure::source::HttpSourceFetcher;
    use crate::infrastructure::store::MemoryStateRepository;
    use std::path::Path;

    struct Fixture {
        state: Arc<MemoryStateRepository>,
        posts: Arc<MemoryPostRepository>,
        loader: Arc<ConfigLoader>,
        progress: Arc<ProgressStore>,
        stats: Arc<StatisticsService>,
        service: ImportService,
    }

    fn fixture() -> Fixture {
        let state = Arc::new(MemoryStateRepository::new());
        let posts = Arc::new(MemoryPostRepository::new());
        let cache = Arc::new(MemoryCache::new(1 << 20));
        let loader = Arc::new(ConfigLoader::new(state.clone(), posts.clone(), cache.clone()));
        let progress = Arc::new(ProgressStore::new(state.clone()));
        let stats = Arc::new(StatisticsService::new(state.clone()));
        let service = ImportService::new(
            loader.clone(),
            Arc::new(HttpSourceFetcher::new(Duration::from_secs(5)).unwrap()),
            Arc::new(StreamingCsvParser::new()),
            posts.clone(),
            progress.clone(),
            stats.clone(),
            cache,
        );
        Fixture { state, posts, loader, progress, stats, service }
    }

    async fn configure_local(f: &Fixture, path: &Path) {
        let settings = Settings {
            local_path: Some(path.display().to_string()),
            import_images: false,
            ..Settings::default()
        };
        f.loader.save_settings(&settings).await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_run_creates_posts_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "post_title;post_content;sku\nFirst;Body one;A1\nSecond;Body two;B2\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;

        let result = f.service.run(None).await;
        assert!(result.success);
        assert_eq!(result.created, 2);
        assert_eq!(result.errors, 0);
        assert_eq!(f.posts.snapshot()[1].meta["sku"], "B2");

        let state = f.progress.read().await.unwrap();
        assert!(!state.running);
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.percent, 100.0);
        assert!(f.state.get(LOCK_KEY).await.unwrap().is_none());
        assert_eq!(f.stats.import_stats().await.unwrap().total_imported, 2);
    }

    #[tokio::test]
    async fn test_second_run_skips_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "post_title,sku\nFirst,A1\nSecond,B2\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;

        f.service.run(None).await;
        let again = f.service.run(None).await;
        assert!(again.success);
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(again.processed, 2);
        assert_eq!(f.posts.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_config_error_does_not_touch_lock() {
        let f = fixture();
        let result = f.service.run(None).await;
        assert!(!result.success);
        assert!(f.state.get(LOCK_KEY).await.unwrap().is_none());
        assert_eq!(f.progress.read().await.unwrap().status, RunStatus::Idle);
        assert_eq!(f.stats.error_summary().await.unwrap().counts.critical, 1);
    }

    #[tokio::test]
    async fn test_missing_file_fails_run_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture();
        configure_local(&f, &dir.path().join("absent.csv")).await;

        let result = f.service.run(None).await;
        assert!(!result.success);
        assert!(result.message.starts_with("Import failed"));

        let state = f.progress.read().await.unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert!(!state.running);
        assert!(f.state.get(LOCK_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_required_column_fails_before_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "name,sku\nFirst,A1\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;

        let result = f.service.run(None).await;
        assert!(!result.success);
        assert!(result.message.contains("post_title"));
        assert!(f.posts.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_blank_titles_are_counted_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "post_title,sku\nFirst,A1\n   ,B2\nThird,C3\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;

        let result = f.service.run(None).await;
        assert!(result.success);
        assert_eq!(result.created, 2);
        assert_eq!(result.errors, 1);

        let state = f.progress.read().await.unwrap();
        assert_eq!(state.status, RunStatus::CompletedWithErrors);
        assert_eq!(state.processed, 3);
        assert_eq!(state.errors, 1);
    }

    #[tokio::test]
    async fn test_validate_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "post_title|sku\nFirst|A1\nSecond|B2\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;

        let validation = f.service.validate_source(None).await.unwrap();
        assert_eq!(validation.delimiter, '|');
        assert_eq!(validation.headers, vec!["post_title", "sku"]);
        assert_eq!(validation.total_rows, 2);
        assert!(f.posts.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_saving_settings_invalidates_cached_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "post_title,sku\nFirst,A1\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;
        assert!(f.service.validate_source(None).await.is_ok());

        let settings = Settings {
            local_path: Some(path.display().to_string()),
            import_images: false,
            required_columns: vec!["post_title".to_string(), "price".to_string()],
            ..Settings::default()
        };
        f.loader.save_settings(&settings).await.unwrap();

        assert!(matches!(
            f.service.validate_source(None).await,
            Err(ImportError::Source(SourceError::MissingColumn(ref c))) if c == "price"
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_single_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "post_title\nFirst\n").unwrap();
        let f = fixture();
        configure_local(&f, &path).await;

        assert!(matches!(
            f.service.validate_source(Some(SourceKind::Local)).await,
            Err(ImportError::Source(SourceError::SingleColumn))
        ));
    }
}
