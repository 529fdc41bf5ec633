use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, debug, error};
use crate::application::{
    config_loader::{ConfigLoader, VALIDATION_NAMESPACE},
    health::HealthChecker,
    import_service::ImportService,
    progress_store::ProgressStore,
    scheduler::Scheduler,
    statistics::StatisticsService,
};
use crate::domain::models::{Settings, SourceKind};
use crate::infrastructure::cache::MemoryCache;

/// Uniform reply for every administrative action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AdminResponse {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self { success: true, message: message.into(), data }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }

    fn with_data<T: Serialize>(success: bool, message: impl Into<String>, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self { success, message: message.into(), data: Some(value) },
            Err(e) => {
                error!("Failed to serialise response data: {}", e);
                Self::fail(format!("Failed to serialise response: {}", e))
            }
        }
    }
}

pub struct AdminService {
    importer: Arc<ImportService>,
    scheduler: Arc<Scheduler>,
    progress: Arc<ProgressStore>,
    health: Arc<HealthChecker>,
    config_loader: Arc<ConfigLoader>,
    stats: Arc<StatisticsService>,
    cache: Arc<MemoryCache>,
}

impl AdminService {
    pub fn new(
        importer: Arc<ImportService>,
        scheduler: Arc<Scheduler>,
        progress: Arc<ProgressStore>,
        health: Arc<HealthChecker>,
        config_loader: Arc<ConfigLoader>,
        stats: Arc<StatisticsService>,
        cache: Arc<MemoryCache>,
    ) -> Self {
        Self {
            importer,
            scheduler,
            progress,
            health,
            config_loader,
            stats,
            cache,
        }
    }

    pub async fn start_import(&self, source: Option<SourceKind>) -> AdminResponse {
        debug!("Admin request: start import ({:?})", source);
        let result = self.importer.run(source).await;
        AdminResponse::with_data(result.success, result.message.clone(), &result)
    }

    pub async fn validate_source(&self, source: Option<SourceKind>) -> AdminResponse {
        debug!("Admin request: validate source ({:?})", source);
        match self.importer.validate_source(source).await {
            Ok(validation) => AdminResponse::with_data(
                true,
                format!("Source is valid: {} columns, {} rows", validation.headers.len(), validation.total_rows),
                &validation,
            ),
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    pub async fn save_settings(&self, settings: &Settings) -> AdminResponse {
        match self.config_loader.save_settings(settings).await {
            Ok(()) => AdminResponse::with_data(true, "Settings saved", settings),
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    pub async fn enable_scheduler(&self, actor: &str, interval_secs: Option<u64>) -> AdminResponse {
        match self.scheduler.enable(actor, interval_secs).await {
            Ok(state) => AdminResponse::with_data(true, "Scheduler enabled", &state),
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    pub async fn disable_scheduler(&self, actor: &str) -> AdminResponse {
        match self.scheduler.disable(actor).await {
            Ok(state) => AdminResponse::with_data(true, "Scheduler disabled", &state),
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    pub async fn scheduler_tick(&self) -> AdminResponse {
        match self.scheduler.tick().await {
            Ok(outcome) => AdminResponse::with_data(true, "Scheduler tick completed", &outcome),
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    /// Clears the run record and lock regardless of which run owns them.
    pub async fn emergency_reset(&self, actor: &str) -> AdminResponse {
        match self.progress.clear().await {
            Ok(had_state) => {
                self.cache.flush_namespace(VALIDATION_NAMESPACE);
                if let Err(e) = self.stats.append_audit("emergency_reset", actor, None).await {
                    error!("Failed to audit emergency reset: {}", e);
                }
                info!("Emergency reset performed by {}", actor);
                let message = if had_state { "Import state reset" } else { "Nothing to reset" };
                AdminResponse::ok(message, None)
            }
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    pub async fn get_progress(&self) -> AdminResponse {
        match self.progress.read().await {
            Ok(state) => AdminResponse::with_data(true, state.message.clone(), &state),
            Err(e) => AdminResponse::fail(e.to_string()),
        }
    }

    pub async fn get_health(&self) -> AdminResponse {
        let settings = match self.config_loader.load_settings().await {
            Ok(settings) => settings,
            Err(e) => return AdminResponse::fail(e.to_string()),
        };
        let report = self.health.snapshot(&settings.limits).await;
        let message = if report.healthy {
            "All health checks passed".to_string()
        } else {
            format!("{} health checks failed", report.failing().len())
        };
        AdminResponse::with_data(report.healthy, message, &report)
    }

    /// Import, error and cache statistics in one payload.
    pub async fn get_statistics(&self) -> AdminResponse {
        let imports = match self.stats.import_stats().await {
            Ok(stats) => stats,
            Err(e) => return AdminResponse::fail(e.to_string()),
        };
        let errors = match self.stats.error_summary().await {
            Ok(summary) => summary,
            Err(e) => return AdminResponse::fail(e.to_string()),
        };
        let data = serde_json::json!({
            "imports": imports,
            "errors": errors,
            "cache": self.cache.stats(),
        });
        AdminResponse::ok("Statistics", Some(data))
    }
}
