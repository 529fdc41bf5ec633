use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::domain::{error::ImportError, models::ImportResult, ports::StateRepository};

pub const IMPORT_STATS_KEY: &str = "import_stats";
pub const ERROR_STATS_KEY: &str = "error_stats";
pub const AUDIT_LOG_KEY: &str = "scheduler_audit";

const MAX_RECENT_ERRORS: usize = 50;
const TREND_DAYS: i64 = 30;
const MAX_AUDIT_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImportStatistics {
    pub total_imported: u64,
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_run_count: usize,
    pub last_source: Option<String>,
    pub last_success_rate: f64,
    pub avg_item_ms: f64,
}

impl ImportStatistics {
    pub fn record_run(&mut self, result: &ImportResult, source: &str, elapsed_ms: u64, now: DateTime<Utc>) {
        self.total_imported += result.created as u64;
        self.runs += 1;
        self.last_run = Some(now);
        self.last_run_count = result.processed;
        self.last_source = Some(source.to_string());
        self.last_success_rate = if result.total == 0 {
            0.0
        } else {
            ((result.processed as f64 / result.total as f64) * 10_000.0).round() / 100.0
        };
        self.avg_item_ms = if result.total == 0 {
            0.0
        } else {
            elapsed_ms as f64 / result.total as f64
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SeverityCounts {
    pub critical: u64,
    pub warning: u64,
    pub notice: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ErrorStatistics {
    pub counts: SeverityCounts,
    /// Newest last.
    pub recent: Vec<ErrorEntry>,
    pub daily: BTreeMap<NaiveDate, u64>,
    window: Vec<(DateTime<Utc>, Severity)>,
}

impl ErrorStatistics {
    pub fn record(&mut self, entry: ErrorEntry) {
        let now = entry.timestamp;
        match entry.severity {
            Severity::Critical => self.counts.critical += 1,
            Severity::Warning => self.counts.warning += 1,
            Severity::Notice => self.counts.notice += 1,
        }

        *self.daily.entry(now.date_naive()).or_insert(0) += 1;
        let oldest_day = (now - Duration::days(TREND_DAYS - 1)).date_naive();
        self.daily.retain(|day, _| *day >= oldest_day);

        if entry.severity != Severity::Notice {
            self.window.push((now, entry.severity));
        }
        let window_start = now - Duration::hours(24);
        self.window.retain(|(at, _)| *at > window_start);

        self.recent.push(entry);
        if self.recent.len() > MAX_RECENT_ERRORS {
            let excess = self.recent.len() - MAX_RECENT_ERRORS;
            self.recent.drain(..excess);
        }
    }

    pub fn last_24h(&self, now: DateTime<Utc>, severity: Severity) -> usize {
        let window_start = now - Duration::hours(24);
        self.window
            .iter()
            .filter(|(at, s)| *s == severity && *at > window_start)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub counts: SeverityCounts,
    pub recent: Vec<ErrorEntry>,
    pub daily_trend: BTreeMap<NaiveDate, u64>,
    pub critical_last_24h: usize,
    pub warning_last_24h: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub actor: String,
    pub details: Option<String>,
}

pub struct StatisticsService {
    state_repo: Arc<dyn StateRepository>,
}

impl StatisticsService {
    pub fn new(state_repo: Arc<dyn StateRepository>) -> Self {
        Self { state_repo }
    }

    async fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, ImportError> {
        match self.state_repo.get(key).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Resetting unreadable {} record: {}", key, e);
                T::default()
            })),
            None => Ok(T::default()),
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ImportError> {
        self.state_repo.put(key, &serde_json::to_value(value)?).await
    }

    pub async fn import_stats(&self) -> Result<ImportStatistics, ImportError> {
        self.load(IMPORT_STATS_KEY).await
    }

    pub async fn record_run(&self, result: &ImportResult, source: &str, elapsed_ms: u64) -> Result<ImportStatistics, ImportError> {
        let mut stats: ImportStatistics = self.load(IMPORT_STATS_KEY).await?;
        stats.record_run(result, source, elapsed_ms, Utc::now());
        self.store(IMPORT_STATS_KEY, &stats).await?;
        debug!("Import statistics updated: {} imported in total", stats.total_imported);
        Ok(stats)
    }

    pub async fn record_error(&self, severity: Severity, message: impl Into<String>, context: Option<String>) -> Result<(), ImportError> {
        let mut stats: ErrorStatistics = self.load(ERROR_STATS_KEY).await?;
        stats.record(ErrorEntry {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            context,
        });
        self.store(ERROR_STATS_KEY, &stats).await
    }

    pub async fn error_summary(&self) -> Result<ErrorSummary, ImportError> {
        let stats: ErrorStatistics = self.load(ERROR_STATS_KEY).await?;
        let now = Utc::now();
        Ok(ErrorSummary {
            counts: stats.counts,
            critical_last_24h: stats.last_24h(now, Severity::Critical),
            warning_last_24h: stats.last_24h(now, Severity::Warning),
            recent: stats.recent,
            daily_trend: stats.daily,
        })
    }

    pub async fn append_audit(&self, action: &str, actor: &str, details: Option<String>) -> Result<(), ImportError> {
        let mut log: Vec<AuditEntry> = self.load(AUDIT_LOG_KEY).await?;
        log.push(AuditEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            actor: actor.to_string(),
            details,
        });
        if log.len() > MAX_AUDIT_ENTRIES {
            let excess = log.len() - MAX_AUDIT_ENTRIES;
            log.drain(..excess);
        }
        self.store(AUDIT_LOG_KEY, &log).await
    }

    pub async fn audit_log(&self) -> Result<Vec<AuditEntry>, ImportError> {
        self.load(AUDIT_LOG_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::MemoryStateRepository;

    fn entry(at: DateTime<Utc>, severity: Severity, message: &str) -> ErrorEntry {
        ErrorEntry {
            timestamp: at,
            severity,
            message: message.to_string(),
            context: None,
        }
    }

    fn result(processed: usize, total: usize, created: usize) -> ImportResult {
        ImportResult {
            success: true,
            processed,
            total,
            errors: total - processed,
            created,
            skipped: processed - created,
            message: String::new(),
        }
    }

    #[test]
    fn test_import_statistics_accumulate() {
        let mut stats = ImportStatistics::default();
        let now = Utc::now();
        stats.record_run(&result(4, 5, 3), "local:/a.csv", 500, now);
        stats.record_run(&result(2, 2, 2), "local:/a.csv", 100, now);

        assert_eq!(stats.total_imported, 5);
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.last_run_count, 2);
        assert_eq!(stats.last_success_rate, 100.0);
        assert_eq!(stats.avg_item_ms, 50.0);
    }

    #[test]
    fn test_recent_errors_are_capped() {
        let mut stats = ErrorStatistics::default();
        let now = Utc::now();
        for i in 0..60 {
            stats.record(entry(now, Severity::Warning, &format!("e{}", i)));
        }
        assert_eq!(stats.recent.len(), MAX_RECENT_ERRORS);
        assert_eq!(stats.recent[0].message, "e10");
        assert_eq!(stats.counts.warning, 60);
    }

    #[test]
    fn test_trend_and_window_are_pruned() {
        let mut stats = ErrorStatistics::default();
        let now = Utc::now();
        stats.record(entry(now - Duration::days(40), Severity::Critical, "old"));
        stats.record(entry(now - Duration::hours(30), Severity::Critical, "yesterday"));
        stats.record(entry(now - Duration::hours(1), Severity::Critical, "recent"));
        stats.record(entry(now, Severity::Notice, "info"));

        assert_eq!(stats.last_24h(now, Severity::Critical), 1);
        assert_eq!(stats.counts.critical, 3);
        assert!(stats.daily.keys().all(|d| *d >= (now - Duration::days(TREND_DAYS - 1)).date_naive()));
    }

    #[tokio::test]
    async fn test_audit_log_keeps_last_entries() {
        let service = StatisticsService::new(Arc::new(MemoryStateRepository::new()));
        for i in 0..105 {
            service.append_audit("enable", &format!("user{}", i), None).await.unwrap();
        }
        let log = service.audit_log().await.unwrap();
        assert_eq!(log.len(), MAX_AUDIT_ENTRIES);
        assert_eq!(log[0].actor, "user5");
        assert_eq!(log[99].actor, "user104");
    }

    #[tokio::test]
    async fn test_error_summary_round_trip() {
        let service = StatisticsService::new(Arc::new(MemoryStateRepository::new()));
        service.record_error(Severity::Critical, "source missing", None).await.unwrap();
        service
            .record_error(Severity::Warning, "row 3 failed", Some("run-1".to_string()))
            .await
            .unwrap();

        let summary = service.error_summary().await.unwrap();
        assert_eq!(summary.counts.critical, 1);
        assert_eq!(summary.counts.warning, 1);
        assert_eq!(summary.critical_last_24h, 1);
        assert_eq!(summary.warning_last_24h, 1);
        assert_eq!(summary.recent.len(), 2);
        assert_eq!(summary.daily_trend.values().sum::<u64>(), 2);
    }
}
