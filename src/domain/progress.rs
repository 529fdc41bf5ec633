use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Age after which a `running` record is presumed to belong to a crashed run.
pub const STALE_AFTER_SECS: i64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Starting,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Timeout,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Starting | RunStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::CompletedWithErrors | RunStatus::Failed | RunStatus::Timeout
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Starting => "starting",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// The persisted state of the current or most recent import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRunState {
    pub running: bool,
    /// Rows consumed so far, whether they succeeded or failed.
    pub processed: usize,
    pub total: usize,
    pub percent: f64,
    pub status: RunStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub errors: usize,
    pub eta_seconds: Option<u64>,
    pub run_id: Option<Uuid>,
}

impl ImportRunState {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            running: false,
            processed: 0,
            total: 0,
            percent: 0.0,
            status: RunStatus::Idle,
            message: "No import running".to_string(),
            timestamp: now,
            start_time: None,
            errors: 0,
            eta_seconds: None,
            run_id: None,
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.start_time.map(|start| (now - start).num_seconds())
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.running && self.age_secs(now).map_or(true, |age| age >= STALE_AFTER_SECS)
    }
}

/// Companion lock record. Only the run that wrote it may release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLock {
    pub run_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl RunLock {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.acquired_at).num_seconds()
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age_secs(now) >= STALE_AFTER_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_running_record_becomes_stale_after_threshold() {
        let now = Utc::now();
        let mut state = ImportRunState::idle(now);
        state.running = true;
        state.start_time = Some(now - Duration::seconds(STALE_AFTER_SECS - 1));
        assert!(!state.is_stale(now));

        state.start_time = Some(now - Duration::seconds(STALE_AFTER_SECS + 1));
        assert!(state.is_stale(now));
    }

    #[test]
    fn test_idle_record_is_never_stale() {
        let now = Utc::now();
        let mut state = ImportRunState::idle(now);
        state.start_time = Some(now - Duration::days(3));
        assert!(!state.is_stale(now));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, "\"completed_with_errors\"");
        assert_eq!(RunStatus::CompletedWithErrors.to_string(), "completed_with_errors");
    }
}
