use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn, error};
use uuid::Uuid;
use crate::domain::{
    error::ImportError,
    ports::StateRepository,
    progress::{ImportRunState, RunLock, RunStatus},
};

pub const PROGRESS_KEY: &str = "import_progress";
pub const LOCK_KEY: &str = "import_lock";

/// ETA is only estimated once this many rows have been consumed.
const ETA_MIN_PROCESSED: usize = 5;

/// Proof that `begin` succeeded; identifies the run owning the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunCounters {
    pub processed: usize,
    pub total: usize,
    pub errors: usize,
}

pub struct ProgressStore {
    state_repo: Arc<dyn StateRepository>,
}

impl ProgressStore {
    pub fn new(state_repo: Arc<dyn StateRepository>) -> Self {
        Self { state_repo }
    }

    async fn load_record(&self) -> Result<Option<ImportRunState>, ImportError> {
        match self.state_repo.get(PROGRESS_KEY).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    warn!("Discarding unreadable progress record: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn save_record(&self, state: &ImportRunState) -> Result<(), ImportError> {
        self.state_repo
            .put(PROGRESS_KEY, &serde_json::to_value(state)?)
            .await
            .map_err(|e| {
                error!("Failed to persist progress record: {}", e);
                e
            })
    }

    /// The raw record, without the staleness check `read` performs.
    pub async fn peek(&self) -> Result<Option<ImportRunState>, ImportError> {
        self.load_record().await
    }

    pub async fn current_lock(&self) -> Result<Option<RunLock>, ImportError> {
        Ok(self
            .state_repo
            .get(LOCK_KEY)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    /// Acquires the run lock and initialises a fresh progress record.
    pub async fn begin(&self) -> Result<RunTicket, ImportError> {
        let now = Utc::now();

        if let Some(existing) = self.load_record().await? {
            if existing.running && !existing.is_stale(now) {
                let started_secs_ago = existing.age_secs(now).unwrap_or(0);
                warn!("Import already running (started {}s ago)", started_secs_ago);
                return Err(ImportError::AlreadyRunning { started_secs_ago });
            }
            if existing.running {
                warn!("Recovering from stale import record (run {:?})", existing.run_id);
            }
        }

        let lock = RunLock {
            run_id: Uuid::new_v4(),
            acquired_at: now,
        };
        let lock_value = serde_json::to_value(&lock)?;

        if !self.state_repo.put_if_absent(LOCK_KEY, &lock_value).await? {
            self.take_over_lock(&lock_value, now).await?;
        }

        let state = ImportRunState {
            running: true,
            processed: 0,
            total: 0,
            percent: 0.0,
            status: RunStatus::Starting,
            message: status_message(RunStatus::Starting, 0, 0, 0),
            timestamp: now,
            start_time: Some(now),
            errors: 0,
            eta_seconds: None,
            run_id: Some(lock.run_id),
        };
        self.save_record(&state).await?;

        info!("Import run {} started", lock.run_id);
        Ok(RunTicket {
            run_id: lock.run_id,
            started_at: now,
        })
    }

    /// Replaces a stale or unreadable lock with `lock_value`. Only the caller
    /// whose compare-and-delete removes the exact value it read may retry.
    async fn take_over_lock(&self, lock_value: &serde_json::Value, now: DateTime<Utc>) -> Result<(), ImportError> {
        let raw = match self.state_repo.get(LOCK_KEY).await? {
            Some(raw) => raw,
            None => {
                debug!("Import lock released concurrently, retrying once");
                return self.retry_lock(lock_value).await;
            }
        };

        if let Ok(held) = serde_json::from_value::<RunLock>(raw.clone()) {
            if !held.is_stale(now) {
                warn!("Import lock held by run {} for {}s", held.run_id, held.age_secs(now));
                return Err(ImportError::AlreadyRunning {
                    started_secs_ago: held.age_secs(now),
                });
            }
        }

        if !self.state_repo.compare_and_delete(LOCK_KEY, &raw).await? {
            debug!("Stale import lock was already taken over");
            return Err(ImportError::AlreadyRunning { started_secs_ago: 0 });
        }
        warn!("Removed stale or unreadable import lock");
        self.retry_lock(lock_value).await
    }

    async fn retry_lock(&self, lock_value: &serde_json::Value) -> Result<(), ImportError> {
        if self.state_repo.put_if_absent(LOCK_KEY, lock_value).await? {
            Ok(())
        } else {
            Err(ImportError::AlreadyRunning { started_secs_ago: 0 })
        }
    }

    /// Records progress of an active run. Writes from a run that no longer
    /// owns the record (after a reset) are dropped.
    pub async fn update(
        &self,
        ticket: &RunTicket,
        counters: RunCounters,
        status: RunStatus,
    ) -> Result<(), ImportError> {
        let now = Utc::now();
        let mut state = match self.load_record().await? {
            Some(state) if state.run_id == Some(ticket.run_id) => state,
            _ => {
                debug!("Run {} no longer owns the progress record, skipping update", ticket.run_id);
                return Ok(());
            }
        };

        state.processed = counters.processed;
        state.total = counters.total;
        state.errors = counters.errors;
        state.percent = percent(counters.processed, counters.total);
        state.status = status;
        state.message = status_message(status, counters.processed, counters.total, counters.errors);
        state.timestamp = now;
        state.eta_seconds = estimate_eta(
            state.start_time.unwrap_or(ticket.started_at),
            now,
            counters.processed,
            counters.total,
        );

        debug!(
            "Progress {}/{} ({:.1}%), {} errors, eta {:?}",
            state.processed, state.total, state.percent, state.errors, state.eta_seconds
        );
        self.save_record(&state).await
    }

    /// Writes the terminal status and releases the lock owned by `ticket`.
    pub async fn finish(
        &self,
        ticket: &RunTicket,
        counters: RunCounters,
        status: RunStatus,
        message: Option<String>,
    ) -> Result<(), ImportError> {
        let now = Utc::now();
        let owns_record = matches!(
            self.load_record().await?,
            Some(ref state) if state.run_id == Some(ticket.run_id)
        );

        if owns_record {
            let state = ImportRunState {
                running: false,
                processed: counters.processed,
                total: counters.total,
                percent: percent(counters.processed, counters.total),
                status,
                message: message
                    .unwrap_or_else(|| status_message(status, counters.processed, counters.total, counters.errors)),
                timestamp: now,
                start_time: Some(ticket.started_at),
                errors: counters.errors,
                eta_seconds: None,
                run_id: Some(ticket.run_id),
            };
            self.save_record(&state).await?;
        } else {
            warn!("Progress record for run {} was replaced before completion", ticket.run_id);
        }

        self.release(ticket).await
    }

    async fn release(&self, ticket: &RunTicket) -> Result<(), ImportError> {
        let raw = match self.state_repo.get(LOCK_KEY).await? {
            Some(raw) => raw,
            None => {
                debug!("Import lock for run {} already gone", ticket.run_id);
                return Ok(());
            }
        };
        match serde_json::from_value::<RunLock>(raw.clone()) {
            Ok(lock) if lock.run_id == ticket.run_id => {
                if self.state_repo.compare_and_delete(LOCK_KEY, &raw).await? {
                    debug!("Released import lock for run {}", ticket.run_id);
                }
            }
            Ok(lock) => warn!("Lock now belongs to run {}, leaving it in place", lock.run_id),
            Err(_) => warn!("Import lock is unreadable, leaving it in place"),
        }
        Ok(())
    }

    /// Returns the current record, turning a stale running record into `timeout`.
    pub async fn read(&self) -> Result<ImportRunState, ImportError> {
        let now = Utc::now();
        let mut state = match self.load_record().await? {
            Some(state) => state,
            None => return Ok(ImportRunState::idle(now)),
        };

        if state.is_stale(now) {
            warn!(
                "Import run {:?} has been running for {:?}s, marking it as timed out",
                state.run_id,
                state.age_secs(now)
            );
            state.running = false;
            state.status = RunStatus::Timeout;
            state.message = status_message(RunStatus::Timeout, state.processed, state.total, state.errors);
            state.eta_seconds = None;
            state.timestamp = now;
            self.save_record(&state).await?;

            if let Some(raw) = self.state_repo.get(LOCK_KEY).await? {
                if let Ok(lock) = serde_json::from_value::<RunLock>(raw.clone()) {
                    if Some(lock.run_id) == state.run_id || lock.is_stale(now) {
                        self.state_repo.compare_and_delete(LOCK_KEY, &raw).await?;
                    }
                }
            }
        }

        Ok(state)
    }

    /// Emergency reset: removes both the record and the lock.
    pub async fn clear(&self) -> Result<bool, ImportError> {
        let had_record = self.state_repo.delete(PROGRESS_KEY).await?;
        let had_lock = self.state_repo.delete(LOCK_KEY).await?;
        warn!("Import state cleared (record: {}, lock: {})", had_record, had_lock);
        Ok(had_record || had_lock)
    }
}

fn percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let value = processed as f64 / total as f64 * 100.0;
    (value * 100.0).round() / 100.0
}

/// Linear-rate estimate of the remaining seconds.
pub fn estimate_eta(start: DateTime<Utc>, now: DateTime<Utc>, processed: usize, total: usize) -> Option<u64> {
    if processed <= ETA_MIN_PROCESSED || total <= processed {
        return None;
    }
    let elapsed = (now - start).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return None;
    }
    let rate = processed as f64 / elapsed;
    Some(((total - processed) as f64 / rate).round() as u64)
}

pub fn status_message(status: RunStatus, processed: usize, total: usize, errors: usize) -> String {
    match status {
        RunStatus::Idle => "No import running".to_string(),
        RunStatus::Starting => "Starting import...".to_string(),
        RunStatus::Processing => format!("Processing row {} of {}", processed, total),
        RunStatus::Completed => format!("Import completed: {} of {} rows processed", processed, total),
        RunStatus::CompletedWithErrors => {
            format!("Import completed with errors: {} of {} rows failed", errors, total)
        }
        RunStatus::Failed => "Import failed".to_string(),
        RunStatus::Timeout => format!("Import timed out after {} of {} rows", processed, total),
    }
}
