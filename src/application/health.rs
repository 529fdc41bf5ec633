use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::application::progress_store::ProgressStore;
use crate::domain::models::ResourceLimits;

pub const MIN_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
pub const MIN_EXECUTION_SECS: u64 = 60;
pub const MIN_FREE_DISK_BYTES: u64 = 100 * 1024 * 1024;
pub const STUCK_AFTER_SECS: i64 = 600;
pub const MIN_RUNTIME_VERSION: &str = "1.70.0";
pub const MIN_FRAMEWORK_VERSION: &str = "0.1.0";
const UNKNOWN_RUNTIME_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEnvironment {
    pub runtime_version: String,
    pub framework_version: String,
    pub http_client_available: bool,
    pub upload_dir: PathBuf,
}

impl HostEnvironment {
    /// Compiler version recorded by the build script, a client built with the
    /// default TLS backend, and the given upload directory.
    pub fn detect(upload_dir: PathBuf) -> Self {
        let http_client_available = match reqwest::Client::builder().build() {
            Ok(_) => true,
            Err(e) => {
                warn!("HTTP client cannot be initialised: {}", e);
                false
            }
        };
        Self {
            runtime_version: option_env!("CSV_IMPORTER_RUSTC_VERSION")
                .unwrap_or(UNKNOWN_RUNTIME_VERSION)
                .to_string(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            http_client_available,
            upload_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn check(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failing(&self) -> Vec<&HealthCheck> {
        self.checks.iter().filter(|c| !c.ok).collect()
    }
}

/// Compares dotted numeric versions; missing components count as zero.
pub fn version_at_least(actual: &str, minimum: &str) -> bool {
    fn parts(v: &str) -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|p| {
                p.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    }
    let (a, m) = (parts(actual), parts(minimum));
    let len = a.len().max(m.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = m.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    true
}

fn format_mib(bytes: u64) -> String {
    format!("{} MiB", bytes / (1024 * 1024))
}

pub struct HealthChecker {
    env: HostEnvironment,
    progress: Arc<ProgressStore>,
}

impl HealthChecker {
    pub fn new(env: HostEnvironment, progress: Arc<ProgressStore>) -> Self {
        Self { env, progress }
    }

    /// Read-only snapshot; every check is independent.
    pub async fn snapshot(&self, limits: &ResourceLimits) -> HealthReport {
        let now = Utc::now();
        let mut checks = Vec::with_capacity(9);

        checks.push(match limits.memory_limit_bytes {
            None => HealthCheck::new("memory_limit", true, "unlimited"),
            Some(limit) => HealthCheck::new(
                "memory_limit",
                limit >= MIN_MEMORY_BYTES,
                format!("{} (minimum {})", format_mib(limit), format_mib(MIN_MEMORY_BYTES)),
            ),
        });

        checks.push(match limits.max_execution_secs {
            None | Some(0) => HealthCheck::new("execution_time", true, "unlimited"),
            Some(secs) => HealthCheck::new(
                "execution_time",
                secs >= MIN_EXECUTION_SECS,
                format!("{}s (minimum {}s)", secs, MIN_EXECUTION_SECS),
            ),
        });

        checks.push(HealthCheck::new(
            "runtime_version",
            version_at_least(&self.env.runtime_version, MIN_RUNTIME_VERSION),
            format!("{} (minimum {})", self.env.runtime_version, MIN_RUNTIME_VERSION),
        ));

        checks.push(HealthCheck::new(
            "framework_version",
            version_at_least(&self.env.framework_version, MIN_FRAMEWORK_VERSION),
            format!("{} (minimum {})", self.env.framework_version, MIN_FRAMEWORK_VERSION),
        ));

        checks.push(HealthCheck::new(
            "http_client",
            self.env.http_client_available,
            if self.env.http_client_available { "available" } else { "missing" },
        ));

        checks.push(match fs2::available_space(&self.env.upload_dir) {
            Ok(free) => HealthCheck::new(
                "disk_space",
                free >= MIN_FREE_DISK_BYTES,
                format!("{} free (minimum {})", format_mib(free), format_mib(MIN_FREE_DISK_BYTES)),
            ),
            Err(e) => HealthCheck::new("disk_space", false, format!("cannot determine free space: {}", e)),
        });

        checks.push(match tempfile::tempfile_in(&self.env.upload_dir) {
            Ok(_) => HealthCheck::new("upload_dir_writable", true, self.env.upload_dir.display().to_string()),
            Err(e) => HealthCheck::new(
                "upload_dir_writable",
                false,
                format!("{}: {}", self.env.upload_dir.display(), e),
            ),
        });

        checks.push(match self.progress.current_lock().await {
            Ok(Some(lock)) if lock.is_stale(now) => HealthCheck::new(
                "stale_lock",
                false,
                format!("lock held by run {} for {}s", lock.run_id, lock.age_secs(now)),
            ),
            Ok(Some(lock)) => HealthCheck::new("stale_lock", true, format!("lock held by active run {}", lock.run_id)),
            Ok(None) => HealthCheck::new("stale_lock", true, "no lock"),
            Err(e) => HealthCheck::new("stale_lock", false, format!("cannot read lock: {}", e)),
        });

        checks.push(match self.progress.peek().await {
            Ok(Some(state)) if state.running => match state.age_secs(now) {
                Some(age) if age <= STUCK_AFTER_SECS => {
                    HealthCheck::new("stuck_process", true, format!("run active for {}s", age))
                }
                Some(age) => HealthCheck::new("stuck_process", false, format!("run marked running for {}s", age)),
                None => HealthCheck::new("stuck_process", false, "run marked running without a start time"),
            },
            Ok(_) => HealthCheck::new("stuck_process", true, "no run active"),
            Err(e) => HealthCheck::new("stuck_process", false, format!("cannot read progress: {}", e)),
        });

        let healthy = checks.iter().all(|c| c.ok);
        if healthy {
            debug!("Health snapshot: all {} checks passed", checks.len());
        } else {
            for check in checks.iter().filter(|c| !c.ok) {
                warn!("Health check '{}' failed: {}", check.name, check.detail);
            }
        }

        HealthReport {
            healthy,
            checked_at: now,
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::progress_store::{LOCK_KEY, PROGRESS_KEY};
    use crate::domain::ports::StateRepository;
    use crate::domain::progress::{ImportRunState, RunLock, RunStatus};
    use crate::infrastructure::store::MemoryStateRepository;
    use chrono::Duration;
    use uuid::Uuid;

    fn checker(dir: &std::path::Path) -> (Arc<MemoryStateRepository>, HealthChecker) {
        let repo = Arc::new(MemoryStateRepository::new());
        let progress = Arc::new(ProgressStore::new(repo.clone()));
        (repo, HealthChecker::new(HostEnvironment::detect(dir.to_path_buf()), progress))
    }

    #[test]
    fn test_version_comparison() {
        assert!(version_at_least("1.70.0", "1.70.0"));
        assert!(version_at_least("1.75", "1.70.0"));
        assert!(version_at_least("v2.0.0-beta", "1.99"));
        assert!(!version_at_least("1.69.9", "1.70"));
        assert!(!version_at_least("0.0.9", "0.1.0"));
    }

    #[tokio::test]
    async fn test_limits_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let (_, checker) = checker(dir.path());

        let unlimited = ResourceLimits { memory_limit_bytes: None, max_execution_secs: None };
        let report = checker.snapshot(&unlimited).await;
        assert!(report.check("memory_limit").unwrap().ok);
        assert!(report.check("execution_time").unwrap().ok);
        assert!(report.check("upload_dir_writable").unwrap().ok);
        assert!(report.check("stale_lock").unwrap().ok);
        assert!(report.check("stuck_process").unwrap().ok);
        assert_eq!(report.checks.len(), 9);

        let tight = ResourceLimits {
            memory_limit_bytes: Some(64 * 1024 * 1024),
            max_execution_secs: Some(30),
        };
        let report = checker.snapshot(&tight).await;
        assert!(!report.healthy);
        assert!(!report.check("memory_limit").unwrap().ok);
        assert!(!report.check("execution_time").unwrap().ok);
    }

    #[test]
    fn test_detect_reports_build_toolchain() {
        let env = HostEnvironment::detect(PathBuf::from("."));
        assert_ne!(env.runtime_version, UNKNOWN_RUNTIME_VERSION);
        assert!(version_at_least(&env.runtime_version, MIN_RUNTIME_VERSION));
        assert!(env.http_client_available);
    }

    #[tokio::test]
    async fn test_old_toolchain_and_missing_http_client_fail() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(ProgressStore::new(Arc::new(MemoryStateRepository::new())));
        let env = HostEnvironment {
            runtime_version: "1.60.0".to_string(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            http_client_available: false,
            upload_dir: dir.path().to_path_buf(),
        };
        let report = HealthChecker::new(env, progress).snapshot(&ResourceLimits::default()).await;
        assert!(!report.healthy);
        assert!(!report.check("runtime_version").unwrap().ok);
        assert_eq!(report.check("http_client").unwrap().detail, "missing");
        assert!(!report.check("http_client").unwrap().ok);
    }

    #[tokio::test]
    async fn test_missing_upload_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_, checker) = checker(&dir.path().join("missing"));
        let report = checker.snapshot(&ResourceLimits::default()).await;
        assert!(!report.check("upload_dir_writable").unwrap().ok);
        assert!(!report.healthy);
    }

    #[tokio::test]
    async fn test_stale_lock_and_stuck_run_are_reported_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, checker) = checker(dir.path());
        let now = Utc::now();

        let lock = RunLock { run_id: Uuid::new_v4(), acquired_at: now - Duration::seconds(1000) };
        repo.put(LOCK_KEY, &serde_json::to_value(&lock).unwrap()).await.unwrap();

        let mut state = ImportRunState::idle(now);
        state.running = true;
        state.status = RunStatus::Processing;
        state.start_time = Some(now - Duration::seconds(700));
        repo.put(PROGRESS_KEY, &serde_json::to_value(&state).unwrap()).await.unwrap();

        let report = checker.snapshot(&ResourceLimits::default()).await;
        assert!(!report.check("stale_lock").unwrap().ok);
        assert!(!report.check("stuck_process").unwrap().ok);
        assert_eq!(report.failing().len(), 2 + usize::from(!report.check("disk_space").unwrap().ok));

        // the snapshot must not heal anything
        assert!(repo.get(LOCK_KEY).await.unwrap().is_some());
        let persisted: ImportRunState =
            serde_json::from_value(repo.get(PROGRESS_KEY).await.unwrap().unwrap()).unwrap();
        assert!(persisted.running);
    }
}
