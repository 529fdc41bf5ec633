use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use uuid::Uuid;
use crate::domain::{error::ImportError, ports::StateRepository};

/// Stores each key as `<dir>/<key>.json`.
///
/// Every mutation of a key runs under an exclusive lock on `<dir>/.<key>.guard`,
/// across threads and processes alike. Values are written to a temporary file
/// first. `put` renames it over the target and `put_if_absent` hard-links it,
/// so a value is never observed half written.
pub struct FileStateRepository {
    dir: PathBuf,
}

fn storage_error(path: &Path, e: std::io::Error) -> ImportError {
    ImportError::Storage(format!("{}: {}", path.display(), e))
}

/// Paths of one key, moved into the blocking pool for each mutation.
struct KeyFiles {
    dir: PathBuf,
    key: String,
    path: PathBuf,
}

impl KeyFiles {
    fn guard(&self) -> Result<File, ImportError> {
        let guard_path = self.dir.join(format!(".{}.guard", self.key));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&guard_path)
            .map_err(|e| storage_error(&guard_path, e))?;
        file.lock_exclusive().map_err(|e| {
            error!("Failed to lock state key {}: {}", self.key, e);
            storage_error(&guard_path, e)
        })?;
        Ok(file)
    }

    fn write_temp(&self, value: &serde_json::Value) -> Result<PathBuf, ImportError> {
        let temp = self.dir.join(format!(".{}.{}.tmp", self.key, Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(value)?;
        std::fs::write(&temp, bytes).map_err(|e| storage_error(&temp, e))?;
        Ok(temp)
    }

    fn read(&self) -> Result<Option<serde_json::Value>, ImportError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&self.path, e)),
        }
    }

    fn remove(&self) -> Result<bool, ImportError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error(&self.path, e)),
        }
    }
}

impl FileStateRepository {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ImportError> {
        let dir = dir.into();
        debug!("Opening file state repository at {}", dir.display());
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            error!("Failed to create state directory {}: {}", dir.display(), e);
            ImportError::Storage(format!("{}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ImportError> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ImportError::Storage(format!("invalid state key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    /// Runs `op` on the blocking pool while holding the key's guard.
    async fn mutate<T, F>(&self, key: &str, op: F) -> Result<T, ImportError>
    where
        T: Send + 'static,
        F: FnOnce(&KeyFiles) -> Result<T, ImportError> + Send + 'static,
    {
        let files = KeyFiles {
            dir: self.dir.clone(),
            key: key.to_string(),
            path: self.path_for(key)?,
        };
        tokio::task::spawn_blocking(move || {
            let guard = files.guard()?;
            let result = op(&files);
            if let Err(e) = guard.unlock() {
                debug!("Releasing guard for state key {} failed: {}", files.key, e);
            }
            result
        })
        .await
        .map_err(|e| ImportError::Storage(format!("state task failed: {}", e)))?
    }
}

#[async_trait]
impl StateRepository for FileStateRepository {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ImportError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read state key {}: {}", key, e);
                Err(storage_error(&path, e))
            }
        }
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), ImportError> {
        let value = value.clone();
        self.mutate(key, move |files| {
            let temp = files.write_temp(&value)?;
            std::fs::rename(&temp, &files.path).map_err(|e| {
                error!("Failed to persist state key {}: {}", files.key, e);
                let _ = std::fs::remove_file(&temp);
                storage_error(&files.path, e)
            })
        })
        .await
    }

    async fn put_if_absent(&self, key: &str, value: &serde_json::Value) -> Result<bool, ImportError> {
        let value = value.clone();
        self.mutate(key, move |files| {
            let temp = files.write_temp(&value)?;
            let linked = std::fs::hard_link(&temp, &files.path);
            let _ = std::fs::remove_file(&temp);

            match linked {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("State key {} already present", files.key);
                    Ok(false)
                }
                Err(e) => Err(storage_error(&files.path, e)),
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, ImportError> {
        self.mutate(key, |files| files.remove()).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &serde_json::Value) -> Result<bool, ImportError> {
        let expected = expected.clone();
        self.mutate(key, move |files| match files.read()? {
            Some(current) if current == expected => files.remove(),
            _ => Ok(false),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileStateRepository::open(dir.path()).await.unwrap();
        repo.put("import_stats", &json!({"total_imported": 3})).await.unwrap();
        repo.put("import_stats", &json!({"total_imported": 4})).await.unwrap();

        let reopened = FileStateRepository::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("import_stats").await.unwrap(),
            Some(json!({"total_imported": 4}))
        );
    }

    #[tokio::test]
    async fn test_put_if_absent_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileStateRepository::open(dir.path()).await.unwrap();

        assert!(repo.put_if_absent("import_lock", &json!("first")).await.unwrap());
        assert!(!repo.put_if_absent("import_lock", &json!("second")).await.unwrap());
        assert_eq!(repo.get("import_lock").await.unwrap(), Some(json!("first")));

        assert!(repo.delete("import_lock").await.unwrap());
        assert!(repo.put_if_absent("import_lock", &json!("third")).await.unwrap());
    }

    #[tokio::test]
    async fn test_temp_files_are_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileStateRepository::open(dir.path()).await.unwrap();
        repo.put_if_absent("k", &json!(1)).await.unwrap();
        repo.put_if_absent("k", &json!(2)).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.ends_with(".guard"))
            .collect();
        assert_eq!(names, vec!["k.json".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileStateRepository::open(dir.path()).await.unwrap();
        assert!(repo.get("../escape").await.is_err());
    }

    #[tokio::test]
    async fn test_compare_and_delete_only_removes_expected_value() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileStateRepository::open(dir.path()).await.unwrap();
        repo.put("import_lock", &json!({"run_id": "a"})).await.unwrap();

        assert!(!repo.compare_and_delete("import_lock", &json!({"run_id": "b"})).await.unwrap());
        assert_eq!(repo.get("import_lock").await.unwrap(), Some(json!({"run_id": "a"})));

        assert!(repo.compare_and_delete("import_lock", &json!({"run_id": "a"})).await.unwrap());
        assert!(repo.get("import_lock").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_compare_and_delete_succeeds_once() {
        let dir = tempfile::tempdir().unwrap();
        let repo = std::sync::Arc::new(FileStateRepository::open(dir.path()).await.unwrap());
        let stale = json!({"run_id": "stale"});
        repo.put("import_lock", &stale).await.unwrap();

        let attempts: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                let stale = stale.clone();
                tokio::spawn(async move {
                    if repo.compare_and_delete("import_lock", &stale).await.unwrap() {
                        repo.put_if_absent("import_lock", &json!({"run_id": i})).await.unwrap()
                    } else {
                        false
                    }
                })
            })
            .collect();

        let mut owners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);
    }
}
