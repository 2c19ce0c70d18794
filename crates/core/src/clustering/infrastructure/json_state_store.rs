use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::clustering::domain::clustering_state::ClusteringState;
use crate::clustering::domain::state_store::{StateStore, StoreError};

/// Persists clustering state as a single JSON document.
///
/// Saves go through a sibling temporary file followed by a rename, so an
/// interrupted write never replaces the last good state.
///
/// The run lock is a sibling `<state>.lock` file created exclusively and
/// holding the owner's process ID. It is removed on unlock or drop; a process
/// that is killed mid-run leaves it behind and it must be deleted by hand.
pub struct JsonStateStore {
    path: PathBuf,
    held_lock: Option<PathBuf>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held_lock: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<ClusteringState>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let state = serde_json::from_slice(&bytes)?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &ClusteringState) -> Result<(), StoreError> {
        self.ensure_parent()?;

        let json = serde_json::to_vec(state)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            self.io_error(e)
        })?;

        log::debug!(
            "Saved clustering state ({} faces) to {}",
            state.face_count(),
            self.path.display()
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn lock(&mut self) -> Result<(), StoreError> {
        if self.held_lock.is_some() {
            return Ok(());
        }
        self.ensure_parent()?;

        let lock_path = self.lock_path();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked(lock_path.display().to_string()));
            }
            Err(e) => return Err(self.io_error(e)),
        };
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            log::debug!("Could not record owner in {}: {e}", lock_path.display());
        }
        log::debug!("Locked clustering state at {}", self.path.display());
        self.held_lock = Some(lock_path);
        Ok(())
    }

    fn unlock(&mut self) {
        if let Some(lock_path) = self.held_lock.take() {
            if let Err(e) = fs::remove_file(&lock_path) {
                log::warn!("Failed to remove state lock {}: {e}", lock_path.display());
            }
        }
    }
}

impl Drop for JsonStateStore {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::domain::clustering_opts::ClusteringOpts;
    use crate::clustering::domain::union_find::ClusterStore;

    fn sample_state() -> ClusteringState {
        let mut state = ClusteringState::new(1, 192, ClusteringOpts::default());
        let mut store = ClusterStore::new();
        store.union("1_0", "2_0");
        store.find("3_0");
        state.capture(&mut store);
        state
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStateStore::new(dir.path().join("nested").join("state.json"));
        let state = sample_state();

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStateStore::new(dir.path().join("state.json"));
        store.save(&sample_state()).unwrap();

        let empty = ClusteringState::new(1, 192, ClusteringOpts::default());
        store.save(&empty).unwrap();
        assert_eq!(store.load().unwrap().unwrap().face_count(), 0);
    }

    #[test]
    fn test_corrupt_file_is_serialize_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();

        let err = JsonStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Serialize(_)));
    }

    #[test]
    fn test_clear_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStateStore::new(dir.path().join("state.json"));
        store.save(&sample_state()).unwrap();

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_lock_excludes_second_handle_on_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut first = JsonStateStore::new(&path);
        let mut second = JsonStateStore::new(&path);

        first.lock().unwrap();
        assert!(first.lock_path().exists());
        assert!(matches!(second.lock(), Err(StoreError::Locked(_))));

        first.unlock();
        assert!(!first.lock_path().exists());
        second.lock().unwrap();
    }

    #[test]
    fn test_drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut first = JsonStateStore::new(&path);
        first.lock().unwrap();
        let lock_path = first.lock_path();
        drop(first);

        assert!(!lock_path.exists());
        assert!(JsonStateStore::new(&path).lock().is_ok());
    }

    #[test]
    fn test_unlock_without_lock_keeps_foreign_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut owner = JsonStateStore::new(&path);
        owner.lock().unwrap();

        let mut other = JsonStateStore::new(&path);
        other.unlock();
        assert!(owner.lock_path().exists());
    }
}
