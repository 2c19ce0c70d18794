use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::clustering::domain::clustering_state::ClusteringState;
use crate::clustering::domain::state_store::{StateStore, StoreError};

/// In-process state store. Clones share the same slot and lock, so a test
/// (or a caller that wants to inspect what was persisted) can keep a handle
/// while the engine owns another.
#[derive(Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<ClusteringState>>>,
    busy: Arc<AtomicBool>,
    held: bool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ClusteringState) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(state))),
            busy: Arc::default(),
            held: false,
        }
    }

    /// Copy of whatever was last saved.
    pub fn snapshot(&self) -> Option<ClusteringState> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }
}

impl Clone for MemoryStateStore {
    /// The clone shares the state but never inherits this handle's lock.
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            busy: Arc::clone(&self.busy),
            held: false,
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<ClusteringState>, StoreError> {
        let slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.clone())
    }

    fn save(&mut self, state: &ClusteringState) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(state.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }

    fn lock(&mut self) -> Result<(), StoreError> {
        if self.held {
            return Ok(());
        }
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::Locked("in memory".into()))?;
        self.held = true;
        Ok(())
    }

    fn unlock(&mut self) {
        if std::mem::take(&mut self.held) {
            self.busy.store(false, Ordering::Release);
        }
    }
}

impl Drop for MemoryStateStore {
    fn drop(&mut self) {
        self.unlock();
    }
}
