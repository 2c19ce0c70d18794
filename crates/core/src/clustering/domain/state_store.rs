use std::path::PathBuf;

use thiserror::Error;

use crate::clustering::domain::clustering_state::ClusteringState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access clustering state at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialise clustering state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("clustering state lock poisoned")]
    Poisoned,
    #[error("clustering state {0} is in use by another run")]
    Locked(String),
}

/// Port for persisting [`ClusteringState`] between runs.
///
/// `save` must replace the previous state atomically: a failed save leaves
/// the last good state loadable.
///
/// A run holds [`StateStore::lock`] from before its first load until after
/// its last save. Every handle onto the same persisted state must honour it.
pub trait StateStore: Send {
    /// Returns `None` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<ClusteringState>, StoreError>;

    fn save(&mut self, state: &ClusteringState) -> Result<(), StoreError>;

    fn clear(&mut self) -> Result<(), StoreError>;

    /// Takes exclusive use of the persisted state. Fails with
    /// [`StoreError::Locked`] while another handle holds it.
    fn lock(&mut self) -> Result<(), StoreError>;

    /// Releases a lock taken by this handle. No-op otherwise.
    fn unlock(&mut self);
}
