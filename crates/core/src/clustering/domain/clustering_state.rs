use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clustering::domain::clustering_opts::ClusteringOpts;
use crate::clustering::domain::union_find::ClusterStore;
use crate::shared::face::FaceId;

/// Reasons a persisted state cannot be resumed. Each one forces a full
/// recluster; none of them is surfaced to the user as a failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("clustering state version {found} does not match expected version {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("clustering state was built for {found}-d embeddings, expected {expected}-d")]
    DimensionMismatch { found: usize, expected: usize },
    #[error("clustering options changed since the state was built")]
    OptionsChanged,
}

/// Durable form of the cluster store.
///
/// `generation` increases every time a persisted state is discarded, so two
/// snapshots with the same generation were built by the same cluster graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringState {
    pub version: u32,
    #[serde(default)]
    pub generation: u64,
    pub dimension: usize,
    pub opts: ClusteringOpts,
    pub parent: BTreeMap<FaceId, FaceId>,
    pub cluster_size: BTreeMap<FaceId, usize>,
}

impl ClusteringState {
    pub fn new(version: u32, dimension: usize, opts: ClusteringOpts) -> Self {
        Self {
            version,
            generation: 0,
            dimension,
            opts,
            parent: BTreeMap::new(),
            cluster_size: BTreeMap::new(),
        }
    }

    /// Fails if this state was produced under a different method version,
    /// embedding dimensionality or set of options.
    pub fn check_compatible(
        &self,
        version: u32,
        dimension: usize,
        opts: &ClusteringOpts,
    ) -> Result<(), StateError> {
        if self.version != version {
            return Err(StateError::VersionMismatch {
                found: self.version,
                expected: version,
            });
        }
        if self.dimension != dimension {
            return Err(StateError::DimensionMismatch {
                found: self.dimension,
                expected: dimension,
            });
        }
        if &self.opts != opts {
            return Err(StateError::OptionsChanged);
        }
        Ok(())
    }

    /// Empty successor of an incompatible state.
    pub fn reset(&self, version: u32, dimension: usize, opts: ClusteringOpts) -> Self {
        Self {
            generation: self.generation + 1,
            ..Self::new(version, dimension, opts)
        }
    }

    pub fn to_store(&self) -> ClusterStore {
        ClusterStore::from_parent_map(self.parent.clone())
    }

    /// Captures `store` into this state. The store is flattened first so the
    /// persisted parent map is canonical.
    pub fn capture(&mut self, store: &mut ClusterStore) {
        store.flatten();
        self.parent = store.parent_map().clone();
        self.cluster_size = store.size_map().clone();
    }

    pub fn face_count(&self) -> usize {
        self.parent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ClusteringState {
        ClusteringState::new(1, 4, ClusteringOpts::default())
    }

    #[test]
    fn test_compatible_with_same_settings() {
        assert!(state()
            .check_compatible(1, 4, &ClusteringOpts::default())
            .is_ok());
    }

    #[test]
    fn test_version_mismatch() {
        let err = state()
            .check_compatible(2, 4, &ClusteringOpts::default())
            .unwrap_err();
        assert_eq!(
            err,
            StateError::VersionMismatch {
                found: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = state()
            .check_compatible(1, 512, &ClusteringOpts::default())
            .unwrap_err();
        assert!(matches!(err, StateError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_threshold_change_is_incompatible() {
        let opts = ClusteringOpts {
            join_threshold: 0.7,
            ..ClusteringOpts::default()
        };
        assert_eq!(
            state().check_compatible(1, 4, &opts).unwrap_err(),
            StateError::OptionsChanged
        );
    }

    #[test]
    fn test_reset_bumps_generation_and_clears() {
        let mut old = state();
        let mut store = ClusterStore::new();
        store.union("a", "b");
        old.capture(&mut store);

        let fresh = old.reset(2, 4, ClusteringOpts::default());
        assert_eq!(fresh.generation, 1);
        assert_eq!(fresh.version, 2);
        assert_eq!(fresh.face_count(), 0);
    }

    #[test]
    fn test_capture_round_trips_through_store() {
        let mut state = state();
        let mut store = ClusterStore::new();
        store.union("a", "b");
        store.union("b", "c");
        store.find("d");
        state.capture(&mut store);

        assert_eq!(state.face_count(), 4);
        assert_eq!(state.cluster_size.get("a"), Some(&3));
        assert_eq!(state.to_store(), store);
    }

    #[test]
    fn test_json_round_trip() {
        let mut state = state();
        let mut store = ClusterStore::new();
        store.union("x", "y");
        state.capture(&mut store);

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"clusterSize\""));
        let back: ClusteringState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
