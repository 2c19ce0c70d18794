use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use crate::shared::face::FaceId;
use crate::shared::vector_math;

/// Faces sharing a union-find representative.
///
/// Equality covers membership only; the cached summary is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub representative: FaceId,
    pub faces: Vec<FaceId>,
    #[serde(skip)]
    summary: OnceCell<Option<Vec<f32>>>,
}

impl Cluster {
    pub fn new(representative: FaceId, faces: Vec<FaceId>) -> Self {
        Self {
            representative,
            faces,
            summary: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn contains(&self, face_id: &str) -> bool {
        self.faces.iter().any(|f| f == face_id)
    }

    /// Normalised centroid of the members' embeddings, computed on first use.
    ///
    /// `lookup` maps a face ID to its embedding. Faces it cannot resolve, or
    /// whose embedding is not `dimension` long, are left out.
    pub fn summary<'a, F>(&self, dimension: usize, lookup: F) -> Option<&[f32]>
    where
        F: Fn(&str) -> Option<&'a [f32]>,
    {
        self.summary
            .get_or_init(|| {
                let members = self.faces.iter().filter_map(|id| lookup(id.as_str()));
                vector_math::centroid(members, dimension)
            })
            .as_deref()
    }
}

impl PartialEq for Cluster {
    fn eq(&self, other: &Self) -> bool {
        self.representative == other.representative && self.faces == other.faces
    }
}

/// Counters describing how the input was split up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringStats {
    pub total_face_count: usize,
    /// Rejected by the quality filter. Neither clustered nor noise.
    pub filtered_face_count: usize,
    /// Wrong dimensionality, non-finite values or duplicate IDs. Neither
    /// clustered nor noise.
    pub malformed_face_count: usize,
    /// Zero-norm embeddings. These are always noise.
    pub degenerate_face_count: usize,
    pub clustered_face_count: usize,
    pub unclustered_face_count: usize,
    /// Faces compared in this run, as opposed to restored from earlier runs.
    pub newly_processed_face_count: usize,
    pub batch_count: usize,
    pub time_taken_ms: u64,
}

/// Output of a completed clustering run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResults {
    pub clusters: Vec<Cluster>,
    pub noise: Vec<FaceId>,
    pub stats: ClusteringStats,
}

impl ClusteringResults {
    /// Cluster membership as plain face ID lists.
    pub fn cluster_face_ids(&self) -> Vec<Vec<FaceId>> {
        self.clusters.iter().map(|c| c.faces.clone()).collect()
    }

    pub fn cluster_of(&self, face_id: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.contains(face_id))
    }
}

/// Batch-level progress, reported after every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringProgress {
    pub completed: usize,
    pub total: usize,
}
