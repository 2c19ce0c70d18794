use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_EARLY_EXIT_THRESHOLD, DEFAULT_JOIN_THRESHOLD, DEFAULT_MIN_BLUR,
    DEFAULT_MIN_CLUSTER_SIZE, DEFAULT_MIN_SCORE, DEFAULT_OFFSET_INCREMENT,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptsError {
    #[error("{name} must be within [-1, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("earlyExitThreshold ({early_exit}) must not be below joinThreshold ({join})")]
    EarlyExitBelowJoin { early_exit: f64, join: f64 },
    #[error("{0} must be positive")]
    Zero(&'static str),
    #[error("offsetIncrement ({offset_increment}) must not exceed batchSize ({batch_size})")]
    OffsetExceedsBatch {
        offset_increment: usize,
        batch_size: usize,
    },
}

/// Parameters for one clustering run.
///
/// Every field has a default, filled in when the struct is built or
/// deserialised. Fields missing from a JSON options file take the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusteringOpts {
    /// Faces with a sharpness below this are not clustered.
    pub min_blur: f64,
    /// Faces with a detection score below this are not clustered.
    pub min_score: f64,
    /// Groups smaller than this are reported as noise.
    pub min_cluster_size: usize,
    /// Minimum cosine similarity for a face to join its best match.
    pub join_threshold: f64,
    /// Once a candidate this similar is found, stop scanning for a face.
    pub early_exit_threshold: f64,
    /// Number of faces in each comparison window.
    pub batch_size: usize,
    /// Distance between the starts of consecutive windows. Windows overlap
    /// by `batch_size - offset_increment` faces.
    pub offset_increment: usize,
    /// Also reject faces flagged by the bad-face heuristics.
    pub bad_face_heuristics: bool,
}

impl Default for ClusteringOpts {
    fn default() -> Self {
        Self {
            min_blur: DEFAULT_MIN_BLUR,
            min_score: DEFAULT_MIN_SCORE,
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            join_threshold: DEFAULT_JOIN_THRESHOLD,
            early_exit_threshold: DEFAULT_EARLY_EXIT_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            offset_increment: DEFAULT_OFFSET_INCREMENT,
            bad_face_heuristics: true,
        }
    }
}

impl ClusteringOpts {
    pub fn validate(&self) -> Result<(), OptsError> {
        for (name, value) in [
            ("joinThreshold", self.join_threshold),
            ("earlyExitThreshold", self.early_exit_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(OptsError::ThresholdOutOfRange { name, value });
            }
        }
        if self.early_exit_threshold < self.join_threshold {
            return Err(OptsError::EarlyExitBelowJoin {
                early_exit: self.early_exit_threshold,
                join: self.join_threshold,
            });
        }
        if self.batch_size == 0 {
            return Err(OptsError::Zero("batchSize"));
        }
        if self.offset_increment == 0 {
            return Err(OptsError::Zero("offsetIncrement"));
        }
        if self.min_cluster_size == 0 {
            return Err(OptsError::Zero("minClusterSize"));
        }
        if self.offset_increment > self.batch_size {
            return Err(OptsError::OffsetExceedsBatch {
                offset_increment: self.offset_increment,
                batch_size: self.batch_size,
            });
        }
        Ok(())
    }
}
