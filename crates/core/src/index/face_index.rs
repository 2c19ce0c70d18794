//! Persisted face index: the per-file detection output the clustering
//! engine consumes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::face::{Face, FaceDirection, FaceId, FileId};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to read face index {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse face index {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One face as stored in the index.
///
/// Older index entries carry raw landmarks instead of a direction; the
/// direction is derived from them when the index is flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFace {
    #[serde(rename = "faceID")]
    pub face_id: FaceId,
    pub embedding: Vec<f32>,
    pub blur: f64,
    pub score: f64,
    pub box_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<FaceDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<[(f64, f64); 5]>,
}

impl IndexedFace {
    pub fn resolved_direction(&self) -> FaceDirection {
        match (self.direction, &self.landmarks) {
            (Some(direction), _) => direction,
            (None, Some(points)) => FaceDirection::from_landmarks(points),
            (None, None) => FaceDirection::Straight,
        }
    }

    pub fn into_face(self, file_id: FileId) -> Face {
        let direction = self.resolved_direction();
        Face {
            face_id: self.face_id,
            file_id,
            embedding: self.embedding,
            blur: self.blur,
            score: self.score,
            box_size: self.box_size,
            direction,
            is_bad_face: false,
        }
    }
}

/// All faces detected in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFaceIndex {
    #[serde(rename = "fileID")]
    pub file_id: FileId,
    #[serde(default)]
    pub faces: Vec<IndexedFace>,
}

impl FileFaceIndex {
    pub fn into_faces(self) -> impl Iterator<Item = Face> {
        let file_id = self.file_id;
        self.faces.into_iter().map(move |f| f.into_face(file_id))
    }
}

/// Flattens per-file entries into one face list, keeping file order and
/// detection order within each file.
pub fn flatten_index(files: Vec<FileFaceIndex>) -> Vec<Face> {
    files.into_iter().flat_map(FileFaceIndex::into_faces).collect()
}

/// Source of previously indexed faces.
pub trait FaceIndexReader {
    fn read_faces(&self) -> Result<Vec<Face>, IndexError>;
}
