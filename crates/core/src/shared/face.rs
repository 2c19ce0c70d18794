use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::face_landmarks::FaceLandmarks;

/// Stable face identifier, unique per (file, detection index).
pub type FaceId = String;

/// Identifier of the photo a face was detected in.
pub type FileId = u64;

/// Per-face problems. These are recovered locally: the face is skipped or
/// left unclustered and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceError {
    #[error("face {face_id}: embedding has {actual} dimensions, expected {expected}")]
    MalformedEmbedding {
        face_id: FaceId,
        expected: usize,
        actual: usize,
    },
    #[error("face {face_id}: embedding contains non-finite values")]
    NonFiniteEmbedding { face_id: FaceId },
    #[error("face {face_id}: embedding has zero norm")]
    DegenerateVector { face_id: FaceId },
    #[error("face {face_id}: duplicate face ID in input")]
    DuplicateFace { face_id: FaceId },
}

/// Head orientation estimated from the detection's landmarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceDirection {
    Left,
    Right,
    #[default]
    Straight,
}

impl FaceDirection {
    /// Estimate from 5-point landmarks: left eye, right eye, nose, left and
    /// right mouth corners.
    pub fn from_landmarks(points: &[(f64, f64); 5]) -> Self {
        FaceLandmarks::new(*points).direction()
    }
}

impl std::fmt::Display for FaceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaceDirection::Left => write!(f, "left"),
            FaceDirection::Right => write!(f, "right"),
            FaceDirection::Straight => write!(f, "straight"),
        }
    }
}

/// One detected face with its embedding and quality signals.
///
/// `blur` is a sharpness measure (variance of the Laplacian over the aligned
/// crop): higher means sharper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    #[serde(rename = "faceID")]
    pub face_id: FaceId,
    #[serde(rename = "fileID")]
    pub file_id: FileId,
    pub embedding: Vec<f32>,
    pub blur: f64,
    pub score: f64,
    /// Smaller side of the detection box relative to the image, in `[0, 1]`.
    pub box_size: f64,
    #[serde(default)]
    pub direction: FaceDirection,
    /// Derived by the quality filter; never read back as input.
    #[serde(default)]
    pub is_bad_face: bool,
}

impl Face {
    /// Checks that the embedding has `dimension` finite components.
    pub fn validate_embedding(&self, dimension: usize) -> Result<(), FaceError> {
        if self.embedding.len() != dimension {
            return Err(FaceError::MalformedEmbedding {
                face_id: self.face_id.clone(),
                expected: dimension,
                actual: self.embedding.len(),
            });
        }
        if self.embedding.iter().any(|x| !x.is_finite()) {
            return Err(FaceError::NonFiniteEmbedding {
                face_id: self.face_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(embedding: Vec<f32>) -> Face {
        Face {
            face_id: "7_0".into(),
            file_id: 7,
            embedding,
            blur: 120.0,
            score: 0.9,
            box_size: 0.2,
            direction: FaceDirection::Straight,
            is_bad_face: false,
        }
    }

    #[test]
    fn test_validate_accepts_matching_dimension() {
        assert!(face(vec![0.1, 0.2, 0.3]).validate_embedding(3).is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_dimension() {
        let err = face(vec![0.1, 0.2]).validate_embedding(3).unwrap_err();
        assert_eq!(
            err,
            FaceError::MalformedEmbedding {
                face_id: "7_0".into(),
                expected: 3,
                actual: 2,
            }
        );
    }

    #[test]
    fn test_validate_rejects_nan() {
        let err = face(vec![0.1, f32::NAN, 0.3])
            .validate_embedding(3)
            .unwrap_err();
        assert!(matches!(err, FaceError::NonFiniteEmbedding { .. }));
    }

    #[test]
    fn test_json_field_names() {
        let json = r#"{
            "faceID": "3_1",
            "fileID": 3,
            "embedding": [1.0, 0.0],
            "blur": 42.0,
            "score": 0.93,
            "boxSize": 0.1,
            "direction": "left"
        }"#;
        let face: Face = serde_json::from_str(json).unwrap();
        assert_eq!(face.face_id, "3_1");
        assert_eq!(face.file_id, 3);
        assert_eq!(face.direction, FaceDirection::Left);
        assert!(!face.is_bad_face);
    }

    #[test]
    fn test_direction_from_landmarks() {
        let right = [(30.0, 40.0), (60.0, 40.0), (72.0, 60.0), (35.0, 80.0), (58.0, 80.0)];
        assert_eq!(FaceDirection::from_landmarks(&right), FaceDirection::Right);
        assert_eq!(FaceDirection::Right.to_string(), "right");
    }

    #[test]
    fn test_direction_defaults_to_straight() {
        let json = r#"{"faceID":"a","fileID":1,"embedding":[],"blur":1,"score":1,"boxSize":1}"#;
        let face: Face = serde_json::from_str(json).unwrap();
        assert_eq!(face.direction, FaceDirection::Straight);
    }
}
