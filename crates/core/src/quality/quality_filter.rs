use crate::clustering::domain::clustering_opts::ClusteringOpts;
use crate::shared::constants::{BAD_FACE_BLUR, BAD_FACE_MIN_BOX, BAD_FACE_SIDEWAYS_SCORE};
use crate::shared::face::{Face, FaceDirection};

/// Why a face was kept out of clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Blurry,
    LowScore,
    BadFace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityVerdict {
    pub rejected: Option<RejectReason>,
    /// Set for borderline faces even when they are not rejected, so a debug
    /// view can outline them.
    pub is_bad_face: bool,
}

impl QualityVerdict {
    pub fn is_eligible(&self) -> bool {
        self.rejected.is_none()
    }
}

/// Heuristic check for faces that tend to pollute clusters: very soft crops,
/// tiny detections, and low-confidence profile shots.
///
/// `blur` is a sharpness score (higher is sharper), so the comparisons read
/// "below the bar means bad".
pub fn is_bad_face(face: &Face) -> bool {
    face.blur < BAD_FACE_BLUR
        || face.box_size < BAD_FACE_MIN_BOX
        || (face.direction != FaceDirection::Straight && face.score < BAD_FACE_SIDEWAYS_SCORE)
}

/// Decides which faces are eligible for clustering.
#[derive(Debug, Clone)]
pub struct QualityFilter {
    min_blur: f64,
    min_score: f64,
    bad_face_heuristics: bool,
}

impl QualityFilter {
    pub fn new(opts: &ClusteringOpts) -> Self {
        Self {
            min_blur: opts.min_blur,
            min_score: opts.min_score,
            bad_face_heuristics: opts.bad_face_heuristics,
        }
    }

    pub fn assess(&self, face: &Face) -> QualityVerdict {
        let bad = is_bad_face(face);
        let rejected = if face.blur < self.min_blur {
            Some(RejectReason::Blurry)
        } else if face.score < self.min_score {
            Some(RejectReason::LowScore)
        } else if self.bad_face_heuristics && bad {
            Some(RejectReason::BadFace)
        } else {
            None
        };
        QualityVerdict {
            rejected,
            is_bad_face: bad,
        }
    }

    /// Records the bad-face flag on `face` and returns whether it may be
    /// clustered.
    pub fn is_eligible(&self, face: &mut Face) -> bool {
        let verdict = self.assess(face);
        face.is_bad_face = verdict.is_bad_face;
        verdict.is_eligible()
    }
}
