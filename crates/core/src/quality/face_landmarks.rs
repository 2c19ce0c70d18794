//! 5-point face landmarks and head direction estimate.
//!
//! Point order follows the detector output: left eye, right eye, nose,
//! left mouth corner, right mouth corner. Coordinates may be absolute or
//! relative; only their ordering and ratios matter.

use crate::shared::face::FaceDirection;

const LEFT_EYE: usize = 0;
const RIGHT_EYE: usize = 1;
const NOSE: usize = 2;
const LEFT_MOUTH: usize = 3;
const RIGHT_MOUTH: usize = 4;

/// Nose within this fraction of the eye span from an eye reads as a turned head.
const NOSE_NEAR_EYE_RATIO: f64 = 0.2;

#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    points: [(f64, f64); 5],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); 5]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(f64, f64); 5] {
        &self.points
    }

    /// Eyes above the nose and the nose above the mouth, with some slack for
    /// head roll.
    fn is_upright(&self) -> bool {
        let (_, ly) = self.points[LEFT_EYE];
        let (_, ry) = self.points[RIGHT_EYE];
        let (_, ny) = self.points[NOSE];
        let (_, lmy) = self.points[LEFT_MOUTH];
        let (_, rmy) = self.points[RIGHT_MOUTH];

        let eye_dy = (ry - ly).abs();
        let mouth_dy = (rmy - lmy).abs();

        ly.max(ry) + 0.5 * eye_dy < ny && ny + 0.5 * mouth_dy < lmy.min(rmy)
    }

    /// Which way the head is turned, from the nose position relative to the
    /// eyes and mouth corners.
    pub fn direction(&self) -> FaceDirection {
        let (lx, _) = self.points[LEFT_EYE];
        let (rx, _) = self.points[RIGHT_EYE];
        let (nx, _) = self.points[NOSE];
        let (lmx, _) = self.points[LEFT_MOUTH];
        let (rmx, _) = self.points[RIGHT_MOUTH];

        let eye_span = (rx - lx).abs();
        let upright = self.is_upright();

        let sticks_out_left = nx < lx.min(rx) && nx < lmx.min(rmx);
        let sticks_out_right = nx > lx.max(rx) && nx > lmx.max(rmx);
        let near_left_eye = (nx - lx).abs() < NOSE_NEAR_EYE_RATIO * eye_span;
        let near_right_eye = (nx - rx).abs() < NOSE_NEAR_EYE_RATIO * eye_span;

        if sticks_out_left || (upright && near_left_eye) {
            FaceDirection::Left
        } else if sticks_out_right || (upright && near_right_eye) {
            FaceDirection::Right
        } else {
            FaceDirection::Straight
        }
    }
}
