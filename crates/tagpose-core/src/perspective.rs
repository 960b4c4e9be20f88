//! In-image skew removal and corrected in-plane yaw.
//!
//! A marker tilted toward or away from the camera appears as a trapezoid
//! whose bounding box is squashed along one axis. The correction stretches
//! the quad back to a square box before measuring the angle of its right
//! edge against the image vertical.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::detection::{BoundingBox, BOTTOM_RIGHT, TOP_RIGHT};
use crate::{Detection, GeometryError};

/// Signed in-plane yaw in degrees, rounded to two decimals.
///
/// Positive when the marker's right edge leans to the right going up the
/// image.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrectedYaw(pub f64);

impl CorrectedYaw {
    #[inline]
    pub fn degrees(self) -> f64 {
        self.0
    }
}

fn round_centi(v: f64) -> f64 {
    let r = (v * 100.0).round() / 100.0;
    // Collapse -0.0 so a level marker reports plain zero.
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Skew-corrected corners in bounding-box local coordinates.
///
/// The corner touching the left side of the box anchors the role
/// assignment (first of indices 1..=3 with local x of zero, else index 0).
/// Going around from the anchor: bottom, right, top. The top corner is kept,
/// the bottom corner is pushed to `y = width` and the side corners are
/// stretched vertically by `width / height`.
///
/// The result is indexed like the input; roles are never used to reorder.
pub fn correct_quad(corners: &[Point2<f32>; 4]) -> Result<[Point2<f64>; 4], GeometryError> {
    let bbox = BoundingBox::of(corners);
    let (width, height) = (bbox.width(), bbox.height());
    if !(width > 0.0 && height > 0.0) {
        return Err(GeometryError::FlatBoundingBox { width, height });
    }

    let mut local = corners.map(|p| {
        Point2::new((p.x - bbox.min.x) as f64, (p.y - bbox.min.y) as f64)
    });

    let anchor = (1..4).find(|&i| local[i].x == 0.0).unwrap_or(0);
    let bottom = (anchor + 1) % 4;
    let right = (anchor + 2) % 4;

    let (width, height) = (width as f64, height as f64);
    let stretch = width / height;
    local[bottom].y = width;
    local[anchor].y *= stretch;
    local[right].y *= stretch;
    Ok(local)
}

/// Yaw of the detection's right edge (bottom-right to top-right corner)
/// after skew correction.
///
/// The magnitude is the angle between the corrected edge and the image
/// "up" direction; the sign comes from whether the top-right corner lies
/// right of the bottom-right one.
///
/// The edge is picked by corner index, not by the left-edge roles used in
/// [`correct_quad`]. Cyclically relabeling the corners therefore changes the
/// yaw (in 90° steps for a square) even though the corrected geometry is the
/// same; the result follows the detector's corner identities. Mirroring the
/// marker flips the sign and keeps the magnitude.
pub fn corrected_yaw(detection: &Detection) -> Result<CorrectedYaw, GeometryError> {
    let corrected = correct_quad(&detection.corners)?;
    let lower = corrected[BOTTOM_RIGHT];
    let upper = corrected[TOP_RIGHT];

    let v: Vector2<f64> = upper - lower;
    let len = v.norm();
    if len <= f64::EPSILON {
        return Err(GeometryError::ZeroArea { area: 0.0 });
    }

    let magnitude = round_centi((-v.y / len).clamp(-1.0, 1.0).acos().to_degrees());
    let yaw = if upper.x > lower.x {
        magnitude
    } else {
        -magnitude
    };
    Ok(CorrectedYaw(round_centi(yaw)))
}
