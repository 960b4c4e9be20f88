use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::GeometryError;

/// Native corner indices of a [`Detection`].
///
/// The order is the one the marker detector reports, expressed in the
/// marker's own frame: bottom-left, bottom-right, top-right, top-left.
pub const BOTTOM_LEFT: usize = 0;
pub const BOTTOM_RIGHT: usize = 1;
pub const TOP_RIGHT: usize = 2;
pub const TOP_LEFT: usize = 3;

/// Areas below this (in square pixels) are treated as zero.
const MIN_QUAD_AREA: f32 = 1e-3;

/// One marker found by a detector: identifier plus its four image corners.
///
/// Corners are kept in the detector's native winding (see [`BOTTOM_LEFT`]
/// and friends) and are never reordered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: i32,
    pub corners: [Point2<f32>; 4],
}

impl Detection {
    pub fn new(id: i32, corners: [Point2<f32>; 4]) -> Self {
        Self { id, corners }
    }

    /// Axis-aligned bounding box of the corners.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::of(&self.corners)
    }

    /// Signed shoelace area of the quadrilateral in square pixels.
    pub fn signed_area(&self) -> f32 {
        let c = &self.corners;
        let mut twice = 0.0_f32;
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            twice += a.x * b.y - b.x * a.y;
        }
        0.5 * twice
    }

    /// Reject quads that the pose and yaw stages cannot handle.
    ///
    /// A quad is degenerate when its bounding box has zero width or height,
    /// or when its corners enclose (numerically) zero area, which covers the
    /// collinear case.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(GeometryError::NonFiniteCorner);
        }
        let bbox = self.bounding_box();
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(GeometryError::FlatBoundingBox {
                width: bbox.width(),
                height: bbox.height(),
            });
        }
        let area = self.signed_area();
        if area.abs() < MIN_QUAD_AREA {
            return Err(GeometryError::ZeroArea { area });
        }
        Ok(())
    }
}

/// Axis-aligned box around a set of image points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Point2<f32>,
    pub max: Point2<f32>,
}

impl BoundingBox {
    pub fn of(points: &[Point2<f32>; 4]) -> Self {
        let mut min = points[0];
        let mut max = points[0];
        for p in &points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Self { min, max }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Detection {
        Detection::new(
            7,
            [
                Point2::new(10.0, 30.0),
                Point2::new(30.0, 30.0),
                Point2::new(30.0, 10.0),
                Point2::new(10.0, 10.0),
            ],
        )
    }

    #[test]
    fn bounding_box_spans_all_corners() {
        let bbox = square().bounding_box();
        assert_eq!(bbox.min, Point2::new(10.0, 10.0));
        assert_eq!(bbox.max, Point2::new(30.0, 30.0));
        assert_eq!(bbox.width(), 20.0);
        assert_eq!(bbox.height(), 20.0);
    }

    #[test]
    fn area_magnitude_ignores_winding() {
        let det = square();
        let mut reversed = det.clone();
        reversed.corners.reverse();
        assert_eq!(det.signed_area().abs(), 400.0);
        assert_eq!(det.signed_area(), -reversed.signed_area());
    }

    #[test]
    fn collinear_corners_are_rejected() {
        let det = Detection::new(
            1,
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 10.0),
                Point2::new(20.0, 20.0),
                Point2::new(30.0, 30.0),
            ],
        );
        assert!(matches!(det.validate(), Err(GeometryError::ZeroArea { .. })));
    }

    #[test]
    fn horizontal_line_is_rejected_as_flat() {
        let det = Detection::new(
            1,
            [
                Point2::new(0.0, 5.0),
                Point2::new(10.0, 5.0),
                Point2::new(20.0, 5.0),
                Point2::new(30.0, 5.0),
            ],
        );
        assert!(matches!(
            det.validate(),
            Err(GeometryError::FlatBoundingBox { height, .. }) if height == 0.0
        ));
    }

    #[test]
    fn serializes_corners_as_pairs() {
        let json = serde_json::to_string(&square()).expect("serialize");
        assert_eq!(
            json,
            r#"{"id":7,"corners":[[10.0,30.0],[30.0,30.0],[30.0,10.0],[10.0,10.0]]}"#
        );
    }
}
