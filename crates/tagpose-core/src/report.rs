use serde::{Deserialize, Serialize};

use crate::pose::Pose;
use crate::CorrectedYaw;

/// Default height of the camera above the marker plane, in meters.
pub const DEFAULT_GROUND_HEIGHT: f64 = 0.325;

/// Per-frame result published on the pose-report channel.
///
/// Serialized as `{"id": int, "dist": float, "yaw": float, "phi": float}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerReport {
    pub id: i32,
    /// Ground-plane distance to the marker in meters.
    #[serde(rename = "dist")]
    pub distance: f64,
    /// Corrected in-plane yaw in degrees.
    pub yaw: f64,
    /// Bearing in degrees, positive to the left.
    pub phi: f64,
    /// Set when the slant range was shorter than the camera height.
    #[serde(skip)]
    pub distance_clamped: bool,
}

impl MarkerReport {
    pub const NO_MARKER_ID: i32 = -1;

    /// The sentinel published when nothing usable was seen.
    pub fn none() -> Self {
        Self {
            id: Self::NO_MARKER_ID,
            distance: 0.0,
            yaw: 0.0,
            phi: 0.0,
            distance_clamped: false,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.id == Self::NO_MARKER_ID
    }
}

impl Default for MarkerReport {
    fn default() -> Self {
        Self::none()
    }
}

/// Turns a pose and a corrected yaw into a [`MarkerReport`].
#[derive(Clone, Copy, Debug)]
pub struct ReportBuilder {
    ground_height: f64,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_GROUND_HEIGHT)
    }
}

impl ReportBuilder {
    pub fn new(ground_height: f64) -> Self {
        Self { ground_height }
    }

    pub fn ground_height(&self) -> f64 {
        self.ground_height
    }

    /// `phi = atan2(y, x)` and `dist = sqrt(|t|^2 - h^2)`, clamped at zero.
    pub fn build(&self, id: i32, pose: &Pose, yaw: CorrectedYaw) -> MarkerReport {
        let t = &pose.translation;
        let phi = t.y.atan2(t.x).to_degrees();

        let squared = t.norm_squared() - self.ground_height * self.ground_height;
        let distance_clamped = squared < 0.0;
        if distance_clamped {
            log::debug!(
                "marker {id}: slant range {:.4} m below camera height {:.4} m, distance clamped",
                t.norm(),
                self.ground_height
            );
        }

        MarkerReport {
            id,
            distance: squared.max(0.0).sqrt(),
            yaw: yaw.degrees(),
            phi,
            distance_clamped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn pose_at(x: f64, y: f64, z: f64) -> Pose {
        Pose {
            translation: Vector3::new(x, y, z),
            rotation: Matrix3::identity(),
        }
    }

    #[test]
    fn sentinel_serializes_exactly() {
        let json = serde_json::to_string(&MarkerReport::none()).expect("serialize");
        assert_eq!(json, r#"{"id":-1,"dist":0.0,"yaw":0.0,"phi":0.0}"#);
    }

    #[test]
    fn ground_distance_removes_camera_height() {
        let report = ReportBuilder::new(0.3).build(4, &pose_at(0.4, 0.0, -0.3), CorrectedYaw(12.5));
        assert_relative_eq!(report.distance, 0.4, epsilon = 1e-12);
        assert_relative_eq!(report.phi, 0.0);
        assert_eq!(report.yaw, 12.5);
        assert_eq!(report.id, 4);
        assert!(!report.distance_clamped);
    }

    #[test]
    fn range_equal_to_height_is_zero_distance() {
        let report = ReportBuilder::new(0.5).build(1, &pose_at(0.3, 0.0, -0.4), CorrectedYaw(0.0));
        assert_relative_eq!(report.distance, 0.0, epsilon = 1e-7);
    }

    #[test]
    fn range_below_height_is_clamped() {
        let report = ReportBuilder::default().build(1, &pose_at(0.1, 0.1, 0.0), CorrectedYaw(0.0));
        assert_eq!(report.distance, 0.0);
        assert!(report.distance_clamped);
        assert!(!report.distance.is_nan());
    }

    #[test]
    fn bearing_is_positive_to_the_left() {
        let builder = ReportBuilder::new(0.0);
        let left = builder.build(2, &pose_at(1.0, 1.0, 0.0), CorrectedYaw(0.0));
        let right = builder.build(2, &pose_at(1.0, -1.0, 0.0), CorrectedYaw(0.0));
        assert_relative_eq!(left.phi, 45.0, epsilon = 1e-12);
        assert_relative_eq!(right.phi, -45.0, epsilon = 1e-12);
    }

    #[test]
    fn clamp_flag_is_not_on_the_wire() {
        let mut report = MarkerReport::none();
        report.distance_clamped = true;
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(!json.contains("clamped"));
    }
}
