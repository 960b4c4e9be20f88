//! From a frame's detections to the report that goes on the wire.

use serde::{Deserialize, Serialize};

use crate::perspective::corrected_yaw;
use crate::pose::{CameraCalibration, PoseEstimator};
use crate::report::{MarkerReport, ReportBuilder, DEFAULT_GROUND_HEIGHT};
use crate::{Detection, GeometryError};

/// Physical setup of the marker and camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerGeometry {
    /// Marker edge length in meters.
    pub tag_size: f64,
    /// Camera height above the marker plane in meters.
    pub ground_height: f64,
}

impl Default for MarkerGeometry {
    fn default() -> Self {
        Self {
            tag_size: 0.053,
            ground_height: DEFAULT_GROUND_HEIGHT,
        }
    }
}

/// What a single frame produced.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Located(MarkerReport),
    NoMarker,
    /// The first detection could not be used; the wire still gets the
    /// sentinel.
    Malformed { id: i32, error: GeometryError },
}

impl FrameOutcome {
    pub fn report(&self) -> MarkerReport {
        match self {
            FrameOutcome::Located(report) => *report,
            FrameOutcome::NoMarker | FrameOutcome::Malformed { .. } => MarkerReport::none(),
        }
    }
}

/// Pose estimation, yaw correction and report building for one camera.
#[derive(Clone, Copy, Debug)]
pub struct MarkerLocalizer {
    estimator: PoseEstimator,
    builder: ReportBuilder,
}

impl MarkerLocalizer {
    pub fn new(estimator: PoseEstimator, builder: ReportBuilder) -> Self {
        Self { estimator, builder }
    }

    /// Localizer for processed frames of `width` x `height` pixels.
    pub fn for_frame(
        geometry: &MarkerGeometry,
        calibration: &CameraCalibration,
        width: u32,
        height: u32,
    ) -> Self {
        let intrinsics = calibration.intrinsics_for(width, height);
        Self::new(
            PoseEstimator::new(geometry.tag_size, intrinsics),
            ReportBuilder::new(geometry.ground_height),
        )
    }

    pub fn estimator(&self) -> &PoseEstimator {
        &self.estimator
    }

    /// Only the first detection, in detector order, is considered.
    pub fn locate(&self, detections: &[Detection]) -> FrameOutcome {
        let Some(first) = detections.first() else {
            return FrameOutcome::NoMarker;
        };
        match self.locate_one(first) {
            Ok(report) => FrameOutcome::Located(report),
            Err(error) => FrameOutcome::Malformed {
                id: first.id,
                error,
            },
        }
    }

    pub fn locate_one(&self, detection: &Detection) -> Result<MarkerReport, GeometryError> {
        detection.validate()?;
        let pose = self.estimator.estimate(detection)?;
        let yaw = corrected_yaw(detection)?;
        Ok(self.builder.build(detection.id, &pose, yaw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    fn localizer() -> MarkerLocalizer {
        MarkerLocalizer::for_frame(
            &MarkerGeometry::default(),
            &CameraCalibration::default(),
            400,
            225,
        )
    }

    fn square(id: i32, cx: f32, cy: f32, half: f32) -> Detection {
        Detection::new(
            id,
            [
                Point2::new(cx - half, cy + half),
                Point2::new(cx + half, cy + half),
                Point2::new(cx + half, cy - half),
                Point2::new(cx - half, cy - half),
            ],
        )
    }

    #[test]
    fn empty_frame_reports_sentinel() {
        let outcome = localizer().locate(&[]);
        assert_eq!(outcome, FrameOutcome::NoMarker);
        assert_eq!(outcome.report(), MarkerReport::none());
    }

    #[test]
    fn degenerate_first_detection_is_malformed() {
        let flat = Detection::new(
            9,
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 10.0),
                Point2::new(20.0, 20.0),
                Point2::new(30.0, 30.0),
            ],
        );
        let outcome = localizer().locate(&[flat, square(2, 200.0, 112.5, 20.0)]);
        assert!(matches!(
            outcome,
            FrameOutcome::Malformed { id: 9, error: GeometryError::ZeroArea { .. } }
        ));
        assert!(outcome.report().is_none());
    }

    #[test]
    fn first_detection_wins() {
        let outcome = localizer().locate(&[
            square(5, 200.0, 112.5, 20.0),
            square(6, 100.0, 60.0, 10.0),
        ]);
        let FrameOutcome::Located(report) = outcome else {
            panic!("expected a located marker, got {outcome:?}");
        };
        assert_eq!(report.id, 5);
        assert_eq!(report.yaw, 0.0);
        // Centered marker: straight ahead.
        assert!(report.phi.abs() < 1e-6, "phi = {}", report.phi);
        assert!(report.distance > 0.0);
    }
}
