//! Geometry for fiducial-marker localization.
//!
//! Given the four image corners of a square marker this crate recovers the
//! marker's pose relative to a pinhole camera, a tilt-corrected in-plane yaw
//! and the ground-plane distance and bearing that a mobile robot consumes.
//! It does not depend on any image type, detector or transport.
//!
//! ```
//! use nalgebra::Point2;
//! use tagpose_core::{CameraCalibration, Detection, MarkerGeometry, MarkerLocalizer};
//!
//! let localizer = MarkerLocalizer::for_frame(
//!     &MarkerGeometry::default(),
//!     &CameraCalibration::default(),
//!     400,
//!     225,
//! );
//! let det = Detection::new(
//!     3,
//!     [
//!         Point2::new(180.0, 132.5),
//!         Point2::new(220.0, 132.5),
//!         Point2::new(220.0, 92.5),
//!         Point2::new(180.0, 92.5),
//!     ],
//! );
//! let report = localizer.locate(&[det]).report();
//! assert_eq!(report.id, 3);
//! ```

mod detection;
mod error;
mod homography;
mod locate;
mod logger;
mod perspective;
mod pose;
mod report;

pub use detection::{BoundingBox, Detection, BOTTOM_LEFT, BOTTOM_RIGHT, TOP_LEFT, TOP_RIGHT};
pub use error::GeometryError;
pub use homography::{homography_from_4pt, Homography};
pub use locate::{FrameOutcome, MarkerGeometry, MarkerLocalizer};
pub use perspective::{correct_quad, corrected_yaw, CorrectedYaw};
pub use pose::{
    estimate_pose, CameraCalibration, CameraIntrinsics, Pose, PoseEstimator, DEFAULT_HALF_FOV_TAN,
};
pub use report::{MarkerReport, ReportBuilder, DEFAULT_GROUND_HEIGHT};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
