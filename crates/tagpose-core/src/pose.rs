//! Planar pose from the four corners of a square marker.
//!
//! The marker's canonical square `(-1,-1), (1,-1), (1,1), (-1,1)` (same
//! winding as [`Detection::corners`]) is mapped to the observed corners by a
//! homography, which the pinhole model decomposes into rotation and
//! translation:
//!
//! `K^-1 H = λ [r0 r1 t']`, `t = t' * edge / 2`.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::homography::homography_from_4pt;
use crate::{Detection, GeometryError};

const CANONICAL_SQUARE: [Point2<f64>; 4] = [
    Point2::new(-1.0, -1.0),
    Point2::new(1.0, -1.0),
    Point2::new(1.0, 1.0),
    Point2::new(-1.0, 1.0),
];

/// Default half field-of-view tangent of the robot camera (tan 31.1°).
pub const DEFAULT_HALF_FOV_TAN: f64 = 0.6032;

/// Pinhole intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Square pixels, principal point at the image center.
    pub fn centered(focal_px: f64, width: u32, height: u32) -> Self {
        Self::new(
            focal_px,
            focal_px,
            width as f64 / 2.0,
            height as f64 / 2.0,
        )
    }

    /// Project a camera-frame point (x right, y down, z forward) to pixels.
    pub fn project(&self, p: &Vector3<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    fn inverse_matrix(&self) -> Result<Matrix3<f64>, GeometryError> {
        let usable = |f: f64| f.is_finite() && f > 0.0;
        if !usable(self.fx) || !usable(self.fy) {
            return Err(GeometryError::InvalidIntrinsics {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        ))
    }
}

/// How the focal length is obtained for a given processed image size.
///
/// An explicit `focal_length_px` wins. Otherwise the focal length is derived
/// from the half field-of-view tangent as `(width / 2) / half_fov_tan`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraCalibration {
    pub focal_length_px: Option<f64>,
    pub half_fov_tan: f64,
}

impl Default for CameraCalibration {
    fn default() -> Self {
        Self {
            focal_length_px: None,
            half_fov_tan: DEFAULT_HALF_FOV_TAN,
        }
    }
}

impl CameraCalibration {
    pub fn intrinsics_for(&self, width: u32, height: u32) -> CameraIntrinsics {
        let f = self
            .focal_length_px
            .unwrap_or_else(|| (width as f64 / 2.0) / self.half_fov_tan);
        CameraIntrinsics::centered(f, width, height)
    }
}

/// Marker pose relative to the camera.
///
/// `translation` is expressed in the robot-facing frame (x forward along the
/// optical axis, y left, z up), in meters. `rotation` maps marker-frame
/// vectors into the camera frame (x right, y down, z forward).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vector3<f64>,
    pub rotation: Matrix3<f64>,
}

impl Pose {
    /// Translation in the camera frame (x right, y down, z forward).
    pub fn camera_translation(&self) -> Vector3<f64> {
        let t = &self.translation;
        Vector3::new(-t.y, -t.z, t.x)
    }
}

fn camera_to_body(t: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(t.z, -t.x, -t.y)
}

fn project_to_so3(m: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let flipped = -u.column(2);
        u.set_column(2, &flipped);
        r = u * v_t;
    }
    Some(r)
}

/// Recover the pose of a square marker of edge length `tag_size` (meters).
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(intrinsics)))]
pub fn estimate_pose(
    detection: &Detection,
    tag_size: f64,
    intrinsics: &CameraIntrinsics,
) -> Result<Pose, GeometryError> {
    detection.validate()?;
    let k_inv = intrinsics.inverse_matrix()?;

    let img = detection
        .corners
        .map(|p| Point2::new(p.x as f64, p.y as f64));
    let h = homography_from_4pt(&CANONICAL_SQUARE, &img)
        .ok_or(GeometryError::SingularHomography)?;

    let m = k_inv * h.h;
    let c0: Vector3<f64> = m.column(0).into_owned();
    let c1: Vector3<f64> = m.column(1).into_owned();
    let c2: Vector3<f64> = m.column(2).into_owned();

    let mut scale = (c0.norm() + c1.norm()) / 2.0;
    if scale < 1e-12 {
        return Err(GeometryError::SingularHomography);
    }
    // H is only defined up to sign; keep the marker in front of the camera.
    if c2.z < 0.0 {
        scale = -scale;
    }

    let r0 = c0 / scale;
    let r1 = c1 / scale;
    let r2 = r0.cross(&r1);
    let rotation = project_to_so3(Matrix3::from_columns(&[r0, r1, r2]))
        .ok_or(GeometryError::SingularHomography)?;

    let t_cam = c2 / scale * (tag_size / 2.0);
    Ok(Pose {
        translation: camera_to_body(&t_cam),
        rotation,
    })
}

/// Pose estimation with a fixed marker size and camera model.
#[derive(Clone, Copy, Debug)]
pub struct PoseEstimator {
    tag_size: f64,
    intrinsics: CameraIntrinsics,
}

impl PoseEstimator {
    pub fn new(tag_size: f64, intrinsics: CameraIntrinsics) -> Self {
        Self {
            tag_size,
            intrinsics,
        }
    }

    #[inline]
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn estimate(&self, detection: &Detection) -> Result<Pose, GeometryError> {
        estimate_pose(detection, self.tag_size, &self.intrinsics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TAG: f64 = 0.053;

    fn rot_y(deg: f64) -> Matrix3<f64> {
        let (s, c) = deg.to_radians().sin_cos();
        Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
    }

    // Marker x along camera x, marker y pointing up in the image.
    fn facing_camera() -> Matrix3<f64> {
        Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0)
    }

    fn synthesize(
        rotation: &Matrix3<f64>,
        t_cam: &Vector3<f64>,
        intr: &CameraIntrinsics,
    ) -> Detection {
        let corners = CANONICAL_SQUARE.map(|q| {
            let p_marker = Vector3::new(q.x * TAG / 2.0, q.y * TAG / 2.0, 0.0);
            let p = intr.project(&(rotation * p_marker + t_cam));
            Point2::new(p.x as f32, p.y as f32)
        });
        Detection::new(3, corners)
    }

    #[test]
    fn recovers_translation_of_tilted_marker() {
        let intr = CameraCalibration::default().intrinsics_for(400, 225);
        let rotation = rot_y(25.0) * facing_camera();
        let t_cam = Vector3::new(0.04, 0.03, 0.45);
        let det = synthesize(&rotation, &t_cam, &intr);

        let pose = estimate_pose(&det, TAG, &intr).expect("pose");
        assert_relative_eq!(pose.camera_translation(), t_cam, epsilon = 1e-4);
        assert_relative_eq!(pose.rotation, rotation, epsilon = 1e-3);
    }

    #[test]
    fn body_frame_points_forward_and_left() {
        let intr = CameraIntrinsics::centered(330.0, 400, 225);
        let t_cam = Vector3::new(-0.10, 0.05, 0.60);
        let det = synthesize(&facing_camera(), &t_cam, &intr);

        let pose = PoseEstimator::new(TAG, intr).estimate(&det).expect("pose");
        // Marker left of the optical axis and below it.
        assert_relative_eq!(
            pose.translation,
            Vector3::new(0.60, 0.10, -0.05),
            epsilon = 1e-4
        );
    }

    #[test]
    fn rotation_is_orthonormal() {
        let intr = CameraIntrinsics::centered(330.0, 400, 225);
        let det = Detection::new(
            0,
            [
                Point2::new(180.0, 140.0),
                Point2::new(221.0, 137.0),
                Point2::new(224.0, 96.0),
                Point2::new(178.0, 99.0),
            ],
        );
        let pose = estimate_pose(&det, TAG, &intr).expect("pose");
        let should_be_identity = pose.rotation.transpose() * pose.rotation;
        assert_relative_eq!(should_be_identity, Matrix3::identity(), epsilon = 1e-9);
        assert_relative_eq!(pose.rotation.determinant(), 1.0, epsilon = 1e-9);
        assert!(pose.translation.x > 0.0, "marker must be in front");
    }

    #[test]
    fn zero_area_detection_has_no_pose() {
        let intr = CameraIntrinsics::centered(330.0, 400, 225);
        let det = Detection::new(
            0,
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 10.0),
                Point2::new(20.0, 20.0),
                Point2::new(30.0, 30.0),
            ],
        );
        assert!(matches!(
            estimate_pose(&det, TAG, &intr),
            Err(GeometryError::ZeroArea { .. })
        ));
    }

    #[test]
    fn explicit_focal_length_overrides_fov() {
        let calib = CameraCalibration {
            focal_length_px: Some(500.0),
            ..CameraCalibration::default()
        };
        let intr = calib.intrinsics_for(400, 225);
        assert_eq!(intr.fx, 500.0);
        assert_eq!(intr.cx, 200.0);
        assert_eq!(intr.cy, 112.5);

        let derived = CameraCalibration::default().intrinsics_for(400, 225);
        assert_relative_eq!(derived.fx, 200.0 / 0.6032, epsilon = 1e-12);
    }
}
