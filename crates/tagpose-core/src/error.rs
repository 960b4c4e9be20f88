/// Reasons a detection cannot be turned into a pose or a corrected yaw.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("corner coordinates must be finite")]
    NonFiniteCorner,
    #[error("marker bounding box is flat (width={width}, height={height})")]
    FlatBoundingBox { width: f32, height: f32 },
    #[error("marker corners enclose zero area (area={area})")]
    ZeroArea { area: f32 },
    #[error("homography from marker square to image is singular")]
    SingularHomography,
    #[error("invalid camera intrinsics (fx={fx}, fy={fy})")]
    InvalidIntrinsics { fx: f64, fy: f64 },
}
