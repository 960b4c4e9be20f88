use crate::capture::CameraError;
use crate::config::ConfigError;
use crate::detector::DetectorError;
use crate::transport::BrokerError;

/// Process exit code for command-line usage errors (what clap uses).
pub const EXIT_USAGE: u8 = 2;

/// Fatal start-up failures of either process.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("camera initialization failed: {0}")]
    Camera(#[from] CameraError),
    #[error("broker connection failed: {0}")]
    Broker(#[from] BrokerError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("detector initialization failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Camera(_) => 1,
            AppError::Broker(_) => 3,
            AppError::Config(_) | AppError::Detector(_) => 4,
            AppError::Signal(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_are_distinct_per_failure() {
        let camera = AppError::from(CameraError::NoFrames(PathBuf::from("frames")));
        let broker = AppError::from(BrokerError::InvalidAddress("x:".into()));
        let config = AppError::from(ConfigError::Invalid("bad".into()));
        let codes = [camera.exit_code(), broker.exit_code(), config.exit_code()];
        assert_eq!(codes, [1, 3, 4]);
        assert!(!codes.contains(&EXIT_USAGE));
        assert!(camera.to_string().contains("no frames found in frames"));
    }
}
