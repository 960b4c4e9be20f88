//! Marker pose reporting over MQTT for a differential-drive robot.
//!
//! Two processes share this crate:
//!
//! - the **tag module** captures frames, finds a square fiducial, estimates
//!   its ground distance, bearing and yaw and publishes one JSON report per
//!   frame on `/tags`;
//! - the **action module** listens on `/actions` for discrete motion commands
//!   and keeps a differential base driving at the matching velocity.
//!
//! Geometry lives in [`tagpose_core`]; this crate adds the frame loop,
//! pre-processing, the MQTT transport and configuration.
//!
//! ## API map
//! - [`capture`]: capture requests, the [`FrameSource`] seam and the replay
//!   source.
//! - [`event_loop`]: the single-threaded callback loop and its cancel token.
//! - [`pipeline`]: per-frame processing and [`run_frame_loop`].
//! - [`transport`]: broker session and report publisher.
//! - [`motion`]: command decoding and the base controller.
//! - [`config`]: JSON configuration for both processes.

pub mod capture;
pub mod config;
pub mod detector;
pub mod event_loop;
pub mod motion;
pub mod pipeline;
pub mod preprocess;
pub mod run;
pub mod snapshot;
pub mod transport;

mod error;

pub use tagpose_core as core;

pub use capture::{CaptureRequest, FrameSource, ReplaySource};
pub use config::{ActionModuleConfig, TagModuleConfig};
pub use detector::{MarkerDetector, PlaybackDetector};
pub use error::{AppError, EXIT_USAGE};
pub use event_loop::{CancelToken, EventLoop, LoopHandle};
pub use motion::{Command, DifferentialBase, LoggingBase, MotionController};
pub use pipeline::{run_frame_loop, FramePipeline, PipelineStats};
pub use transport::{BrokerAddress, MqttPublisher, MqttSession, ReportPublisher};

/// `value_parser` for the broker positional argument.
pub fn parse_broker_arg(s: &str) -> Result<BrokerAddress, String> {
    s.parse::<BrokerAddress>().map_err(|e| e.to_string())
}
