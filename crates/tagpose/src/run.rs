//! Process bodies of the tag module and the action module.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use rumqttc::QoS;

use crate::capture::{FrameSource, ReplaySource};
use crate::config::{ActionModuleConfig, TagModuleConfig};
use crate::detector::{MarkerDetector, PlaybackDetector};
use crate::event_loop::CancelToken;
use crate::motion::{DifferentialBase, MotionController};
use crate::pipeline::{run_frame_loop, FramePipeline, PipelineStats};
use crate::snapshot::SnapshotWriter;
use crate::transport::{BrokerAddress, MqttPublisher, MqttSession, SessionEvents};
use crate::AppError;

/// Camera frames in, pose reports out, until `cancel` is set or the broker
/// connection drops.
pub fn run_tag_module(
    config: &TagModuleConfig,
    broker: &BrokerAddress,
    cancel: CancelToken,
) -> Result<PipelineStats, AppError> {
    let source = ReplaySource::open(&config.camera)?;

    let detector: Box<dyn MarkerDetector> = match &config.detections_path {
        Some(path) => Box::new(PlaybackDetector::load_json(path)?),
        None => {
            log::warn!("no detection recording configured; every frame reports no marker");
            Box::new(PlaybackDetector::empty())
        }
    };

    let lost = cancel.clone();
    let mut session = MqttSession::connect(
        broker,
        &config.client_id,
        &config.broker,
        SessionEvents::new().on_lost(move || lost.cancel()),
    )?;
    let publisher = MqttPublisher::new(session.client().clone(), config.topic.clone());

    let mut pipeline = FramePipeline::new(
        config.preprocess.clone(),
        &config.marker,
        &config.calibration,
        source.frame_size(),
        detector,
        Box::new(publisher),
    );
    if let Some(path) = &config.snapshot_path {
        match SnapshotWriter::spawn(path) {
            Ok(writer) => pipeline = pipeline.with_snapshot(writer),
            Err(e) => log::warn!("snapshots disabled: {e}"),
        }
    }

    let stats = run_frame_loop(source, pipeline, cancel)?;
    session.disconnect();
    Ok(stats)
}

/// Velocity commands in, base setpoints out. The base is zeroed before
/// returning.
pub fn run_action_module<B: DifferentialBase>(
    config: &ActionModuleConfig,
    broker: &BrokerAddress,
    cancel: CancelToken,
    base: B,
) -> Result<B, AppError> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let lost = cancel.clone();
    let events = SessionEvents::new()
        .on_message(move |_topic, payload| {
            let _ = tx.send(payload.to_vec());
        })
        .on_lost(move || lost.cancel());

    let mut session = MqttSession::connect(broker, &config.client_id, &config.broker, events)?;
    session.subscribe(&config.topic, QoS::AtLeastOnce)?;

    let controller = drive_controller(
        MotionController::new(base),
        &rx,
        config.control_period(),
        &cancel,
    );
    let base = controller.shutdown();
    session.disconnect();
    Ok(base)
}

/// Apply incoming payloads as they arrive and tick the base every `period`
/// until cancelled or the command stream ends.
pub fn drive_controller<B: DifferentialBase>(
    mut controller: MotionController<B>,
    commands: &Receiver<Vec<u8>>,
    period: Duration,
    cancel: &CancelToken,
) -> MotionController<B> {
    let mut next_tick = Instant::now();
    while !cancel.is_cancelled() {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match commands.recv_timeout(wait) {
            Ok(payload) => {
                // Errors are logged by the controller; the velocity is kept.
                let _ = controller.handle_payload(&payload);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("command stream closed");
                break;
            }
        }
        controller.tick();
        let now = Instant::now();
        next_tick += period;
        if next_tick < now {
            next_tick = now + period;
        }
    }
    controller
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{Command, Velocity};

    #[derive(Default)]
    struct RecordingBase(Vec<(f64, f64)>);

    impl DifferentialBase for RecordingBase {
        fn set_base_control(&mut self, linear: f64, angular: f64) {
            self.0.push((linear, angular));
        }
    }

    #[test]
    fn bad_command_after_forward_keeps_driving_forward() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"2".to_vec()).expect("send");
        tx.send(b"99".to_vec()).expect("send");
        drop(tx);

        let ctl = drive_controller(
            MotionController::new(RecordingBase::default()),
            &rx,
            Duration::from_millis(5),
            &CancelToken::new(),
        );
        assert_eq!(ctl.velocity(), Velocity { linear: 0.1, angular: 0.0 });
        assert_eq!(ctl.last_command(), Some(Command::Forward));

        let base = ctl.shutdown();
        assert_eq!(base.0.last(), Some(&(0.0, 0.0)));
    }

    #[test]
    fn held_velocity_is_pushed_every_period() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"0".to_vec()).expect("send");
        let cancel = CancelToken::new();
        let stopper = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(60));
                cancel.cancel();
                drop(tx);
            })
        };

        let ctl = drive_controller(
            MotionController::new(RecordingBase::default()),
            &rx,
            Duration::from_millis(5),
            &cancel,
        );
        stopper.join().expect("stopper");
        let pushes = &ctl.base().0;
        assert!(pushes.len() >= 3, "only {} setpoints", pushes.len());
        assert!(pushes.iter().skip(1).all(|&p| p == (0.0, 0.3)));
    }
}
