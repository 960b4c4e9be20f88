//! Per-frame processing and the frame loop that drives it.

use std::sync::Arc;

use image::RgbaImage;
use tagpose_core::{CameraCalibration, FrameOutcome, MarkerGeometry, MarkerLocalizer};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::capture::{CameraError, CaptureRequest, CompletionHandler, FrameSource, RequestStatus};
use crate::detector::MarkerDetector;
use crate::event_loop::{CancelToken, EventLoop, LoopHandle};
use crate::preprocess::{preprocess, PreprocessParams};
use crate::snapshot::SnapshotWriter;
use crate::transport::ReportPublisher;

/// Counters kept across the life of a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub located: u64,
    pub no_marker: u64,
    pub malformed: u64,
    pub publish_failures: u64,
}

/// Preprocess, detect, localize, publish.
pub struct FramePipeline {
    params: PreprocessParams,
    detector: Box<dyn MarkerDetector>,
    localizer: MarkerLocalizer,
    publisher: Box<dyn ReportPublisher>,
    snapshot: Option<SnapshotWriter>,
    stats: PipelineStats,
}

impl FramePipeline {
    /// `capture_size` is the raw frame size; intrinsics are derived for the
    /// processed size.
    pub fn new(
        params: PreprocessParams,
        geometry: &MarkerGeometry,
        calibration: &CameraCalibration,
        capture_size: (u32, u32),
        detector: Box<dyn MarkerDetector>,
        publisher: Box<dyn ReportPublisher>,
    ) -> Self {
        let (w, h) = params.output_size(capture_size.0, capture_size.1);
        let localizer = MarkerLocalizer::for_frame(geometry, calibration, w, h);
        let k = localizer.estimator().intrinsics();
        log::info!(
            "processing {}x{} frames, f={:.1}px c=({:.1}, {:.1})",
            w,
            h,
            k.fx,
            k.cx,
            k.cy
        );
        Self {
            params,
            detector,
            localizer,
            publisher,
            snapshot: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_snapshot(mut self, writer: SnapshotWriter) -> Self {
        self.snapshot = Some(writer);
        self
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Run one frame through the chain. Never fails: problems are logged and
    /// the sentinel report is published instead.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn process_frame(&mut self, frame: &RgbaImage) -> FrameOutcome {
        let gray = preprocess(frame, &self.params);
        let detections = self.detector.detect(&gray);
        let outcome = self.localizer.locate(&detections);
        self.stats.frames += 1;

        match &outcome {
            FrameOutcome::Located(r) => {
                self.stats.located += 1;
                log::debug!(
                    "marker {}: dist={:.3} m yaw={:.2} phi={:.2}",
                    r.id,
                    r.distance,
                    r.yaw,
                    r.phi
                );
            }
            FrameOutcome::NoMarker => {
                self.stats.no_marker += 1;
                log::trace!("no marker in frame {}", self.stats.frames);
            }
            FrameOutcome::Malformed { id, error } => {
                self.stats.malformed += 1;
                log::warn!("discarding detection of marker {id}: {error}");
            }
        }

        if let (Some(writer), Some(first)) = (&self.snapshot, detections.first()) {
            writer.submit(&gray, Some(first));
        }

        if let Err(e) = self.publisher.publish(&outcome.report()) {
            self.stats.publish_failures += 1;
            log::warn!("report not published: {e}");
        }
        outcome
    }

    /// Flush the snapshot writer.
    pub fn finish(&mut self) {
        if let Some(mut writer) = self.snapshot.take() {
            writer.finish();
        }
    }
}

/// State owned by the loop thread.
pub struct TagContext<S> {
    pub source: S,
    pub pipeline: FramePipeline,
}

impl<S: FrameSource> TagContext<S> {
    /// Process a completed request and hand it back to the source.
    pub fn process_request(&mut self, request: CaptureRequest) {
        if request.status() != RequestStatus::Completed {
            log::debug!(
                "dropping request for slot {} in state {:?}",
                request.slot(),
                request.status()
            );
            return;
        }
        self.pipeline.process_frame(request.frame());
        let slot = request.slot();
        if let Err(e) = self.source.queue_request(request) {
            log::warn!("cannot requeue slot {slot}: {e}");
        }
    }
}

/// Completion handler that defers processing onto the loop thread.
///
/// Cancelled requests are dropped here and never reach the loop.
pub fn defer_completions<S>(handle: LoopHandle<TagContext<S>>) -> CompletionHandler
where
    S: FrameSource + 'static,
{
    Arc::new(move |request: CaptureRequest| {
        if request.status() == RequestStatus::Cancelled {
            log::trace!("slot {} cancelled", request.slot());
            return;
        }
        handle.call_later(move |ctx: &mut TagContext<S>| ctx.process_request(request));
    })
}

/// Start `source`, keep every buffer slot in flight and process frames until
/// `cancel` is set.
pub fn run_frame_loop<S>(
    mut source: S,
    pipeline: FramePipeline,
    cancel: CancelToken,
) -> Result<PipelineStats, CameraError>
where
    S: FrameSource + 'static,
{
    let event_loop = EventLoop::<TagContext<S>>::new(cancel);
    source.set_completion_handler(defer_completions(event_loop.handle()));
    source.start()?;
    for request in source.create_requests() {
        source.queue_request(request)?;
    }

    let mut ctx = TagContext { source, pipeline };
    event_loop.exec(&mut ctx);

    ctx.source.stop();
    ctx.pipeline.finish();
    let stats = ctx.pipeline.stats();
    log::info!(
        "frame loop done: {} frames, {} located, {} without marker, {} malformed",
        stats.frames,
        stats.located,
        stats.no_marker,
        stats.malformed
    );
    Ok(stats)
}
