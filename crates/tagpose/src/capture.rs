//! Frame acquisition: capture requests and the frame-source seam.
//!
//! A [`CaptureRequest`] represents one frame-buffer slot. It is moved into
//! the source when queued and handed back, filled or cancelled, through the
//! completion handler. The shipped source replays image files from a
//! directory on a worker thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "pgm", "ppm"];

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("cannot read frame directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no frames found in {0}")]
    NoFrames(PathBuf),
    #[error("cannot decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame source needs at least one buffer")]
    NoBuffers,
    #[error("frame source has no completion handler")]
    NoHandler,
    #[error("frame source is not running")]
    NotRunning,
    #[error("cannot spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Idle,
    Queued,
    Completed,
    Cancelled,
}

/// One frame-buffer slot and the frame it last captured.
#[derive(Debug)]
pub struct CaptureRequest {
    slot: usize,
    sequence: u64,
    status: RequestStatus,
    frame: RgbaImage,
}

impl CaptureRequest {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            sequence: 0,
            status: RequestStatus::Idle,
            frame: RgbaImage::new(0, 0),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Capture counter of the frame currently held.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    pub fn complete(&mut self, sequence: u64, frame: RgbaImage) {
        self.sequence = sequence;
        self.frame = frame;
        self.status = RequestStatus::Completed;
    }

    pub fn cancel(&mut self) {
        self.status = RequestStatus::Cancelled;
    }

    pub(crate) fn mark_queued(&mut self) {
        self.status = RequestStatus::Queued;
    }
}

/// Called on the source's thread for every request it gives back.
pub type CompletionHandler = Arc<dyn Fn(CaptureRequest) + Send + Sync>;

/// Something that fills capture requests with frames.
pub trait FrameSource {
    /// Capture size in pixels.
    fn frame_size(&self) -> (u32, u32);

    /// One idle request per buffer slot.
    fn create_requests(&self) -> Vec<CaptureRequest>;

    fn set_completion_handler(&mut self, handler: CompletionHandler);

    fn start(&mut self) -> Result<(), CameraError>;

    fn queue_request(&self, request: CaptureRequest) -> Result<(), CameraError>;

    /// Stop capturing; requests still queued come back cancelled.
    fn stop(&mut self);
}

/// Where the replay source reads frames and how fast it plays them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    pub frames_dir: PathBuf,
    pub buffer_count: usize,
    pub frame_interval_ms: u64,
    /// Start over after the last frame.
    pub repeat: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from("frames"),
            buffer_count: 4,
            frame_interval_ms: 100,
            repeat: true,
        }
    }
}

/// Plays a directory of images back as a camera.
pub struct ReplaySource {
    paths: Arc<Vec<PathBuf>>,
    size: (u32, u32),
    buffer_count: usize,
    interval: Duration,
    repeat: bool,
    handler: Option<CompletionHandler>,
    requests_tx: Option<Sender<CaptureRequest>>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn open(settings: &ReplaySettings) -> Result<Self, CameraError> {
        if settings.buffer_count == 0 {
            return Err(CameraError::NoBuffers);
        }
        let paths = list_frames(&settings.frames_dir)?;
        let first = decode_frame(&paths[0])?;
        log::info!(
            "replaying {} frames of {}x{} from {}",
            paths.len(),
            first.width(),
            first.height(),
            settings.frames_dir.display()
        );
        Ok(Self {
            paths: Arc::new(paths),
            size: first.dimensions(),
            buffer_count: settings.buffer_count,
            interval: Duration::from_millis(settings.frame_interval_ms),
            repeat: settings.repeat,
            handler: None,
            requests_tx: None,
            stop_tx: None,
            worker: None,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.paths.len()
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, CameraError> {
    let unreadable = |source| CameraError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame && path.is_file() {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(CameraError::NoFrames(dir.to_path_buf()));
    }
    paths.sort();
    Ok(paths)
}

fn decode_frame(path: &Path) -> Result<RgbaImage, CameraError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| CameraError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

struct ReplayWorker {
    paths: Arc<Vec<PathBuf>>,
    size: (u32, u32),
    interval: Duration,
    repeat: bool,
    handler: CompletionHandler,
    next_index: usize,
    sequence: u64,
}

impl ReplayWorker {
    fn run(mut self, requests: Receiver<CaptureRequest>, stop: Receiver<()>) {
        let mut due = Instant::now();
        let mut stopping = false;
        // Ends once the source drops its sender and the queue is drained.
        while let Ok(mut request) = requests.recv() {
            if !stopping {
                let wait = due.saturating_duration_since(Instant::now());
                stopping = !matches!(stop.recv_timeout(wait), Err(RecvTimeoutError::Timeout));
            }
            if stopping {
                request.cancel();
                (self.handler)(request);
                continue;
            }

            match self.next_frame() {
                Some(frame) => {
                    self.sequence += 1;
                    request.complete(self.sequence, frame);
                }
                None => request.cancel(),
            }
            due = Instant::now() + self.interval;
            (self.handler)(request);
        }
        log::debug!("capture worker finished after {} frames", self.sequence);
    }

    fn next_frame(&mut self) -> Option<RgbaImage> {
        for _ in 0..self.paths.len() {
            if self.next_index >= self.paths.len() {
                if !self.repeat {
                    return None;
                }
                self.next_index = 0;
            }
            let path = &self.paths[self.next_index];
            self.next_index += 1;
            match decode_frame(path) {
                Ok(frame) if frame.dimensions() == self.size => return Some(frame),
                Ok(frame) => {
                    let (w, h) = self.size;
                    return Some(imageops::resize(&frame, w, h, FilterType::Triangle));
                }
                Err(e) => log::warn!("skipping frame: {e}"),
            }
        }
        None
    }
}

impl FrameSource for ReplaySource {
    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_requests(&self) -> Vec<CaptureRequest> {
        (0..self.buffer_count).map(CaptureRequest::new).collect()
    }

    fn set_completion_handler(&mut self, handler: CompletionHandler) {
        self.handler = Some(handler);
    }

    fn start(&mut self) -> Result<(), CameraError> {
        let handler = self.handler.clone().ok_or(CameraError::NoHandler)?;
        let (requests_tx, requests_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let worker = ReplayWorker {
            paths: Arc::clone(&self.paths),
            size: self.size,
            interval: self.interval,
            repeat: self.repeat,
            handler,
            next_index: 0,
            sequence: 0,
        };
        let join = thread::Builder::new()
            .name("capture".into())
            .spawn(move || worker.run(requests_rx, stop_rx))
            .map_err(CameraError::Spawn)?;

        self.requests_tx = Some(requests_tx);
        self.stop_tx = Some(stop_tx);
        self.worker = Some(join);
        Ok(())
    }

    fn queue_request(&self, mut request: CaptureRequest) -> Result<(), CameraError> {
        let tx = self.requests_tx.as_ref().ok_or(CameraError::NotRunning)?;
        request.mark_queued();
        tx.send(request).map_err(|_| CameraError::NotRunning)
    }

    fn stop(&mut self) {
        self.stop_tx.take();
        self.requests_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("capture worker panicked");
            }
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_frames(dir: &Path, count: usize) {
        for i in 0..count {
            let img = RgbaImage::from_pixel(16, 12, Rgba([i as u8 * 40, 0, 0, 255]));
            img.save(dir.join(format!("frame_{i:03}.png"))).expect("save frame");
        }
    }

    fn settings(dir: &Path) -> ReplaySettings {
        ReplaySettings {
            frames_dir: dir.to_path_buf(),
            buffer_count: 2,
            frame_interval_ms: 0,
            repeat: false,
        }
    }

    fn channel_handler() -> (CompletionHandler, Receiver<CaptureRequest>) {
        let (tx, rx) = mpsc::channel();
        let handler: CompletionHandler = Arc::new(move |req| {
            let _ = tx.send(req);
        });
        (handler, rx)
    }

    #[test]
    fn missing_directory_fails_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ReplaySource::open(&settings(&dir.path().join("nope")))
            .err()
            .expect("must fail");
        assert!(matches!(err, CameraError::Unreadable { .. }));
    }

    #[test]
    fn directory_without_images_has_no_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), "hello").expect("write");
        let err = ReplaySource::open(&settings(dir.path()))
            .err()
            .expect("must fail");
        assert!(matches!(err, CameraError::NoFrames(_)));
    }

    #[test]
    fn replays_frames_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_frames(dir.path(), 2);

        let mut source = ReplaySource::open(&settings(dir.path())).expect("open");
        assert_eq!(source.frame_size(), (16, 12));
        let (handler, returned) = channel_handler();
        source.set_completion_handler(handler);
        source.start().expect("start");

        for req in source.create_requests() {
            assert_eq!(req.status(), RequestStatus::Idle);
            source.queue_request(req).expect("queue");
        }
        // A third request runs past the end of a non-repeating recording.
        source.queue_request(CaptureRequest::new(2)).expect("queue");

        let wait = Duration::from_secs(5);
        let seen: Vec<CaptureRequest> = (0..3)
            .map(|_| returned.recv_timeout(wait).expect("request returned"))
            .collect();
        source.stop();

        assert_eq!(seen[0].status(), RequestStatus::Completed);
        assert_eq!(seen[0].slot(), 0);
        assert_eq!(seen[0].sequence(), 1);
        assert_eq!(seen[0].frame().get_pixel(0, 0).0[0], 0);
        assert_eq!(seen[1].frame().get_pixel(0, 0).0[0], 40);
        assert_eq!(seen[2].status(), RequestStatus::Cancelled);
    }

    #[test]
    fn stop_cancels_requests_still_queued() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_frames(dir.path(), 1);
        let mut settings = settings(dir.path());
        settings.frame_interval_ms = 60_000;
        settings.repeat = true;

        let mut source = ReplaySource::open(&settings).expect("open");
        let (handler, returned) = channel_handler();
        source.set_completion_handler(handler);
        source.start().expect("start");
        for req in source.create_requests() {
            source.queue_request(req).expect("queue");
        }
        let first = returned
            .recv_timeout(Duration::from_secs(5))
            .expect("first frame");
        assert_eq!(first.status(), RequestStatus::Completed);

        // The second request waits a full interval; stopping must not.
        source.stop();
        let second = returned.try_recv().expect("second request returned");
        assert_eq!(second.status(), RequestStatus::Cancelled);
    }

    #[test]
    fn queue_without_start_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_frames(dir.path(), 1);
        let source = ReplaySource::open(&settings(dir.path())).expect("open");
        assert!(matches!(
            source.queue_request(CaptureRequest::new(0)),
            Err(CameraError::NotRunning)
        ));
    }
}
