//! Diagnostic snapshot of the processed frame.
//!
//! Encoding a PNG takes far longer than a frame period, so snapshots are
//! handed to a dedicated writer thread through a one-slot channel. While the
//! writer is busy new snapshots are dropped and counted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use tagpose_core::Detection;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);

struct Snapshot {
    frame: GrayImage,
    outline: Option<Detection>,
}

/// Binarized frame with the first detection's outline drawn in green.
pub fn render_snapshot(frame: &GrayImage, outline: Option<&Detection>) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(frame.clone()).into_rgb8();
    if let Some(det) = outline {
        for i in 0..4 {
            let a = det.corners[i];
            let b = det.corners[(i + 1) % 4];
            draw_line_segment_mut(&mut canvas, (a.x, a.y), (b.x, b.y), OUTLINE);
        }
    }
    canvas
}

pub struct SnapshotWriter {
    tx: Option<SyncSender<Snapshot>>,
    dropped: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotWriter {
    pub fn spawn(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::sync_channel::<Snapshot>(1);
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);

        let worker = thread::Builder::new()
            .name("snapshot".into())
            .spawn(move || {
                for snap in rx {
                    let img = render_snapshot(&snap.frame, snap.outline.as_ref());
                    match img.save(&path) {
                        Ok(()) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => log::warn!("cannot write snapshot {}: {e}", path.display()),
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
            written,
            worker: Some(worker),
        })
    }

    /// Queue a snapshot without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, frame: &GrayImage, outline: Option<&Detection>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let snap = Snapshot {
            frame: frame.clone(),
            outline: outline.cloned(),
        };
        match tx.try_send(snap) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Flush the pending snapshot and join the writer.
    pub fn finish(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("snapshot writer panicked");
            }
        }
        if self.dropped() > 0 {
            log::debug!("{} snapshots dropped while the writer was busy", self.dropped());
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.finish();
    }
}
