//! Display sink: persists the visible overlay surface.
//!
//! The session republishes its front buffer on a `watch` channel after
//! every render. The sink writes the latest surface to a PNG, at most
//! once per `min_interval`, so an external viewer can tail the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Writes overlay surfaces to a PNG file.
pub struct DisplaySink {
    path: PathBuf,
    min_interval: Duration,
    last_written: Option<Instant>,
    writes: u64,
}

impl DisplaySink {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration) -> Self {
        Self {
            path: path.into(),
            min_interval,
            last_written: None,
            writes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Write `surface` unless the previous write was too recent.
    ///
    /// Returns whether the file was written. Empty surfaces (a session
    /// that has not rendered yet) are skipped.
    pub fn present(&mut self, surface: &RgbaImage) -> Result<bool, image::ImageError> {
        if surface.width() == 0 || surface.height() == 0 {
            return Ok(false);
        }
        let now = Instant::now();
        if let Some(last) = self.last_written {
            if now.saturating_duration_since(last) < self.min_interval {
                return Ok(false);
            }
        }
        surface.save(&self.path)?;
        self.last_written = Some(now);
        self.writes += 1;
        debug!(path = %self.path.display(), painted = painted_pixels(surface), "overlay written");
        Ok(true)
    }

    /// Follow `overlay` until its sender is dropped, writing each change.
    ///
    /// The final surface is always written so the file reflects the
    /// cleared overlay after a stop.
    pub fn spawn(mut self, mut overlay: watch::Receiver<Arc<RgbaImage>>) -> JoinHandle<u64> {
        tokio::spawn(async move {
            while overlay.changed().await.is_ok() {
                let surface = Arc::clone(&overlay.borrow_and_update());
                if let Err(e) = self.present(&surface) {
                    warn!(error = %e, path = %self.path.display(), "overlay write failed");
                }
            }
            self.last_written = None;
            let last = Arc::clone(&overlay.borrow());
            if let Err(e) = self.present(&last) {
                warn!(error = %e, "final overlay write failed");
            }
            info!(writes = self.writes, "display sink closed");
            self.writes
        })
    }
}

fn painted_pixels(surface: &RgbaImage) -> usize {
    surface.pixels().filter(|p| p.0[3] != 0).count()
}

// ── Tests ────────────────────────────────────────────────────────
