//! Saved page screenshots: replaying them as a frame source, and recording
//! live frames so a run can be replayed later.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::{debug, info, warn};

use super::{normalize_frame, CaptureError, FrameSource};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays screenshots from a directory in file name order.
///
/// After the last file, `advance` keeps the last frame so the scanner sees an
/// identical capture and stops.
pub struct DirectorySource {
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            CaptureError::Backend(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut frames: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(CaptureError::NoFrames(dir.to_path_buf()));
        }

        info!("Replaying {} screenshots from {}", frames.len(), dir.display());
        Ok(Self { frames, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

impl FrameSource for DirectorySource {
    fn grab(&mut self) -> Result<RgbaImage, CaptureError> {
        let path = &self.frames[self.cursor];
        debug!("Loading frame {}", path.display());
        let img = image::open(path).map_err(|source| CaptureError::Image {
            path: path.clone(),
            source,
        })?;
        normalize_frame(img.to_rgba8())
    }

    fn advance(&mut self) -> Result<(), CaptureError> {
        if self.cursor + 1 < self.frames.len() {
            self.cursor += 1;
        }
        Ok(())
    }
}

/// Wraps a frame source and writes every grabbed frame to a directory as
/// `page_NNN.png`, the layout `DirectorySource` reads back.
pub struct FrameRecorder<S> {
    inner: S,
    dir: PathBuf,
    saved: u32,
}

impl<S: FrameSource> FrameRecorder<S> {
    pub fn new(inner: S, dir: PathBuf) -> Result<Self, CaptureError> {
        fs::create_dir_all(&dir).map_err(|e| {
            CaptureError::Backend(format!("cannot create {}: {}", dir.display(), e))
        })?;
        info!("Saving captured pages to {}", dir.display());
        Ok(Self {
            inner,
            dir,
            saved: 0,
        })
    }
}

impl<S: FrameSource> FrameSource for FrameRecorder<S> {
    fn grab(&mut self) -> Result<RgbaImage, CaptureError> {
        let frame = self.inner.grab()?;
        self.saved += 1;
        let path = self.dir.join(format!("page_{:03}.png", self.saved));
        // A failed debug dump must not abort the run.
        if let Err(e) = frame.save(&path) {
            warn!("Failed to save frame {}: {}", path.display(), e);
        }
        Ok(frame)
    }

    fn advance(&mut self) -> Result<(), CaptureError> {
        self.inner.advance()
    }
}
