//! Screen capture of the game's gacha history screen.
//!
//! This module provides:
//! - The `FrameSource` trait the scanner pulls pages from
//! - Region cropping with bounds checks (`capture_region`)
//! - Live window capture on Windows (`WindowCapture`)
//! - Replay from, and recording to, a directory of page screenshots

pub mod replay;
#[cfg(windows)]
mod screenshot;
#[cfg(windows)]
mod window;

use image::RgbaImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use replay::{DirectorySource, FrameRecorder};

#[cfg(windows)]
pub use screenshot::WindowCapture;

/// Width of the reference layout every frame is normalized to.
pub const REFERENCE_WIDTH: u32 = 1920;
/// Height of the reference layout every frame is normalized to.
pub const REFERENCE_HEIGHT: u32 = 1080;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("game window not found (looked for {titles:?}). Is the game running?")]
    WindowNotFound { titles: Vec<String> },
    #[error("region {region:?} lies outside the {width}x{height} frame")]
    RegionOutOfBounds {
        region: Region,
        width: u32,
        height: u32,
    },
    #[error("client area is {width}x{height}, only 16:9 windowed/borderless mode is supported")]
    AspectRatio { width: u32, height: u32 },
    #[error("live capture is not supported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("no screenshots found in {0}")]
    NoFrames(PathBuf),
    #[error("failed to read frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("capture backend failed: {0}")]
    Backend(String),
}

/// A rectangle in reference-layout pixels (1920x1080).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Something that yields frames of the history screen, page by page.
pub trait FrameSource {
    /// Returns the current client area, normalized to the reference size.
    fn grab(&mut self) -> Result<RgbaImage, CaptureError>;

    /// Waits until the next page is (probably) visible.
    fn advance(&mut self) -> Result<(), CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn grab(&mut self) -> Result<RgbaImage, CaptureError> {
        (**self).grab()
    }

    fn advance(&mut self) -> Result<(), CaptureError> {
        (**self).advance()
    }
}

/// Crops `region` out of a frame.
///
/// Unlike a clamped crop, a region that does not fit is an error: it means
/// the window is not in the expected resolution or mode.
pub fn capture_region(frame: &RgbaImage, region: &Region) -> Result<RgbaImage, CaptureError> {
    let (width, height) = frame.dimensions();
    if region.width == 0 || region.height == 0 || region.right() > width || region.bottom() > height
    {
        return Err(CaptureError::RegionOutOfBounds {
            region: *region,
            width,
            height,
        });
    }
    Ok(image::imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image())
}

/// Checks the 16:9 aspect ratio and scales the frame to the reference size.
///
/// One pixel of rounding is tolerated (e.g. 1366x768). Nearest-neighbour
/// scaling keeps marker colours exact, with no blending at their edges.
pub fn normalize_frame(frame: RgbaImage) -> Result<RgbaImage, CaptureError> {
    let (width, height) = frame.dimensions();
    let skew = (width as i64 * 9 - height as i64 * 16).abs();
    if width == 0 || height == 0 || skew > 16 {
        return Err(CaptureError::AspectRatio { width, height });
    }
    if (width, height) == (REFERENCE_WIDTH, REFERENCE_HEIGHT) {
        return Ok(frame);
    }
    Ok(image::imageops::resize(
        &frame,
        REFERENCE_WIDTH,
        REFERENCE_HEIGHT,
        FilterType::Nearest,
    ))
}

/// Stand-in for platforms without a window capture backend.
#[cfg(not(windows))]
pub struct WindowCapture;

#[cfg(not(windows))]
impl WindowCapture {
    pub fn attach(
        _titles: &[String],
        _settings: &crate::config::ScanSettings,
    ) -> Result<Self, CaptureError> {
        Err(CaptureError::Unsupported(
            "window capture needs Windows; use `replay` with saved screenshots",
        ))
    }
}

#[cfg(not(windows))]
impl FrameSource for WindowCapture {
    fn grab(&mut self) -> Result<RgbaImage, CaptureError> {
        Err(CaptureError::Unsupported("window capture needs Windows"))
    }

    fn advance(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("window capture needs Windows"))
    }
}
