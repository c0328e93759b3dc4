//! Video frame types and the frame acquisition seam.
//!
//! The actual capture device (a webcam, a video file, a network stream) lives outside of this
//! crate; the control session only talks to a [`FrameSource`]. Frames carry their own resolution,
//! which may change between frames and must never be assumed fixed.

use std::fmt;

use anyhow::bail;
use embedded_graphics::{
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, OriginDimensions, Size},
    Pixel,
};
use image::RgbImage;

/// Width and height of a [`Frame`], in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// 1280x720.
    pub const RES_720P: Self = Self {
        width: 1280,
        height: 720,
    };

    /// Creates a new resolution. Both dimensions must be non-zero.
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        assert!(
            width != 0 && height != 0,
            "attempted to create a resolution with 0 width or height"
        );
        Self { width, height }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An owned RGB raster frame.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Creates a black frame of the given resolution.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            image: RgbImage::new(resolution.width(), resolution.height()),
        }
    }

    /// Wraps an existing image buffer.
    ///
    /// The buffer must be non-empty in both dimensions.
    pub fn from_image(image: RgbImage) -> Self {
        assert!(
            image.width() != 0 && image.height() != 0,
            "attempted to create a frame from an empty image"
        );
        Self { image }
    }

    /// Returns the resolution of this frame.
    ///
    /// Zone rectangles are resolved against this value at classification time.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    #[inline]
    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.resolution())
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }
}

/// Allows `embedded-graphics` primitives to be rendered directly onto a [`Frame`].
///
/// Out-of-bounds pixels are discarded, so overlays may extend past the frame edge.
impl DrawTarget for Frame {
    type Color = Rgb888;
    type Error = std::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = (self.width() as i32, self.height() as i32);
        for Pixel(point, color) in pixels {
            if (0..width).contains(&point.x) && (0..height).contains(&point.y) {
                self.image.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    image::Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }
        Ok(())
    }
}

/// Source of raster video frames.
///
/// Implementations own the underlying capture device. The control session acquires a fresh
/// instance on every start and drops it on every exit path, so `Drop` is the place to release
/// device handles.
pub trait FrameSource: Send {
    /// Reads the next frame, blocking until one is available.
    ///
    /// Errors are treated as transient by the session: the read is retried after a short delay,
    /// and only a run of consecutive failures escalates to a session-fatal error.
    fn read(&mut self) -> anyhow::Result<Frame>;
}

impl FrameSource for Box<dyn FrameSource> {
    fn read(&mut self) -> anyhow::Result<Frame> {
        (**self).read()
    }
}

/// A [`FrameSource`] that yields blank frames at a fixed resolution.
///
/// Used by the demo binary and the test suite in place of a real camera. Individual reads can be
/// scripted to fail in order to exercise the session's retry behavior.
pub struct SyntheticCamera {
    resolution: Resolution,
    frame_interval: Option<std::time::Duration>,
    next_index: u64,
    failures: Vec<u64>,
}

impl SyntheticCamera {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            frame_interval: None,
            next_index: 0,
            failures: Vec::new(),
        }
    }

    /// Paces reads at the given frame rate instead of returning immediately.
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame_interval = Some(std::time::Duration::from_secs(1) / fps.max(1));
        self
    }

    /// Makes the reads with the given 0-based indices fail.
    pub fn fail_on<I: IntoIterator<Item = u64>>(mut self, indices: I) -> Self {
        self.failures.extend(indices);
        self
    }
}

impl FrameSource for SyntheticCamera {
    fn read(&mut self) -> anyhow::Result<Frame> {
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }
        let index = self.next_index;
        self.next_index += 1;
        if self.failures.contains(&index) {
            bail!("synthetic read failure at frame {index}");
        }
        Ok(Frame::new(self.resolution))
    }
}
