//! Producers of raw pixel frames.
//!
//! A [`FrameSource`] hands out one frame at a time through [`FrameSource::acquire`].
//! The returned [`AcquiredFrame`] borrows the source, so the bytes cannot be
//! read after [`FrameSource::release`] hands the buffer back to its producer.

use serde::Deserialize;

use crate::error::Result;

pub mod capture;
pub mod still;
pub mod v4l2;

pub use capture::{CaptureDevice, CaptureSource, DequeuedBuffer};
pub use still::StaticImageSource;
pub use v4l2::V4l2Device;

/// Pixel layouts a source can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 4:2:2 Y0 U Y1 V; two pixels per four bytes.
    Yuyv,
    /// Packed 8-bit R, G, B, A.
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Yuyv => 2,
            PixelFormat::Rgba => 4,
        }
    }

    /// The V4L2 FourCC code for this layout.
    pub fn fourcc(self) -> u32 {
        let code = match self {
            PixelFormat::Rgb24 => b"RGB3",
            PixelFormat::Yuyv => b"YUYV",
            PixelFormat::Rgba => b"AB24",
        };
        u32::from_le_bytes(*code)
    }

    pub fn from_fourcc(fourcc: u32) -> Option<Self> {
        [PixelFormat::Rgb24, PixelFormat::Yuyv, PixelFormat::Rgba]
            .into_iter()
            .find(|format| format.fourcc() == fourcc)
    }
}

/// Dimensions and layout of every frame a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl FrameFormat {
    /// Exact byte length of one frame.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Byte length of the frame once expanded to RGBA8.
    pub fn rgba_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Identifies a buffer held by the consumer between `acquire` and `release`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

impl BufferHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A filled frame on loan from a [`FrameSource`].
#[derive(Debug)]
pub struct AcquiredFrame<'a> {
    pub handle: BufferHandle,
    pub data: &'a [u8],
    /// Capture order; strictly increasing across acquisitions.
    pub sequence: u64,
}

pub trait FrameSource {
    fn format(&self) -> FrameFormat;

    /// Blocks until a filled frame is available.
    ///
    /// # Panics
    ///
    /// Implementations panic if the buffer they would return is still held.
    fn acquire(&mut self) -> Result<AcquiredFrame<'_>>;

    /// Returns the buffer to its producer.
    ///
    /// # Panics
    ///
    /// Implementations panic if `handle` is not currently held.
    fn release(&mut self, handle: BufferHandle) -> Result<()>;

    /// Whether the source keeps producing frames after the first.
    fn is_live(&self) -> bool;
}
