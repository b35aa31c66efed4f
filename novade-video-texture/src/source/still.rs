//! The static-image variant of [`FrameSource`].

use std::path::Path;
use tracing::{debug, info};

use super::{AcquiredFrame, BufferHandle, FrameFormat, FrameSource, PixelFormat};
use crate::error::{RendererError, Result};

/// One decoded RGBA image, handed out exactly once.
#[derive(Debug)]
pub struct StaticImageSource {
    format: FrameFormat,
    pixels: Option<Vec<u8>>,
    acquired: bool,
}

impl StaticImageSource {
    /// Decodes `path` into 8-bit RGBA.
    pub fn open(path: &Path) -> Result<Self> {
        let decoded = image::open(path)
            .map_err(|source| RendererError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        info!("Decoded {:?}: {}x{}", path, width, height);
        Self::from_rgba(width, height, decoded.into_raw())
    }

    /// Wraps already-decoded RGBA pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let format = FrameFormat {
            width,
            height,
            pixel_format: PixelFormat::Rgba,
        };
        if pixels.len() != format.frame_size() {
            return Err(RendererError::FrameSizeMismatch {
                expected: format.frame_size(),
                actual: pixels.len(),
            });
        }
        Ok(Self {
            format,
            pixels: Some(pixels),
            acquired: false,
        })
    }
}

impl FrameSource for StaticImageSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn acquire(&mut self) -> Result<AcquiredFrame<'_>> {
        if self.acquired {
            return Err(RendererError::SourceExhausted);
        }
        let data = self.pixels.as_deref().ok_or(RendererError::SourceExhausted)?;
        self.acquired = true;
        Ok(AcquiredFrame {
            handle: BufferHandle::new(0),
            data,
            sequence: 0,
        })
    }

    fn release(&mut self, handle: BufferHandle) -> Result<()> {
        assert!(
            handle.index() == 0 && self.pixels.is_some() && self.acquired,
            "image buffer released but not held"
        );
        self.pixels = None;
        debug!("Released decoded image ({} bytes)", self.format.frame_size());
        Ok(())
    }

    fn is_live(&self) -> bool {
        false
    }
}
