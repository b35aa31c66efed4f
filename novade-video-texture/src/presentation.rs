//! The per-frame presentation protocol.
//!
//! [`PresentationLoop`] drives a [`FrameSource`] and a [`PresentBackend`]
//! through wait → acquire → refresh → submit → present → advance, with
//! [`MAX_FRAMES_IN_FLIGHT`] rotating slots. The backend does the GPU work;
//! the loop owns the ordering.
//!
//! A short capture frame is skipped and the previous texture contents are
//! presented again. [`MAX_CONSECUTIVE_SHORT_FRAMES`] in a row end the loop.

use tracing::{debug, error, info, warn};

use crate::convert::to_rgba;
use crate::error::{RendererError, Result};
use crate::recorder::FrameRecorder;
use crate::source::{AcquiredFrame, FrameFormat, FrameSource};
use crate::sync::{SlotCursor, MAX_FRAMES_IN_FLIGHT};

/// GPU side of the presentation loop.
///
/// `slot` is always below [`MAX_FRAMES_IN_FLIGHT`].
pub trait PresentBackend {
    /// Blocks until the last submission made from `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquires the next presentable image, signalling the slot's image-acquired semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<u32>;

    /// Synchronously copies one RGBA8 frame into the texture.
    fn upload_frame(&mut self, rgba: &[u8]) -> Result<()>;

    /// Records and submits the draw for `image_index` from `slot`.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Presents `image_index` once the slot's rendering has finished.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Blocks until the device has no outstanding work.
    fn wait_idle(&mut self) -> Result<()>;
}

/// Short frames tolerated back to back before the loop gives up.
pub const MAX_CONSECUTIVE_SHORT_FRAMES: u32 = 30;

/// Checked once per loop iteration; `true` ends the loop.
pub trait StopSignal {
    fn stop_requested(&mut self) -> bool;
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames_presented: u64,
    pub frames_uploaded: u64,
    pub frames_skipped: u64,
}

pub struct PresentationLoop<S, B> {
    source: S,
    backend: B,
    recorder: Option<FrameRecorder>,
    format: FrameFormat,
    rgba: Vec<u8>,
    cursor: SlotCursor,
    summary: LoopSummary,
    short_streak: u32,
}

impl<S: FrameSource, B: PresentBackend> PresentationLoop<S, B> {
    pub fn new(source: S, backend: B) -> Self {
        let format = source.format();
        Self {
            rgba: vec![0; format.rgba_size()],
            source,
            backend,
            recorder: None,
            format,
            cursor: SlotCursor::new(MAX_FRAMES_IN_FLIGHT),
            summary: LoopSummary::default(),
            short_streak: 0,
        }
    }

    /// Appends every acquired frame, as delivered by the source, to `recorder`.
    pub fn with_recorder(mut self, recorder: FrameRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Acquires a frame, records it, converts it, uploads it and releases it.
    ///
    /// The frame is released even when recording or uploading fails.
    fn refresh(&mut self) -> Result<()> {
        let AcquiredFrame { handle, data, sequence } = self.source.acquire()?;

        let delivered = (|| -> Result<()> {
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.write_frame(data)?;
            }
            to_rgba(&self.format, data, &mut self.rgba)?;
            self.backend.upload_frame(&self.rgba)
        })();

        self.source.release(handle)?;
        delivered?;
        self.summary.frames_uploaded += 1;
        debug!("Frame {} uploaded", sequence);
        Ok(())
    }

    /// Like [`Self::refresh`], but a short frame is counted and skipped.
    fn refresh_or_skip(&mut self) -> Result<()> {
        match self.refresh() {
            Ok(()) => {
                self.short_streak = 0;
                Ok(())
            }
            Err(RendererError::ShortFrame {
                expected,
                actual,
                sequence,
            }) => {
                self.short_streak += 1;
                self.summary.frames_skipped += 1;
                if self.short_streak >= MAX_CONSECUTIVE_SHORT_FRAMES {
                    return Err(RendererError::ShortFrame {
                        expected,
                        actual,
                        sequence,
                    });
                }
                warn!("Skipping short frame {}: {} of {} bytes", sequence, actual, expected);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Refreshes until the texture holds one complete frame.
    fn prime(&mut self) -> Result<()> {
        while self.summary.frames_uploaded == 0 {
            self.refresh_or_skip()?;
        }
        Ok(())
    }

    fn run_frames(&mut self, stop: &mut impl StopSignal) -> Result<()> {
        loop {
            if stop.stop_requested() {
                info!("Stop requested after {} frames", self.summary.frames_presented);
                return Ok(());
            }

            let slot = self.cursor.current();
            self.backend.wait_for_slot(slot)?;
            let image_index = self.backend.acquire_image(slot)?;
            if self.source.is_live() {
                self.refresh_or_skip()?;
            }
            self.backend.submit(slot, image_index)?;
            self.backend.present(slot, image_index)?;

            self.cursor.advance();
            self.summary.frames_presented += 1;
        }
    }

    /// Uploads the first frame, then presents until `stop` fires or a frame fails.
    ///
    /// The device is idle when this returns, whatever the outcome.
    pub fn run(&mut self, stop: &mut impl StopSignal) -> Result<LoopSummary> {
        info!(
            "Starting presentation: {}x{} {:?}, {} frames in flight",
            self.format.width,
            self.format.height,
            self.format.pixel_format,
            self.cursor.len()
        );

        let outcome = self.prime().and_then(|()| self.run_frames(stop));
        if let Err(e) = &outcome {
            error!("Presentation loop failed: {}", e);
        }

        let idle = self.backend.wait_idle();
        let flushed = match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        };

        outcome?;
        idle?;
        flushed?;
        info!(
            "Presentation finished: {} frames presented, {} uploaded, {} skipped",
            self.summary.frames_presented, self.summary.frames_uploaded, self.summary.frames_skipped
        );
        Ok(self.summary)
    }
}
