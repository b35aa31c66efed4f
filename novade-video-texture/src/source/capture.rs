//! The capture variant of [`FrameSource`]: a ring of driver-owned buffers.
//!
//! A buffer whose `bytes_used` does not match the negotiated frame size is
//! requeued at once and reported as [`RendererError::ShortFrame`]; the
//! presentation loop skips such frames. Sequence numbers come from the driver
//! and are only logged, never enforced.

use tracing::{debug, trace, warn};

use super::{AcquiredFrame, BufferHandle, FrameFormat, FrameSource};
use crate::error::{RendererError, Result};

/// A buffer the driver has filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: usize,
    pub bytes_used: usize,
    pub sequence: u64,
}

/// Dequeue/enqueue primitives of a streaming capture device.
///
/// Buffers are identified by their index in the ring. After `dequeue` returns
/// an index the device does not write that buffer until it is enqueued again.
pub trait CaptureDevice {
    fn format(&self) -> FrameFormat;

    fn buffer_count(&self) -> usize;

    /// Blocks until the driver has a filled buffer.
    fn dequeue(&mut self) -> Result<DequeuedBuffer>;

    /// Hands buffer `index` back to the driver's fill queue.
    fn enqueue(&mut self, index: usize) -> Result<()>;

    /// The mapped memory of buffer `index`.
    fn buffer(&self, index: usize) -> &[u8];
}

/// Tracks which ring buffers the consumer holds and enforces the handoff protocol.
pub struct CaptureSource<D: CaptureDevice> {
    device: D,
    held: Vec<bool>,
    last_sequence: Option<u64>,
}

impl<D: CaptureDevice> CaptureSource<D> {
    /// Wraps a device whose buffers are all queued and streaming.
    pub fn new(device: D) -> Self {
        let held = vec![false; device.buffer_count()];
        Self {
            device,
            held,
            last_sequence: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn held_count(&self) -> usize {
        self.held.iter().filter(|&&held| held).count()
    }
}

impl<D: CaptureDevice> FrameSource for CaptureSource<D> {
    fn format(&self) -> FrameFormat {
        self.device.format()
    }

    fn acquire(&mut self) -> Result<AcquiredFrame<'_>> {
        let DequeuedBuffer {
            index,
            bytes_used,
            sequence,
        } = self.device.dequeue()?;

        assert!(
            !self.held[index],
            "capture buffer {} dequeued while still held by the consumer",
            index
        );

        let expected = self.device.format().frame_size();
        if bytes_used != expected {
            // A short frame is not handed out; the buffer goes straight back to the driver.
            self.device.enqueue(index)?;
            return Err(RendererError::ShortFrame {
                expected,
                actual: bytes_used,
                sequence,
            });
        }

        match self.last_sequence {
            Some(last) if sequence <= last => {
                warn!("Capture sequence went from {} to {}; delivering in dequeue order", last, sequence);
            }
            Some(last) if sequence > last + 1 => {
                debug!("Driver dropped {} frame(s) before sequence {}", sequence - last - 1, sequence);
            }
            _ => {}
        }
        self.last_sequence = Some(sequence);
        self.held[index] = true;
        trace!("Acquired capture buffer {} (sequence {})", index, sequence);

        Ok(AcquiredFrame {
            handle: BufferHandle::new(index),
            data: &self.device.buffer(index)[..bytes_used],
            sequence,
        })
    }

    fn release(&mut self, handle: BufferHandle) -> Result<()> {
        let index = handle.index();
        assert!(
            self.held.get(index).copied().unwrap_or(false),
            "capture buffer {} released but not held",
            index
        );
        self.held[index] = false;
        self.device.enqueue(index)?;
        trace!("Released capture buffer {}", index);
        Ok(())
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PixelFormat;
    use std::collections::VecDeque;

    /// A ring whose driver side fills each buffer with the frame's sequence number.
    struct RingDevice {
        buffers: Vec<Vec<u8>>,
        queued: VecDeque<usize>,
        next_sequence: u64,
        sequence_step: u64,
        short_frame_at: Option<u64>,
        format: FrameFormat,
    }

    impl RingDevice {
        fn new(count: usize) -> Self {
            let format = FrameFormat {
                width: 4,
                height: 2,
                pixel_format: PixelFormat::Rgba,
            };
            Self {
                buffers: vec![vec![0; format.frame_size()]; count],
                queued: (0..count).collect(),
                next_sequence: 0,
                sequence_step: 1,
                short_frame_at: None,
                format,
            }
        }
    }

    impl CaptureDevice for RingDevice {
        fn format(&self) -> FrameFormat {
            self.format
        }

        fn buffer_count(&self) -> usize {
            self.buffers.len()
        }

        fn dequeue(&mut self) -> Result<DequeuedBuffer> {
            let index = self.queued.pop_front().ok_or(RendererError::SourceExhausted)?;
            let sequence = self.next_sequence;
            self.next_sequence += self.sequence_step;
            self.buffers[index].fill(sequence as u8);
            let bytes_used = if self.short_frame_at == Some(sequence) {
                self.format.frame_size() / 2
            } else {
                self.format.frame_size()
            };
            Ok(DequeuedBuffer {
                index,
                bytes_used,
                sequence,
            })
        }

        fn enqueue(&mut self, index: usize) -> Result<()> {
            self.queued.push_back(index);
            Ok(())
        }

        fn buffer(&self, index: usize) -> &[u8] {
            &self.buffers[index]
        }
    }

    /// Returns the same buffer index on every dequeue.
    struct StuckDevice(RingDevice);

    impl CaptureDevice for StuckDevice {
        fn format(&self) -> FrameFormat {
            self.0.format
        }
        fn buffer_count(&self) -> usize {
            self.0.buffers.len()
        }
        fn dequeue(&mut self) -> Result<DequeuedBuffer> {
            let sequence = self.0.next_sequence;
            self.0.next_sequence += 1;
            Ok(DequeuedBuffer {
                index: 0,
                bytes_used: self.0.format.frame_size(),
                sequence,
            })
        }
        fn enqueue(&mut self, _index: usize) -> Result<()> {
            Ok(())
        }
        fn buffer(&self, index: usize) -> &[u8] {
            &self.0.buffers[index]
        }
    }

    #[test]
    fn frames_arrive_in_order_with_their_contents() {
        let mut source = CaptureSource::new(RingDevice::new(3));
        for expected in 0..7u64 {
            let frame = source.acquire().unwrap();
            assert_eq!(frame.sequence, expected);
            assert!(frame.data.iter().all(|&b| b == expected as u8));
            assert_eq!(frame.data.len(), 32);
            let handle = frame.handle;
            source.release(handle).unwrap();
        }
        assert_eq!(source.held_count(), 0);
    }

    #[test]
    fn held_buffers_are_not_handed_out_again() {
        let mut source = CaptureSource::new(RingDevice::new(2));
        let first = source.acquire().unwrap().handle;
        let second = source.acquire().unwrap().handle;
        assert_ne!(first, second);
        assert_eq!(source.held_count(), 2);

        // Both buffers are held, so the driver has nothing left to fill.
        assert!(source.acquire().is_err());

        source.release(first).unwrap();
        let third = source.acquire().unwrap();
        assert_eq!(third.handle.index(), 0);
        assert_eq!(third.sequence, 2);
    }

    #[test]
    #[should_panic(expected = "dequeued while still held")]
    fn double_acquire_of_one_buffer_panics() {
        let mut source = CaptureSource::new(StuckDevice(RingDevice::new(2)));
        let _first = source.acquire().unwrap().handle;
        let _ = source.acquire();
    }

    #[test]
    #[should_panic(expected = "released but not held")]
    fn releasing_unheld_buffer_panics() {
        let mut source = CaptureSource::new(RingDevice::new(2));
        source.release(BufferHandle::new(1)).unwrap();
    }

    #[test]
    fn short_frame_is_requeued_and_reported() {
        let mut device = RingDevice::new(2);
        device.short_frame_at = Some(0);
        let mut source = CaptureSource::new(device);

        let err = source.acquire().unwrap_err();
        assert!(matches!(
            err,
            RendererError::ShortFrame {
                expected: 32,
                actual: 16,
                sequence: 0
            }
        ));
        assert_eq!(source.held_count(), 0);
        assert_eq!(source.device().queued.len(), 2);

        let frame = source.acquire().unwrap();
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn unset_driver_sequence_numbers_are_tolerated() {
        let mut device = RingDevice::new(2);
        device.sequence_step = 0;
        let mut source = CaptureSource::new(device);

        for _ in 0..3 {
            let frame = source.acquire().unwrap();
            assert_eq!(frame.sequence, 0);
            let handle = frame.handle;
            source.release(handle).unwrap();
        }
        assert_eq!(source.held_count(), 0);
    }
}
