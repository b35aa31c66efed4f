use std::collections::VecDeque;

use novade_video_texture::error::{RendererError, Result};
use novade_video_texture::presentation::{PresentBackend, PresentationLoop, StopSignal};
use novade_video_texture::recorder::FrameRecorder;
use novade_video_texture::source::{CaptureDevice, CaptureSource, DequeuedBuffer, FrameFormat, PixelFormat};

const FRAME_COUNT: u8 = 10;

/// A four-buffer ring producing `FRAME_COUNT` RGB24 frames, frame i filled with byte i.
struct SyntheticCamera {
    format: FrameFormat,
    buffers: Vec<Vec<u8>>,
    queued: VecDeque<usize>,
    produced: u8,
}

impl SyntheticCamera {
    fn new() -> Self {
        let format = FrameFormat {
            width: 8,
            height: 6,
            pixel_format: PixelFormat::Rgb24,
        };
        Self {
            buffers: vec![vec![0; format.frame_size()]; 4],
            queued: (0..4).collect(),
            produced: 0,
            format,
        }
    }
}

impl CaptureDevice for SyntheticCamera {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn dequeue(&mut self) -> Result<DequeuedBuffer> {
        if self.produced == FRAME_COUNT {
            return Err(RendererError::SourceExhausted);
        }
        let index = self.queued.pop_front().expect("consumer holds every buffer");
        self.buffers[index].fill(self.produced);
        let sequence = u64::from(self.produced);
        self.produced += 1;
        Ok(DequeuedBuffer {
            index,
            bytes_used: self.format.frame_size(),
            sequence,
        })
    }

    fn enqueue(&mut self, index: usize) -> Result<()> {
        assert!(!self.queued.contains(&index), "buffer {} queued twice", index);
        self.queued.push_back(index);
        Ok(())
    }

    fn buffer(&self, index: usize) -> &[u8] {
        &self.buffers[index]
    }
}

/// Keeps a copy of every uploaded frame.
#[derive(Default)]
struct CapturingBackend {
    uploads: Vec<Vec<u8>>,
    presented: usize,
    idled: bool,
}

impl PresentBackend for CapturingBackend {
    fn wait_for_slot(&mut self, _slot: usize) -> Result<()> {
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<u32> {
        Ok(slot as u32)
    }

    fn upload_frame(&mut self, rgba: &[u8]) -> Result<()> {
        self.uploads.push(rgba.to_vec());
        Ok(())
    }

    fn submit(&mut self, _slot: usize, _image_index: u32) -> Result<()> {
        Ok(())
    }

    fn present(&mut self, _slot: usize, _image_index: u32) -> Result<()> {
        self.presented += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.idled = true;
        Ok(())
    }
}

struct StopAfter(usize);

impl StopSignal for StopAfter {
    fn stop_requested(&mut self) -> bool {
        if self.0 == 0 {
            return true;
        }
        self.0 -= 1;
        false
    }
}

#[test]
fn ten_captured_frames_are_recorded_and_uploaded_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let record_path = dir.path().join("capture.rgb");

    let source = CaptureSource::new(SyntheticCamera::new());
    let frame_size = source.device().format().frame_size();
    let mut presentation = PresentationLoop::new(source, CapturingBackend::default())
        .with_recorder(FrameRecorder::create(&record_path).unwrap());

    // The first frame is uploaded before the loop; nine more iterations consume the rest.
    let summary = presentation.run(&mut StopAfter(FRAME_COUNT as usize - 1)).unwrap();
    assert_eq!(summary.frames_uploaded, u64::from(FRAME_COUNT));
    assert_eq!(summary.frames_presented, u64::from(FRAME_COUNT) - 1);

    let backend = presentation.backend();
    assert!(backend.idled);
    assert_eq!(backend.presented, FRAME_COUNT as usize - 1);
    assert_eq!(backend.uploads.len(), FRAME_COUNT as usize);
    for (i, upload) in backend.uploads.iter().enumerate() {
        assert_eq!(upload.len(), 8 * 6 * 4);
        for pixel in upload.chunks_exact(4) {
            assert_eq!(pixel, [i as u8, i as u8, i as u8, 255], "frame {} was torn", i);
        }
    }

    let recorded = std::fs::read(&record_path).unwrap();
    let expected: Vec<u8> = (0..FRAME_COUNT)
        .flat_map(|i| std::iter::repeat(i).take(frame_size))
        .collect();
    assert_eq!(recorded, expected);

    // Every buffer went back to the driver.
    assert_eq!(presentation.source().held_count(), 0);
    assert_eq!(presentation.source().device().queued.len(), 4);
}

#[test]
fn exhausted_capture_surfaces_as_an_error() {
    let source = CaptureSource::new(SyntheticCamera::new());
    let mut presentation = PresentationLoop::new(source, CapturingBackend::default());

    let err = presentation.run(&mut StopAfter(usize::MAX)).unwrap_err();
    assert!(matches!(err, RendererError::SourceExhausted));
    assert_eq!(presentation.backend().uploads.len(), FRAME_COUNT as usize);
    assert!(presentation.backend().idled);
}
