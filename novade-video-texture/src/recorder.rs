//! Raw frame recording: captured bytes appended to a file with no framing.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

pub struct FrameRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
    bytes: u64,
}

impl FrameRecorder {
    /// Opens `path` for appending, creating it if needed.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Recording raw frames to {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            frames: 0,
            bytes: 0,
        })
    }

    /// Appends one frame verbatim.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame)?;
        self.frames += 1;
        self.bytes += frame.len() as u64;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Flushes buffered frames to the file.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        debug!("Recorded {} frames ({} bytes) to {:?}", self.frames, self.bytes, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_concatenated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.raw");

        let mut recorder = FrameRecorder::create(&path).unwrap();
        recorder.write_frame(&[1, 1, 1]).unwrap();
        recorder.write_frame(&[2, 2, 2]).unwrap();
        assert_eq!(recorder.frames_written(), 2);
        recorder.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn existing_recordings_are_appended_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.raw");
        std::fs::write(&path, [9u8]).unwrap();

        let mut recorder = FrameRecorder::create(&path).unwrap();
        recorder.write_frame(&[7]).unwrap();
        recorder.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 7]);
    }
}
