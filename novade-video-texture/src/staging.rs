//! Host-visible staging buffers.
//!
//! A [`StagingBuffer`] is sized to exactly one frame. The static image path
//! creates one per upload with [`StagingPolicy::Transient`]; the video path
//! keeps a single [`StagingPolicy::Persistent`] buffer mapped for the life of
//! the loop and overwrites it every frame.

use ash::vk;
use std::ptr::NonNull;
use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};
use crate::memory::AllocatedBuffer;

/// Whether a staging buffer stays mapped between writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingPolicy {
    /// Map, copy and unmap on every write.
    Transient,
    /// Map once at creation; unmapped on drop.
    Persistent,
}

pub struct StagingBuffer {
    // Drop order: the mapping is released in `Drop` before `buffer` frees the memory.
    buffer: AllocatedBuffer,
    policy: StagingPolicy,
    mapped: Option<NonNull<u8>>,
}

impl StagingBuffer {
    /// Allocates a host-visible, host-coherent transfer source of `size` bytes.
    pub fn new(context: &GraphicsContext, size: vk::DeviceSize, policy: StagingPolicy) -> Result<Self> {
        let buffer = AllocatedBuffer::new(
            context,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let mut staging = Self {
            buffer,
            policy,
            mapped: None,
        };
        if policy == StagingPolicy::Persistent {
            staging.mapped = Some(staging.map()?);
        }
        debug!("Created {:?} staging buffer of {} bytes", policy, size);
        Ok(staging)
    }

    fn map(&self) -> Result<NonNull<u8>> {
        let ptr = unsafe {
            self.buffer.device().map_memory(
                self.buffer.memory,
                0,
                self.buffer.size,
                vk::MemoryMapFlags::empty(),
            )?
        };
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| RendererError::creation("StagingBuffer", "vkMapMemory returned a null pointer"))
    }

    fn unmap(&self) {
        unsafe { self.buffer.device().unmap_memory(self.buffer.memory) };
    }

    /// Copies `bytes` to the start of the buffer.
    ///
    /// `bytes` must be exactly the buffer size. The memory is host-coherent, so
    /// the copy is visible to the device once this returns. Callers must not
    /// write while a transfer reading this buffer is still executing; the
    /// synchronous upload guarantees that.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize != self.buffer.size {
            return Err(RendererError::FrameSizeMismatch {
                expected: self.buffer.size as usize,
                actual: bytes.len(),
            });
        }

        let (ptr, transient) = match self.mapped {
            Some(ptr) => (ptr, false),
            None => (self.map()?, true),
        };
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        if transient {
            self.unmap();
        }
        Ok(())
    }

    /// Reads the whole buffer back into host memory.
    pub fn read_contents(&self) -> Result<Vec<u8>> {
        let (ptr, transient) = match self.mapped {
            Some(ptr) => (ptr, false),
            None => (self.map()?, true),
        };
        let contents = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.buffer.size as usize) }.to_vec();
        if transient {
            self.unmap();
        }
        Ok(contents)
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size
    }

    pub fn policy(&self) -> StagingPolicy {
        self.policy
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if self.mapped.take().is_some() {
            self.unmap();
        }
    }
}

/// Allocates a transient staging buffer holding a byte-for-byte copy of `bytes`.
pub fn stage(context: &GraphicsContext, bytes: &[u8]) -> Result<StagingBuffer> {
    let mut staging = StagingBuffer::new(context, bytes.len() as vk::DeviceSize, StagingPolicy::Transient)?;
    staging.write(bytes)?;
    Ok(staging)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use tracing::warn;

    fn headless() -> Option<GraphicsContext> {
        crate::logging::init_minimal_logging();
        match GraphicsContext::new_headless(&ContextOptions::default()) {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Skipping staging test, no Vulkan device available: {}", e);
                None
            }
        }
    }

    #[test]
    fn staged_contents_match_source_bytes() {
        let Some(context) = headless() else { return };
        let bytes: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();

        let staging = stage(&context, &bytes).unwrap();
        assert_eq!(staging.size(), bytes.len() as vk::DeviceSize);
        assert_eq!(staging.read_contents().unwrap(), bytes);
    }

    #[test]
    fn persistent_buffer_is_overwritten_in_place() {
        let Some(context) = headless() else { return };
        let mut staging = StagingBuffer::new(&context, 64, StagingPolicy::Persistent).unwrap();

        staging.write(&[1u8; 64]).unwrap();
        staging.write(&[2u8; 64]).unwrap();
        assert_eq!(staging.read_contents().unwrap(), vec![2u8; 64]);

        let err = staging.write(&[0u8; 63]).unwrap_err();
        assert!(matches!(err, RendererError::FrameSizeMismatch { expected: 64, actual: 63 }));
    }
}
