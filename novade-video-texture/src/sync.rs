//! Per-slot synchronization for frames in flight.
//!
//! Each [`FrameSlot`] owns the semaphores ordering acquire → render → present
//! on the GPU, the fence the host waits on before reusing the slot, and the
//! command buffer recorded for it. Slots rotate through a [`SlotCursor`].

use ash::{vk, Device};
use std::sync::Arc;
use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};

/// Number of frames that may be submitted but not yet presented.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Round-robin index over `len` in-flight slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCursor {
    current: usize,
    len: usize,
}

impl SlotCursor {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "at least one in-flight slot is required");
        Self { current: 0, len }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Moves to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.len;
        self.current
    }
}

pub struct FrameSlot {
    device: Arc<Device>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Signalled when the slot's last submission completes. Created signalled
    /// so the first wait returns immediately.
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    fn new(device: &Arc<Device>, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| RendererError::creation("Semaphore", e))?;
        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(RendererError::creation("Semaphore", e));
            }
        };
        let in_flight = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                }
                return Err(RendererError::creation("Fence", e));
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            image_available,
            render_finished,
            in_flight,
            command_buffer,
        })
    }

    /// Blocks until the slot's previous submission has completed, then resets its fence.
    pub fn wait_and_reset(&self) -> Result<()> {
        unsafe {
            self.device.wait_for_fences(&[self.in_flight], true, u64::MAX)?;
            self.device.reset_fences(&[self.in_flight])?;
        }
        Ok(())
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.in_flight, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_semaphore(self.image_available, None);
        }
    }
}

/// Allocates `count` slots, each with a primary command buffer from the context's pool.
///
/// The command buffers are freed with the pool.
pub fn create_frame_slots(context: &GraphicsContext, count: usize) -> Result<Vec<FrameSlot>> {
    let device = context.device();
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(context.command_pool())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);
    let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }
        .map_err(|e| RendererError::creation("CommandBuffer", e))?;

    let slots = command_buffers
        .into_iter()
        .map(|command_buffer| FrameSlot::new(device, command_buffer))
        .collect::<Result<Vec<_>>>()?;
    debug!("Created {} in-flight frame slots", slots.len());
    Ok(slots)
}
