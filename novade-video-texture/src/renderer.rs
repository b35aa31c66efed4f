//! The Vulkan implementation of [`PresentBackend`].

use ash::vk;
use tracing::{debug, info};

use crate::context::GraphicsContext;
use crate::descriptor::DescriptorBinding;
use crate::error::{RendererError, Result};
use crate::geometry::QuadMesh;
use crate::pipeline::{GraphicsPipeline, ShaderSources};
use crate::presentation::PresentBackend;
use crate::render_pass::RenderPass;
use crate::source::FrameFormat;
use crate::staging::StagingPolicy;
use crate::swapchain::{is_srgb, Swapchain};
use crate::sync::{create_frame_slots, FrameSlot, MAX_FRAMES_IN_FLIGHT};
use crate::texture::GpuImage;
use crate::upload::FrameUploader;

/// The texture format whose encoding matches a swapchain of `surface_format`.
///
/// Source pixels are sRGB-encoded. Sampling them from an sRGB texture and
/// writing to an sRGB attachment, or reading them raw and writing them raw to
/// a UNORM attachment, both put the source bytes on screen unchanged.
pub fn texture_format_for(surface_format: vk::Format) -> vk::Format {
    if is_srgb(surface_format) {
        vk::Format::R8G8B8A8_SRGB
    } else {
        vk::Format::R8G8B8A8_UNORM
    }
}

/// Live sources overwrite one mapped staging buffer every frame; a still
/// image is staged once and the buffer freed after its upload.
pub fn staging_policy(source_is_live: bool) -> StagingPolicy {
    if source_is_live {
        StagingPolicy::Persistent
    } else {
        StagingPolicy::Transient
    }
}

/// Owns every GPU resource the presentation loop touches.
///
/// Fields drop in declaration order, and `context` is last so the device
/// outlives everything created from it.
pub struct VulkanPresenter {
    slots: Vec<FrameSlot>,
    pipeline: GraphicsPipeline,
    descriptor: DescriptorBinding,
    mesh: QuadMesh,
    texture: GpuImage,
    uploader: FrameUploader,
    swapchain: Swapchain,
    render_pass: RenderPass,
    present_queue: vk::Queue,
    context: GraphicsContext,
}

impl VulkanPresenter {
    /// Builds the swapchain, pipeline, texture and frame slots for frames of `frame`.
    ///
    /// `context` must have been created with a presentation surface.
    pub fn new(
        context: GraphicsContext,
        frame: FrameFormat,
        staging: StagingPolicy,
        window_extent: vk::Extent2D,
        shaders: ShaderSources<'_>,
    ) -> Result<Self> {
        let present_queue = context
            .present_queue()
            .ok_or_else(|| RendererError::QueueFamilyNotFound("present".to_string()))?;

        let mut swapchain = Swapchain::new(&context, window_extent.width, window_extent.height)?;
        let render_pass = RenderPass::new(context.device(), swapchain.format())?;
        swapchain.create_framebuffers(render_pass.handle())?;

        let descriptor = DescriptorBinding::new(&context)?;
        let pipeline = GraphicsPipeline::new(context.device(), render_pass.handle(), descriptor.layout(), shaders)?;
        let mesh = QuadMesh::new(&context)?;

        let texture_format = texture_format_for(swapchain.format());
        let texture = GpuImage::new(&context, frame.width, frame.height, texture_format)?;
        let uploader = FrameUploader::new(&context, staging, texture.byte_size())?;
        let slots = create_frame_slots(&context, MAX_FRAMES_IN_FLIGHT)?;

        info!(
            "Presenter ready: {}x{} {:?} texture for {:?} swapchain ({} images), {:?} staging",
            frame.width,
            frame.height,
            texture_format,
            swapchain.format(),
            swapchain.image_count(),
            staging
        );
        Ok(Self {
            slots,
            pipeline,
            descriptor,
            mesh,
            texture,
            uploader,
            swapchain,
            render_pass,
            present_queue,
            context,
        })
    }

    pub fn staging_policy(&self) -> StagingPolicy {
        self.uploader.policy()
    }

    fn record_draw(&self, command_buffer: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let device = self.context.device();
        let extent = self.swapchain.extent();
        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(command_buffer, &vk::CommandBufferBeginInfo::builder())?;
        }
        self.render_pass
            .begin(command_buffer, self.swapchain.framebuffer(image_index), extent);
        self.pipeline
            .record_bind(command_buffer, self.descriptor.set(), extent);
        self.mesh.record_draw(device, command_buffer);
        unsafe {
            device.cmd_end_render_pass(command_buffer);
            device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }
}

impl PresentBackend for VulkanPresenter {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.slots[slot].wait_and_reset()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<u32> {
        self.swapchain.acquire_next_image(self.slots[slot].image_available)
    }

    fn upload_frame(&mut self, rgba: &[u8]) -> Result<()> {
        self.uploader.upload(&self.context, rgba, &mut self.texture)?;
        if !self.descriptor.is_bound_to(&self.texture) {
            self.descriptor.update(&self.texture);
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        assert!(
            self.descriptor.is_bound_to(&self.texture),
            "draw submitted before the texture was uploaded"
        );
        let frame = &self.slots[slot];
        self.record_draw(frame.command_buffer, image_index)?;

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.context
                .device()
                .queue_submit(self.context.graphics_queue(), &[submit_info.build()], frame.in_flight)?;
        }
        debug!("Submitted slot {} for swapchain image {}", slot, image_index);
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.swapchain
            .present(self.present_queue, image_index, self.slots[slot].render_finished)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.context.wait_idle()
    }
}

impl Drop for VulkanPresenter {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            tracing::warn!("device_wait_idle failed before presenter teardown: {}", e);
        }
        debug!("Tearing down presenter resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FrameSource, StaticImageSource};
    use crate::swapchain::choose_surface_format;

    fn surface(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn texture_encoding_follows_the_chosen_surface_format() {
        let offered = [surface(vk::Format::B8G8R8A8_UNORM), surface(vk::Format::B8G8R8A8_SRGB)];
        let chosen = choose_surface_format(&offered).unwrap().format;
        assert_eq!(texture_format_for(chosen), vk::Format::R8G8B8A8_SRGB);

        let unorm_only = choose_surface_format(&[surface(vk::Format::B8G8R8A8_UNORM)]).unwrap().format;
        assert_eq!(texture_format_for(unorm_only), vk::Format::R8G8B8A8_UNORM);

        for format in [
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::R8G8B8A8_SRGB,
            vk::Format::A2B10G10R10_UNORM_PACK32,
        ] {
            assert_eq!(is_srgb(texture_format_for(format)), is_srgb(format), "{:?}", format);
        }
    }

    #[test]
    fn still_images_use_transient_staging() {
        let still = StaticImageSource::from_rgba(1, 1, vec![255, 0, 0, 255]).unwrap();
        assert_eq!(staging_policy(still.is_live()), StagingPolicy::Transient);
        assert_eq!(staging_policy(true), StagingPolicy::Persistent);
    }
}
