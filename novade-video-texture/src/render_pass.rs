//! The single-subpass render pass that draws the textured quad into a swapchain image.

use ash::{vk, Device};
use std::sync::Arc;

use crate::error::{RendererError, Result};

pub struct RenderPass {
    device: Arc<Device>,
    handle: vk::RenderPass,
}

impl RenderPass {
    /// Creates a render pass with one cleared color attachment of `color_format`
    /// that ends in the present layout.
    pub fn new(device: &Arc<Device>, color_format: vk::Format) -> Result<Self> {
        let attachments = [vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()];

        let color_attachment_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_attachment_ref))
            .build()];

        // The image-acquired semaphore is waited on at COLOR_ATTACHMENT_OUTPUT,
        // so the layout transition must not start before that stage.
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let handle = unsafe { device.create_render_pass(&create_info, None) }
            .map_err(|e| RendererError::creation("RenderPass", e))?;

        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Records `vkCmdBeginRenderPass` clearing `framebuffer` to opaque black.
    pub fn begin(&self, command_buffer: vk::CommandBuffer, framebuffer: vk::Framebuffer, extent: vk::Extent2D) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE)
        };
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.handle, None);
        }
    }
}
