//! Device-local sampled images with their view, sampler and layout tag.

use ash::{vk, Device};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};
use crate::layout::{require_transition, ImageLayoutState};
use crate::memory::bind_image_memory;

/// Bytes per texel of every [`GpuImage`]; the pipeline only handles 8-bit RGBA.
pub const BYTES_PER_PIXEL: usize = 4;

/// A 2D RGBA texture in device-local memory.
///
/// The image starts in [`ImageLayoutState::Undefined`]. Its layout tag is only
/// changed through [`GpuImage::record_transition`], which validates the pair.
pub struct GpuImage {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
    format: vk::Format,
    layout: ImageLayoutState,
}

impl GpuImage {
    pub fn new(context: &GraphicsContext, width: u32, height: u32, format: vk::Format) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RendererError::creation("Image", format!("invalid extent {}x{}", width, height)));
        }
        let device = Arc::clone(context.device());

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED,
            )
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| RendererError::creation("Image", e))?;

        let memory = match bind_image_memory(context, image, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(RendererError::creation("ImageView", e));
            }
        };

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        let sampler = match unsafe { device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe {
                    device.destroy_image_view(view, None);
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(RendererError::creation("Sampler", e));
            }
        };

        info!("Created {}x{} {:?} texture image", width, height, format);
        Ok(Self {
            device,
            image,
            memory,
            view,
            sampler,
            extent: vk::Extent2D { width, height },
            format,
            layout: ImageLayoutState::Undefined,
        })
    }

    /// Records a pipeline barrier moving the image to `to` and updates the tag.
    ///
    /// # Panics
    ///
    /// Panics if the current layout cannot legally move to `to`.
    pub fn record_transition(&mut self, command_buffer: vk::CommandBuffer, to: ImageLayoutState) {
        let barrier = require_transition(self.layout, to);
        let image_barrier = barrier.image_barrier(self.image);
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                barrier.src_stage_mask,
                barrier.dst_stage_mask,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
        debug!("Image {:?}: {:?} -> {:?}", self.image, self.layout, to);
        self.layout = to;
    }

    /// Byte length of one full frame for this image.
    pub fn byte_size(&self) -> usize {
        self.extent.width as usize * self.extent.height as usize * BYTES_PER_PIXEL
    }

    pub fn layout(&self) -> ImageLayoutState {
        self.layout
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
        debug!("Destroyed texture image {:?}", self.image);
    }
}
