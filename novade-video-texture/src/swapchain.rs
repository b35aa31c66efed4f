//! Swapchain creation, per-image views and framebuffers.

use ash::extensions::khr;
use ash::{vk, Device};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};

/// Prefers `B8G8R8A8_SRGB` with the sRGB non-linear color space, else the first format offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first().copied())
}

/// Whether the hardware decodes `format` from sRGB on read and encodes to sRGB on write.
pub fn is_srgb(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_SRGB
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::A8B8G8R8_SRGB_PACK32
            | vk::Format::B8G8R8_SRGB
            | vk::Format::R8G8B8_SRGB
    )
}

/// `MAILBOX` when available; `FIFO` is always supported.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum when the surface has one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

pub struct Swapchain {
    device: Arc<Device>,
    loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// Creates a swapchain for the context's surface. `width`/`height` are only
    /// used when the surface leaves the extent to the application.
    pub fn new(context: &GraphicsContext, width: u32, height: u32) -> Result<Self> {
        let (surface_loader, surface) = context
            .surface()
            .ok_or_else(|| RendererError::creation("Swapchain", "context has no presentation surface"))?;
        let physical_device = context.physical_device();

        let capabilities =
            unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface)? };
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface)? };
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface)? };

        let format = choose_surface_format(&formats)
            .ok_or_else(|| RendererError::creation("Swapchain", "surface reports no formats"))?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&capabilities, width, height);
        let image_count = choose_image_count(&capabilities);

        let indices = context.queue_family_indices();
        let graphics_family = indices
            .graphics_family
            .ok_or_else(|| RendererError::QueueFamilyNotFound("graphics".to_string()))?;
        let present_family = indices
            .present_family
            .ok_or_else(|| RendererError::QueueFamilyNotFound("present".to_string()))?;
        let family_indices = [graphics_family, present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        create_info = if graphics_family != present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let device = Arc::clone(context.device());
        let loader = khr::Swapchain::new(context.instance(), &device);
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| RendererError::creation("Swapchain", e))?;

        let mut this = Self {
            device,
            loader,
            swapchain,
            format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
        };
        // From here on `Drop` releases whatever was created.
        this.images = unsafe { this.loader.get_swapchain_images(swapchain)? };
        for &image in &this.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { this.device.create_image_view(&view_info, None) }
                .map_err(|e| RendererError::creation("SwapchainImageView", e))?;
            this.image_views.push(view);
        }

        info!(
            "Swapchain created: {} images, {}x{}, {:?}, {:?}",
            this.images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );
        Ok(this)
    }

    /// Creates one framebuffer per swapchain image for `render_pass`.
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        for &view in &self.image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
                .map_err(|e| RendererError::creation("Framebuffer", e))?;
            self.framebuffers.push(framebuffer);
        }
        debug!("Created {} framebuffers", self.framebuffers.len());
        Ok(())
    }

    /// Acquires the next presentable image, signalling `image_available`.
    ///
    /// A suboptimal swapchain is still used; out-of-date is returned as
    /// [`RendererError::SwapchainOutOfDate`].
    pub fn acquire_next_image(&self, image_available: vk::Semaphore) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, image_available, vk::Fence::null())?
        };
        if suboptimal {
            debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Queues `image_index` for presentation once `render_finished` is signalled.
    pub fn present(&self, queue: vk::Queue, image_index: u32, render_finished: vk::Semaphore) -> Result<()> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.loader.queue_present(queue, &present_info)? };
        Ok(())
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 1920, height: 1080 },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra_and_falls_back_to_first() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_surface_format(&[unorm]).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn srgb_formats_are_recognised() {
        assert!(is_srgb(vk::Format::B8G8R8A8_SRGB));
        assert!(is_srgb(vk::Format::R8G8B8A8_SRGB));
        assert!(!is_srgb(vk::Format::B8G8R8A8_UNORM));
        assert!(!is_srgb(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_and_image_count_respect_surface_limits() {
        let fixed = capabilities(2, 3, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(choose_extent(&fixed, 640, 480), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(choose_image_count(&fixed), 3);

        let free = capabilities(3, 3, vk::Extent2D { width: u32::MAX, height: u32::MAX });
        assert_eq!(choose_extent(&free, 4000, 8), vk::Extent2D { width: 1920, height: 16 });
        assert_eq!(choose_image_count(&free), 3);

        let unbounded = capabilities(2, 0, vk::Extent2D { width: u32::MAX, height: u32::MAX });
        assert_eq!(choose_image_count(&unbounded), 3);
    }
}
