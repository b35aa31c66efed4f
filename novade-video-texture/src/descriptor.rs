//! The combined image sampler binding read by the fragment shader.

use ash::{vk, Device};
use std::sync::Arc;
use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};
use crate::layout::ImageLayoutState;
use crate::texture::GpuImage;

/// A descriptor set layout with one combined image sampler at binding 0,
/// a pool sized for it, and the single set allocated from that pool.
pub struct DescriptorBinding {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    bound_view: Option<vk::ImageView>,
}

impl DescriptorBinding {
    pub fn new(context: &GraphicsContext) -> Result<Self> {
        let device = Arc::clone(context.device());

        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| RendererError::creation("DescriptorSetLayout", e))?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(RendererError::creation("DescriptorPool", e));
            }
        };

        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(RendererError::creation("DescriptorSet", e));
            }
        };

        Ok(Self {
            device,
            layout,
            pool,
            set,
            bound_view: None,
        })
    }

    /// Points binding 0 at `image`'s view and sampler.
    ///
    /// # Panics
    ///
    /// Panics unless `image` is in the shader-read layout. Callers upload first.
    pub fn update(&mut self, image: &GpuImage) {
        assert_eq!(
            image.layout(),
            ImageLayoutState::ShaderReadOnly,
            "descriptor update requires a shader-readable image"
        );

        let image_info = [vk::DescriptorImageInfo {
            sampler: image.sampler(),
            image_view: image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        self.bound_view = Some(image.view());
        debug!("Descriptor set {:?} bound to image view {:?}", self.set, image.view());
    }

    /// Whether [`update`](Self::update) has been called with `image`.
    pub fn is_bound_to(&self, image: &GpuImage) -> bool {
        self.bound_view == Some(image.view())
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
}

impl Drop for DescriptorBinding {
    fn drop(&mut self) {
        unsafe {
            // Frees the set with it.
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

