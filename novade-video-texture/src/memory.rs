//! Device memory allocation for buffers and images.
//!
//! Every resource gets its own `VkDeviceMemory` allocation.

use ash::{vk, Device};
use std::sync::Arc;
use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};

/// Returns the index of the first memory type allowed by `type_filter` whose
/// property flags contain all of `required`.
///
/// `type_filter` is the `memory_type_bits` mask from a resource's memory
/// requirements. Failing to find a type is a setup error and is never retried.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let allowed = type_filter & (1 << i) != 0;
            let flags = memory_properties.memory_types[i as usize].property_flags;
            allowed && flags.contains(required)
        })
        .ok_or(RendererError::NoCompatibleMemoryType {
            type_filter,
            properties: required,
        })
}

/// Allocates memory satisfying `requirements` and `properties`.
pub fn allocate_memory(
    context: &GraphicsContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        context.memory_properties(),
        requirements.memory_type_bits,
        properties,
    )?;

    let allocate_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe { context.device().allocate_memory(&allocate_info, None) }
        .map_err(|e| RendererError::creation("DeviceMemory", e))?;
    debug!(
        "Allocated {} bytes from memory type {} ({:?})",
        requirements.size, memory_type_index, properties
    );
    Ok(memory)
}

/// A buffer together with the memory bound to it.
pub struct AllocatedBuffer {
    device: Arc<Device>,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl AllocatedBuffer {
    /// Creates a buffer of `size` bytes and binds freshly allocated memory with `properties`.
    pub fn new(
        context: &GraphicsContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(RendererError::creation("Buffer", "buffer size cannot be zero"));
        }
        let device = Arc::clone(context.device());

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| RendererError::creation("Buffer", e))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match allocate_memory(context, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(RendererError::creation("Buffer", e));
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

/// Allocates memory for `image` and binds it at offset zero.
pub fn bind_image_memory(
    context: &GraphicsContext,
    image: vk::Image,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let device = context.device();
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory = allocate_memory(context, requirements, properties)?;
    if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(RendererError::creation("ImageMemory", e));
    }
    Ok(memory)
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties_with(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn picks_first_type_matching_filter_and_properties() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = properties_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 2);
        // Type 2 filtered out by the resource: falls through to the cached one.
        assert_eq!(find_memory_type(&props, 0b1011, host).unwrap(), 3);
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let props = properties_with(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(
            err,
            RendererError::NoCompatibleMemoryType { type_filter: 0b1, .. }
        ));

        // Right properties but excluded by the filter.
        let err = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(err, RendererError::NoCompatibleMemoryType { .. }));
    }
}
