//! The full-screen textured quad.

use ash::vk;
use std::mem::{offset_of, size_of};
use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::Result;
use crate::memory::AllocatedBuffer;
use crate::staging::stage;
use crate::upload::one_shot;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Clip-space corners, clockwise from the top-left, with the texture's top-left at (0, 0).
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex { pos: [-1.0, -1.0], uv: [0.0, 0.0] },
    Vertex { pos: [1.0, -1.0], uv: [1.0, 0.0] },
    Vertex { pos: [1.0, 1.0], uv: [1.0, 1.0] },
    Vertex { pos: [-1.0, 1.0], uv: [0.0, 1.0] },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

fn as_bytes<T: Copy>(items: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(items.as_ptr().cast::<u8>(), std::mem::size_of_val(items)) }
}

/// Uploads `bytes` into a new device-local buffer with `usage | TRANSFER_DST`.
fn device_local_buffer(context: &GraphicsContext, bytes: &[u8], usage: vk::BufferUsageFlags) -> Result<AllocatedBuffer> {
    let staging = stage(context, bytes)?;
    let buffer = AllocatedBuffer::new(
        context,
        staging.size(),
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let device = context.device();
    one_shot(context, |command_buffer| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size(),
        };
        unsafe { device.cmd_copy_buffer(command_buffer, staging.buffer(), buffer.buffer, &[region]) };
    })?;
    Ok(buffer)
}

/// Device-local vertex and index buffers for [`QUAD_VERTICES`] / [`QUAD_INDICES`].
pub struct QuadMesh {
    vertex_buffer: AllocatedBuffer,
    index_buffer: AllocatedBuffer,
}

impl QuadMesh {
    pub fn new(context: &GraphicsContext) -> Result<Self> {
        let vertex_buffer =
            device_local_buffer(context, as_bytes(&QUAD_VERTICES), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = device_local_buffer(context, as_bytes(&QUAD_INDICES), vk::BufferUsageFlags::INDEX_BUFFER)?;
        debug!("Quad mesh uploaded ({} vertices, {} indices)", QUAD_VERTICES.len(), QUAD_INDICES.len());
        Ok(Self {
            vertex_buffer,
            index_buffer,
        })
    }

    /// Binds both buffers and draws the quad.
    pub fn record_draw(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(command_buffer, self.index_buffer.buffer, 0, vk::IndexType::UINT16);
            device.cmd_draw_indexed(command_buffer, QUAD_INDICES.len() as u32, 1, 0, 0, 0);
        }
    }
}
