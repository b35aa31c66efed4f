//! The synchronous buffer-to-image upload.

use ash::vk;
use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{RendererError, Result};
use crate::layout::ImageLayoutState;
use crate::staging::{stage, StagingBuffer, StagingPolicy};
use crate::texture::GpuImage;

/// Records commands into a one-time command buffer, submits it on the graphics
/// queue and blocks until it has executed.
pub fn one_shot<F>(context: &GraphicsContext, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let device = context.device();
    let command_pool = context.command_pool();

    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let command_buffer = unsafe { device.allocate_command_buffers(&allocate_info) }?[0];

    let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) } {
        Ok(fence) => fence,
        Err(e) => {
            unsafe { device.free_command_buffers(command_pool, &[command_buffer]) };
            return Err(e.into());
        }
    };

    let submitted = (|| -> Result<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;
        record(command_buffer);
        unsafe { device.end_command_buffer(command_buffer) }?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device.queue_submit(context.graphics_queue(), &[submit_info.build()], fence)?;
            device.wait_for_fences(&[fence], true, u64::MAX)?;
        }
        Ok(())
    })();

    unsafe {
        device.destroy_fence(fence, None);
        device.free_command_buffers(command_pool, &[command_buffer]);
    }
    submitted
}

/// Copies the whole of `staging` into `image` and leaves it shader-readable.
///
/// Records `current -> TransferDst`, the copy, then `TransferDst -> ShaderReadOnly`
/// in one command buffer and waits for it to complete, so the staging buffer
/// may be rewritten and the image sampled as soon as this returns.
///
/// # Panics
///
/// Panics if `image` is already in the transfer-destination layout.
pub fn upload(context: &GraphicsContext, staging: &StagingBuffer, image: &mut GpuImage) -> Result<()> {
    let expected = image.byte_size();
    if staging.size() as usize != expected {
        return Err(RendererError::FrameSizeMismatch {
            expected,
            actual: staging.size() as usize,
        });
    }

    let extent = image.extent();
    let device = context.device();
    one_shot(context, |command_buffer| {
        image.record_transition(command_buffer, ImageLayoutState::TransferDst);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging.buffer(),
                image.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region.build()],
            );
        }

        image.record_transition(command_buffer, ImageLayoutState::ShaderReadOnly);
    })?;

    debug!("Uploaded {} bytes into {}x{} image", expected, extent.width, extent.height);
    Ok(())
}

/// Uploads whole RGBA frames into one image, staging them per `policy`.
///
/// With [`StagingPolicy::Persistent`] a single mapped buffer is kept and
/// overwritten for every frame. With [`StagingPolicy::Transient`] each
/// upload stages into a fresh buffer that is freed as soon as the copy has
/// completed, so nothing host-visible is held between uploads.
pub struct FrameUploader {
    policy: StagingPolicy,
    persistent: Option<StagingBuffer>,
}

impl FrameUploader {
    pub fn new(context: &GraphicsContext, policy: StagingPolicy, frame_bytes: usize) -> Result<Self> {
        let persistent = match policy {
            StagingPolicy::Persistent => Some(StagingBuffer::new(
                context,
                frame_bytes as vk::DeviceSize,
                StagingPolicy::Persistent,
            )?),
            StagingPolicy::Transient => None,
        };
        Ok(Self { policy, persistent })
    }

    pub fn upload(&mut self, context: &GraphicsContext, rgba: &[u8], image: &mut GpuImage) -> Result<()> {
        match self.persistent.as_mut() {
            Some(staging) => {
                staging.write(rgba)?;
                upload(context, staging, image)
            }
            None => {
                let staging = stage(context, rgba)?;
                upload(context, &staging, image)
            }
        }
    }

    pub fn policy(&self) -> StagingPolicy {
        self.policy
    }

    /// Whether a staging buffer stays allocated between uploads.
    pub fn holds_staging(&self) -> bool {
        self.persistent.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use crate::memory::AllocatedBuffer;
    use crate::source::{FrameSource, StaticImageSource};
    use tracing::warn;

    fn headless() -> Option<GraphicsContext> {
        crate::logging::init_minimal_logging();
        match GraphicsContext::new_headless(&ContextOptions::default()) {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Skipping upload test, no Vulkan device available: {}", e);
                None
            }
        }
    }

    /// Copies the image back into host memory and returns it to the shader-read layout.
    fn read_back(context: &GraphicsContext, image: &GpuImage) -> Vec<u8> {
        assert_eq!(image.layout(), ImageLayoutState::ShaderReadOnly);
        let size = image.byte_size() as vk::DeviceSize;
        let readback = AllocatedBuffer::new(
            context,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        let device = context.device();
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        one_shot(context, |cmd| unsafe {
            let to_src = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image())
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_src],
            );
            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: image.extent().width,
                    height: image.extent().height,
                    depth: 1,
                })
                .build();
            device.cmd_copy_image_to_buffer(
                cmd,
                image.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.buffer,
                &[region],
            );
            let back = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image())
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[back],
            );
        })
        .unwrap();

        unsafe {
            let ptr = device
                .map_memory(readback.memory, 0, size, vk::MemoryMapFlags::empty())
                .unwrap();
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), size as usize).to_vec();
            device.unmap_memory(readback.memory);
            bytes
        }
    }

    fn texel(bytes: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * width + x) * 4) as usize;
        [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
    }

    #[test]
    fn decoded_red_png_round_trips() {
        let Some(context) = headless() else { return };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255])).save(&path).unwrap();

        let mut source = StaticImageSource::open(&path).unwrap();
        let frame = source.acquire().unwrap();
        let staging = stage(&context, frame.data).unwrap();
        let handle = frame.handle;
        source.release(handle).unwrap();

        let mut image = GpuImage::new(&context, 2, 2, vk::Format::R8G8B8A8_UNORM).unwrap();
        upload(&context, &staging, &mut image).unwrap();
        assert_eq!(image.layout(), ImageLayoutState::ShaderReadOnly);

        let pixels = read_back(&context, &image);
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(texel(&pixels, 2, x, y), [255, 0, 0, 255]);
        }
    }

    #[test]
    fn corner_texels_match_source_and_refresh_cycles_layout() {
        let Some(context) = headless() else { return };
        let (width, height) = (5u32, 3u32);
        let source: Vec<u8> = (0..width * height * 4).map(|i| (i * 13 % 256) as u8).collect();

        let mut image = GpuImage::new(&context, width, height, vk::Format::R8G8B8A8_UNORM).unwrap();
        let staging = stage(&context, &source).unwrap();
        upload(&context, &staging, &mut image).unwrap();

        let pixels = read_back(&context, &image);
        for (x, y) in [(0, 0), (width - 1, 0), (0, height - 1), (width - 1, height - 1)] {
            assert_eq!(texel(&pixels, width, x, y), texel(&source, width, x, y));
        }

        // Second upload goes ShaderReadOnly -> TransferDst -> ShaderReadOnly.
        let inverted: Vec<u8> = source.iter().map(|b| 255 - b).collect();
        let staging = stage(&context, &inverted).unwrap();
        upload(&context, &staging, &mut image).unwrap();
        assert_eq!(read_back(&context, &image), inverted);
    }

    #[test]
    fn mismatched_staging_size_is_rejected() {
        let Some(context) = headless() else { return };
        let mut image = GpuImage::new(&context, 2, 2, vk::Format::R8G8B8A8_UNORM).unwrap();
        let staging = stage(&context, &[0u8; 12]).unwrap();

        let err = upload(&context, &staging, &mut image).unwrap_err();
        assert!(matches!(err, RendererError::FrameSizeMismatch { expected: 16, actual: 12 }));
        assert_eq!(image.layout(), ImageLayoutState::Undefined);
    }

    #[test]
    fn transient_uploader_frees_staging_after_each_frame() {
        let Some(context) = headless() else { return };
        let mut image = GpuImage::new(&context, 2, 2, vk::Format::R8G8B8A8_SRGB).unwrap();
        let mut uploader = FrameUploader::new(&context, StagingPolicy::Transient, image.byte_size()).unwrap();
        assert!(!uploader.holds_staging());

        let green = [0u8, 255, 0, 255].repeat(4);
        uploader.upload(&context, &green, &mut image).unwrap();
        assert!(!uploader.holds_staging());
        assert_eq!(read_back(&context, &image), green);
    }

    #[test]
    fn persistent_uploader_reuses_one_buffer() {
        let Some(context) = headless() else { return };
        let mut image = GpuImage::new(&context, 2, 1, vk::Format::R8G8B8A8_SRGB).unwrap();
        let mut uploader = FrameUploader::new(&context, StagingPolicy::Persistent, image.byte_size()).unwrap();
        assert!(uploader.holds_staging());

        for value in [10u8, 20] {
            uploader.upload(&context, &[value; 8], &mut image).unwrap();
            assert_eq!(read_back(&context, &image), vec![value; 8]);
        }
        assert!(uploader.holds_staging());

        let err = uploader.upload(&context, &[0; 4], &mut image).unwrap_err();
        assert!(matches!(err, RendererError::FrameSizeMismatch { expected: 8, actual: 4 }));
    }
}
