//! The graphics pipeline that samples the texture onto the full-screen quad.

use ash::{vk, Device};
use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{RendererError, Result};
use crate::geometry::Vertex;
use crate::shader::ShaderModule;

/// Where the pipeline's two SPIR-V stages come from.
#[derive(Debug, Clone, Copy)]
pub struct ShaderSources<'a> {
    pub vertex: &'a Path,
    pub fragment: &'a Path,
    pub entry_point: &'a str,
}

pub struct GraphicsPipeline {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    handle: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Builds the pipeline for `render_pass`, with one descriptor set
    /// (`descriptor_layout`) and dynamic viewport/scissor.
    pub fn new(
        device: &Arc<Device>,
        render_pass: vk::RenderPass,
        descriptor_layout: vk::DescriptorSetLayout,
        shaders: ShaderSources<'_>,
    ) -> Result<Self> {
        // Modules are destroyed when they go out of scope, after pipeline creation.
        let vertex_module = ShaderModule::from_file(device, shaders.vertex)?;
        let fragment_module = ShaderModule::from_file(device, shaders.fragment)?;
        let entry_point =
            CString::new(shaders.entry_point).map_err(|e| RendererError::creation("GraphicsPipeline", e))?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.handle())
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.handle())
                .name(&entry_point)
                .build(),
        ];

        let binding_descriptions = [Vertex::binding_description()];
        let attribute_descriptions = Vertex::attribute_descriptions();
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the values are set per frame.
        let viewport_state_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state_info = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisample_state_info = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend_state_info = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let set_layouts = [descriptor_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| RendererError::creation("PipelineLayout", e))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_state_info)
            .viewport_state(&viewport_state_info)
            .rasterization_state(&rasterization_state_info)
            .multisample_state(&multisample_state_info)
            .color_blend_state(&color_blend_state_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let handle = match pipelines {
            Ok(pipelines) if !pipelines.is_empty() => pipelines[0],
            Ok(_) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(RendererError::creation("GraphicsPipeline", "no pipeline returned"));
            }
            Err((partial, err)) => {
                unsafe {
                    for pipeline in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                        device.destroy_pipeline(pipeline, None);
                    }
                    device.destroy_pipeline_layout(layout, None);
                }
                return Err(RendererError::creation("GraphicsPipeline", err));
            }
        };

        info!(
            "Graphics pipeline created from {:?} and {:?}",
            shaders.vertex, shaders.fragment
        );
        Ok(Self {
            device: Arc::clone(device),
            layout,
            handle,
        })
    }

    /// Binds the pipeline and its descriptor set and sets a full-extent viewport and scissor.
    pub fn record_bind(&self, command_buffer: vk::CommandBuffer, descriptor_set: vk::DescriptorSet, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.handle);
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                0,
                &[descriptor_set],
                &[],
            );
        }
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
