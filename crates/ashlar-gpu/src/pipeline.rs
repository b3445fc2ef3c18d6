//! Pipeline creation.
//!
//! Graphics pipelines are built against a render pass, either a
//! [`FrameBuffer`]'s or the [`Swapchain`]'s, and use dynamic viewport and
//! scissor so they survive resizes.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::framebuffer::FrameBuffer;
use crate::shader::ShaderModule;
use crate::swapchain::Swapchain;
use ash::vk;
use std::sync::Arc;

/// Render pass a graphics pipeline is compatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub color_count: u32,
    pub samples: vk::SampleCountFlags,
    pub has_depth: bool,
}

impl PipelineTarget {
    pub fn from_frame_buffer(frame_buffer: &FrameBuffer) -> Self {
        let front = frame_buffer.front();
        let samples = front
            .color_attachments()
            .first()
            .map_or(vk::SampleCountFlags::TYPE_1, |a| a.samples());
        Self {
            render_pass: frame_buffer.render_pass(),
            color_count: front.color_attachments().len() as u32,
            samples,
            has_depth: front.depth_attachment().is_some(),
        }
    }

    pub fn from_swapchain(swapchain: &Swapchain) -> Self {
        Self {
            render_pass: swapchain.render_pass(),
            color_count: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            has_depth: swapchain.has_depth(),
        }
    }
}

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub alpha_blend: bool,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            alpha_blend: false,
        }
    }
}

impl GraphicsPipelineConfig {
    /// No vertex input and no culling, for full-screen triangle passes.
    pub fn fullscreen() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            depth_write: false,
            ..Self::default()
        }
    }
}

/// One blend state per color attachment; the count must match the subpass.
pub fn blend_attachments(color_count: u32, alpha_blend: bool) -> Vec<vk::PipelineColorBlendAttachmentState> {
    (0..color_count)
        .map(|_| {
            let state = vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(alpha_blend)
                .color_write_mask(vk::ColorComponentFlags::RGBA);
            if alpha_blend {
                state
                    .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                    .alpha_blend_op(vk::BlendOp::ADD)
            } else {
                state
            }
        })
        .collect()
}

unsafe fn create_layout(
    device: &ash::Device,
    descriptor_set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(descriptor_set_layouts)
        .push_constant_ranges(push_constant_ranges);

    unsafe {
        device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))
    }
}

/// Compute pipeline wrapper.
pub struct ComputePipeline {
    ctx: Arc<GpuContext>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub fn new(
        ctx: &Arc<GpuContext>,
        shader: &ShaderModule,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        if shader.stage() != vk::ShaderStageFlags::COMPUTE {
            return Err(GpuError::PipelineCreation(format!(
                "compute pipeline given a {:?} shader",
                shader.stage()
            )));
        }
        let device = ctx.device();
        let layout = unsafe { create_layout(device, descriptor_set_layouts, push_constant_ranges)? };

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_info())
            .layout(layout);

        let pipelines = unsafe { device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
        match pipelines {
            Ok(pipelines) => Ok(Self {
                ctx: Arc::clone(ctx),
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(GpuError::PipelineCreation(e.to_string()))
            }
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Bind the pipeline and its descriptor sets.
    ///
    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer, sets: &[vk::DescriptorSet]) {
        let device = self.ctx.device();
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            if !sets.is_empty() {
                device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::COMPUTE, self.layout, 0, sets, &[]);
            }
        }
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    ctx: Arc<GpuContext>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a pipeline for subpass 0 of `target`.
    pub fn new(
        ctx: &Arc<GpuContext>,
        target: PipelineTarget,
        vertex: &ShaderModule,
        fragment: &ShaderModule,
        config: &GraphicsPipelineConfig,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let device = ctx.device();
        let shader_stages = [vertex.stage_info(), fragment.stage_info()];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&config.vertex_bindings)
            .vertex_attribute_descriptions(&config.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(target.samples)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(target.has_depth && config.depth_test)
            .depth_write_enable(target.has_depth && config.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = blend_attachments(target.color_count, config.alpha_blend);
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout = unsafe { create_layout(device, descriptor_set_layouts, push_constant_ranges)? };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(target.render_pass)
            .subpass(0);

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
        match pipelines {
            Ok(pipelines) => Ok(Self {
                ctx: Arc::clone(ctx),
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(GpuError::PipelineCreation(e.to_string()))
            }
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Bind the pipeline and its descriptor sets.
    ///
    /// # Safety
    /// `cmd` must be recording inside a render pass compatible with the target.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer, sets: &[vk::DescriptorSet]) {
        let device = self.ctx.device();
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            if !sets.is_empty() {
                device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, self.layout, 0, sets, &[]);
            }
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_blend_state_per_color_attachment() {
        let states = blend_attachments(3, false);
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| s.blend_enable == vk::FALSE));
        assert!(states.iter().all(|s| s.color_write_mask == vk::ColorComponentFlags::RGBA));
    }

    #[test]
    fn alpha_blend_uses_source_alpha() {
        let states = blend_attachments(1, true);
        assert_eq!(states[0].blend_enable, vk::TRUE);
        assert_eq!(states[0].src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(states[0].dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn fullscreen_config_disables_depth_and_culling() {
        let config = GraphicsPipelineConfig::fullscreen();
        assert_eq!(config.cull_mode, vk::CullModeFlags::NONE);
        assert!(!config.depth_test);
        assert!(config.vertex_bindings.is_empty());
    }
}
