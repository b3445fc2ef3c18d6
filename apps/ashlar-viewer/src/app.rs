//! Viewer application: ping-pong feedback pass plus present pass.

use std::sync::Arc;

use ash::vk;
use ashlar_app::{AppContext, AshlarApp, FrameContext, WindowEvent};
use ashlar_gpu::descriptors::write_combined_image_sampler;
use ashlar_gpu::{
    capture_attachment, DescriptorSetLayoutBuilder, FrameBuffer, FrameBufferDesc, GpuContext, GpuTimer,
    GraphicsPipeline, GraphicsPipelineConfig, PipelineTarget, ShaderModule,
};
use bytemuck::{Pod, Zeroable};
use tracing::{debug, error, info};
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::params::ViewerParams;

/// Offscreen color format, also what gets captured.
const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Log GPU timings every this many frames.
const TIMING_LOG_INTERVAL: u64 = 300;

/// Push constants of the feedback shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FeedbackParams {
    time: f32,
    decay: f32,
}

/// Viewer application state.
pub struct Viewer {
    gpu: Arc<GpuContext>,
    params: ViewerParams,
    frame_buffer: FrameBuffer,
    feedback_pipeline: GraphicsPipeline,
    present_pipeline: GraphicsPipeline,
    set_layout: vk::DescriptorSetLayout,
    /// Indexed by the buffer being written; samples the other buffer.
    feedback_sets: Vec<vk::DescriptorSet>,
    /// Indexed by the buffer being shown.
    present_sets: Vec<vk::DescriptorSet>,
    timer: GpuTimer,
    time: f32,
    capture_requested: bool,
}

impl AshlarApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = ViewerParams::from_args(std::env::args().skip(1));
        let gpu = Arc::clone(&ctx.gpu);
        let device = gpu.device();

        let samples = gpu.usable_sample_count(vk::SampleCountFlags::from_raw(params.samples));
        let desc = FrameBufferDesc::new(ctx.width(), ctx.height())
            .with_format(OFFSCREEN_FORMAT)
            .with_samples(samples)
            .with_clear(Some([0.0, 0.0, 0.0, 1.0]))
            .with_ping_pong(true);
        let frame_buffer = FrameBuffer::new(&gpu, desc, None)?;
        info!(
            "Offscreen buffer: {}x{}, {:?}",
            frame_buffer.extent().width,
            frame_buffer.extent().height,
            samples
        );

        let set_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .sampled_image(0, vk::ShaderStageFlags::FRAGMENT)
                .build(device)?
        };

        let vertex = ShaderModule::new(
            &gpu,
            vk::ShaderStageFlags::VERTEX,
            ashlar_shaders::fullscreen_vertex_shader(),
        )?;
        let feedback = ShaderModule::new(
            &gpu,
            vk::ShaderStageFlags::FRAGMENT,
            ashlar_shaders::feedback_fragment_shader(),
        )?;
        let present = ShaderModule::new(
            &gpu,
            vk::ShaderStageFlags::FRAGMENT,
            ashlar_shaders::present_fragment_shader(),
        )?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(std::mem::size_of::<FeedbackParams>() as u32);
        let config = GraphicsPipelineConfig::fullscreen();
        let feedback_pipeline = GraphicsPipeline::new(
            &gpu,
            PipelineTarget::from_frame_buffer(&frame_buffer),
            &vertex,
            &feedback,
            &config,
            &[set_layout],
            &[push_range],
        )?;
        let present_pipeline = GraphicsPipeline::new(
            &gpu,
            PipelineTarget::from_swapchain(ctx.swapchain()),
            &vertex,
            &present,
            &config,
            &[set_layout],
            &[],
        )?;

        let buffer_count = frame_buffer.buffers().len();
        let layouts = vec![set_layout; buffer_count * 2];
        let mut sets = unsafe { gpu.descriptor_pool().allocate(device, &layouts)? };
        let present_sets = sets.split_off(buffer_count);
        let feedback_sets = sets;

        let timer = GpuTimer::new(&gpu);

        let viewer = Self {
            gpu,
            params,
            frame_buffer,
            feedback_pipeline,
            present_pipeline,
            set_layout,
            feedback_sets,
            present_sets,
            timer,
            time: 0.0,
            capture_requested: false,
        };
        viewer.write_descriptor_sets();
        Ok(viewer)
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.time += dt;
    }

    fn render(&mut self, _ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        let scheduled = self.params.capture_frame == Some(frame.frame_number);
        if self.capture_requested || scheduled {
            self.capture_requested = false;
            self.capture_screenshot(frame.frame_number)?;
        }

        // The slot's previous submission finished before this frame began
        if frame.frame_number % TIMING_LOG_INTERVAL == 0 {
            for timing in self.timer.resolve(frame.slot)? {
                debug!("GPU {}: {:.3} ms", timing.name, timing.milliseconds);
            }
        }

        let cmd = frame.command_buffer;
        let device = self.gpu.device();
        let front = self.frame_buffer.ping_pong().front();
        let sampled = self.frame_buffer.back().output(0).map(|a| a.view());
        let push = FeedbackParams {
            time: self.time,
            decay: self.params.decay,
        };

        unsafe {
            self.timer.reset(cmd, frame.slot);
            let scope = self.timer.begin_scope(cmd, frame.slot, "feedback");

            self.frame_buffer.begin_with_inputs(cmd, sampled.as_slice())?;
            self.feedback_pipeline.bind(cmd, &[self.feedback_sets[front]]);
            device.cmd_push_constants(
                cmd,
                self.feedback_pipeline.layout(),
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_draw(cmd, 3, 1, 0, 0);
            self.frame_buffer.end(cmd);

            if let Some(scope) = scope {
                self.timer.end_scope(cmd, frame.slot, scope);
            }
        }

        Ok(())
    }

    fn draw_to_swapchain(&mut self, _ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        // end() swapped, so the freshest result is now the back buffer
        let shown = self.frame_buffer.ping_pong().back();
        unsafe {
            self.present_pipeline
                .bind(frame.command_buffer, &[self.present_sets[shown]]);
            self.gpu.device().cmd_draw(frame.command_buffer, 3, 1, 0, 0);
        }
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        self.frame_buffer.need_resize(width, height, None);
        if self.frame_buffer.resize_if_needed()? {
            self.write_descriptor_sets();
        }
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed && event.physical_key == PhysicalKey::Code(KeyCode::F12) {
                self.capture_requested = true;
                return true;
            }
        }
        false
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        let device = self.gpu.device();
        let sets: Vec<_> = self.feedback_sets.drain(..).chain(self.present_sets.drain(..)).collect();
        if let Err(e) = unsafe { self.gpu.descriptor_pool().free(device, &sets) } {
            error!("Failed to free descriptor sets: {e}");
        }
    }
}

impl Viewer {
    /// Point every descriptor set at the current attachment views.
    fn write_descriptor_sets(&self) {
        let device = self.gpu.device();
        let buffers = self.frame_buffer.buffers();
        for (index, buffer) in buffers.iter().enumerate() {
            let previous = &buffers[(index + 1) % buffers.len()];
            unsafe {
                if let Some(output) = previous.output(0) {
                    write_combined_image_sampler(device, self.feedback_sets[index], 0, output.descriptor_info());
                }
                if let Some(output) = buffer.output(0) {
                    write_combined_image_sampler(device, self.present_sets[index], 0, output.descriptor_info());
                }
            }
        }
    }

    fn capture_screenshot(&self, frame_number: u64) -> anyhow::Result<()> {
        // Capture reads the last finished result; nothing may still write to it
        self.gpu.wait_idle()?;
        let Some(output) = self.frame_buffer.back().output(0) else {
            return Ok(());
        };

        let captured = capture_attachment(&self.gpu, output)?;
        let path = self.params.output_path(frame_number);
        match image::RgbaImage::from_raw(captured.width, captured.height, captured.rgba) {
            Some(img) => match img.save(&path) {
                Ok(()) => info!("Saved screenshot to {}", path.display()),
                Err(e) => error!("Failed to save screenshot: {e}"),
            },
            None => error!("Captured pixel data does not match {}x{}", captured.width, captured.height),
        }
        Ok(())
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        unsafe {
            self.gpu
                .device()
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
