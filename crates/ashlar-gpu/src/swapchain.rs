//! Swapchain management.
//!
//! [`Swapchain`] owns the native swapchain, one view and framebuffer per
//! image, an optional shared depth attachment and the presentation render
//! pass. [`Presenter`] adds per-slot command buffers and semaphores and
//! implements [`PresentationBackend`] so a [`FramePacer`](crate::frame::FramePacer)
//! can drive it.

use crate::attachment::{depth_attachment_description, FrameBufferAttachment};
use crate::command::CommandRing;
use crate::context::{GpuContext, QueueKind};
use crate::error::{GpuError, Result};
use crate::frame::{AcquireOutcome, FrameSlot, PerFrame, PresentOutcome, PresentationBackend, IMAGE_COUNT};
use crate::framebuffer::{scissor_for, viewport_for};
use crate::render_pass::{create_render_pass, RenderPassLayout};
use crate::surface::{SurfaceContext, SurfaceProvider};
use crate::sync::FrameSemaphores;
use ash::vk;
use std::sync::Arc;

/// Swapchain options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapchainConfig {
    pub vsync: bool,
    pub use_depth: bool,
    /// Depth format; picked from the device when `None`.
    pub depth_format: Option<vk::Format>,
    pub clear_color: [f32; 4],
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            use_depth: false,
            depth_format: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR {
            return Ok(*format);
        }
    }

    // Fall back to first available
    available.first().copied().ok_or(GpuError::UnsupportedFormat {
        format: vk::Format::UNDEFINED,
        reason: "surface reports no formats",
    })
}

/// Select the best present mode.
///
/// Mailbox when available. Otherwise FIFO with vsync, or immediate without.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    if !vsync && available.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }
    // FIFO is always supported
    vk::PresentModeKHR::FIFO
}

/// The swapchain must hold exactly [`IMAGE_COUNT`] images.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> Result<u32> {
    let wanted = IMAGE_COUNT as u32;
    let min = capabilities.min_image_count;
    // 0 means no upper limit
    let max = if capabilities.max_image_count == 0 {
        u32::MAX
    } else {
        capabilities.max_image_count
    };
    if wanted < min || wanted > max {
        tracing::error!("Surface supports {min}..={max} swapchain images, need {wanted}");
        return Err(GpuError::SwapchainImageCount {
            wanted,
            min,
            max: capabilities.max_image_count,
        });
    }
    Ok(wanted)
}

/// Calculate swapchain extent.
pub fn calculate_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired_width: u32, desired_height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: desired_height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

fn present_color_description(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Swapchain wrapper.
pub struct Swapchain {
    ctx: Arc<GpuContext>,
    loader: ash::khr::swapchain::Device,
    config: SwapchainConfig,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Option<FrameBufferAttachment>,
    depth_format: Option<vk::Format>,
    render_pass: vk::RenderPass,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create the swapchain, its render pass and framebuffers.
    pub fn new(ctx: &Arc<GpuContext>, surface: &SurfaceContext, config: SwapchainConfig, width: u32, height: u32) -> Result<Self> {
        let caps = surface.capabilities()?;
        let format = select_surface_format(&caps.formats)?;
        let depth_format = if config.use_depth {
            Some(match config.depth_format {
                Some(format) => format,
                None => ctx.find_depth_format()?,
            })
        } else {
            None
        };

        let layout = RenderPassLayout::from_parts(
            &[present_color_description(format.format)],
            &[],
            depth_format.map(|f| depth_attachment_description(f, vk::SampleCountFlags::TYPE_1)),
        )?;
        let render_pass = unsafe { create_render_pass(ctx.device(), &layout)? };

        let mut swapchain = Self {
            ctx: Arc::clone(ctx),
            loader: ash::khr::swapchain::Device::new(ctx.instance(), ctx.device()),
            config,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            depth: None,
            depth_format,
            render_pass,
            format,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D { width, height },
        };
        swapchain.load(surface, width, height)?;
        swapchain.create_frame_buffers()?;
        Ok(swapchain)
    }

    /// Create the native swapchain, replacing any previous one.
    fn load(&mut self, surface: &SurfaceContext, width: u32, height: u32) -> Result<()> {
        let caps = surface.capabilities()?;
        let image_count = choose_image_count(&caps.capabilities)?;
        let present_mode = select_present_mode(&caps.present_modes, self.config.vsync);
        let extent = calculate_extent(&caps.capabilities, width, height);

        let queue_families = [self.ctx.graphics_queue_family()];
        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?
        };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        let images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        if images.len() != IMAGE_COUNT {
            return Err(GpuError::SwapchainImageCount {
                wanted: IMAGE_COUNT as u32,
                min: images.len() as u32,
                max: images.len() as u32,
            });
        }
        self.images = images;
        self.present_mode = present_mode;
        self.extent = extent;

        tracing::info!(
            "Swapchain {}x{} {:?} {:?}, {} images",
            extent.width,
            extent.height,
            self.format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// One view and framebuffer per image, plus the shared depth attachment.
    fn create_frame_buffers(&mut self) -> Result<()> {
        let device = self.ctx.device();

        self.depth = match self.depth_format {
            Some(format) => Some(FrameBufferAttachment::init_depth(
                &self.ctx,
                self.extent,
                format,
                vk::SampleCountFlags::TYPE_1,
            )?),
            None => None,
        };

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(crate::layout::subresource_range(self.format.format, 0, 1, 1));
            let view = unsafe { device.create_image_view(&view_info, None)? };
            self.image_views.push(view);

            let mut attachments = vec![view];
            attachments.extend(self.depth.as_ref().map(FrameBufferAttachment::render_view));
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None)? };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn destroy_frame_buffers(&mut self) {
        let device = self.ctx.device();
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
        }
        self.depth = None;
    }

    /// Recreate for a new size. The device must be idle.
    pub fn recreate(&mut self, surface: &SurfaceContext, width: u32, height: u32) -> Result<()> {
        self.destroy_frame_buffers();
        self.load(surface, width, height)?;
        self.create_frame_buffers()
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn has_depth(&self) -> bool {
        self.depth_format.is_some()
    }

    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.images.get(index as usize).copied()
    }

    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).copied()
    }

    /// Acquire the next image, signaling `semaphore`.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(crate::error::check_device_lost(e, "acquire")),
        }
    }

    /// Present an image after `wait_semaphores`.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present(&self, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.ctx.graphics_queue();
        let result = self
            .ctx
            .with_submit_lock(|| unsafe { self.loader.queue_present(queue, &present_info) });
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(crate::error::check_device_lost(e, "present")),
        }
    }

    /// Set viewport/scissor and begin the presentation render pass on `image_index`.
    ///
    /// # Safety
    /// `cmd` must be recording and outside a render pass.
    pub unsafe fn begin_render_pass(&self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let framebuffer = self
            .framebuffer(image_index)
            .ok_or_else(|| GpuError::OutOfRange(format!("swapchain image {image_index}")))?;
        let device = self.ctx.device();

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.clear_color,
            },
        }];
        if self.depth.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }

        device.cmd_set_viewport(cmd, 0, &[viewport_for(self.extent)]);
        device.cmd_set_scissor(cmd, 0, &[scissor_for(self.extent)]);
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(scissor_for(self.extent))
            .clear_values(&clear_values);
        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_frame_buffers();
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
            self.ctx.device().destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Swapchain plus the per-slot resources needed to present frames.
pub struct Presenter {
    ctx: Arc<GpuContext>,
    commands: CommandRing,
    semaphores: PerFrame<FrameSemaphores>,
    swapchain: Swapchain,
    surface: SurfaceContext,
    desired_extent: vk::Extent2D,
}

impl Presenter {
    pub fn new(ctx: &Arc<GpuContext>, provider: &dyn SurfaceProvider, config: SwapchainConfig) -> Result<Self> {
        let surface = SurfaceContext::new(ctx, provider)?;
        let (width, height) = provider.framebuffer_size();
        let swapchain = Swapchain::new(ctx, &surface, config, width, height)?;
        let commands = CommandRing::new(Arc::clone(ctx), QueueKind::Graphics)?;
        let semaphores = PerFrame::try_from_fn(|_| unsafe { FrameSemaphores::new(ctx.device()) })?;

        Ok(Self {
            ctx: Arc::clone(ctx),
            commands,
            semaphores,
            swapchain,
            surface,
            desired_extent: vk::Extent2D { width, height },
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Command buffer of a slot, recording between `begin_frame` and `end_frame`.
    pub fn command_buffer(&self, slot: FrameSlot) -> vk::CommandBuffer {
        self.commands.command_buffer(slot)
    }

    /// Size to use at the next resize, for surfaces without a fixed extent.
    pub fn set_desired_extent(&mut self, width: u32, height: u32) {
        self.desired_extent = vk::Extent2D { width, height };
    }
}

impl PresentationBackend for Presenter {
    fn wait_fence(&mut self, slot: FrameSlot) -> Result<()> {
        self.commands.wait(slot)
    }

    fn acquire(&mut self, slot: FrameSlot) -> Result<AcquireOutcome> {
        self.swapchain.acquire_next_image(self.semaphores[slot].image_available)
    }

    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()> {
        self.commands.reset_fence(slot)
    }

    fn begin_commands(&mut self, slot: FrameSlot) -> Result<()> {
        self.commands.begin(slot).map(|_| ())
    }

    fn submit(&mut self, slot: FrameSlot, _image_index: u32) -> Result<()> {
        let semaphores = &self.semaphores[slot];
        self.commands.submit(
            slot,
            &[(semaphores.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)],
            &[semaphores.render_finished],
        )
    }

    fn present(&mut self, slot: FrameSlot, image_index: u32) -> Result<PresentOutcome> {
        self.swapchain
            .present(image_index, &[self.semaphores[slot].render_finished])
    }

    fn resize(&mut self) -> Result<()> {
        self.ctx.wait_idle()?;
        let caps = self.surface.capabilities()?;
        let extent = calculate_extent(&caps.capabilities, self.desired_extent.width, self.desired_extent.height);
        if extent.width == 0 || extent.height == 0 {
            tracing::debug!("Surface has zero extent, keeping the current swapchain");
            return Ok(());
        }
        self.swapchain.recreate(&self.surface, extent.width, extent.height)
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            tracing::warn!("Wait idle before presenter teardown failed: {e}");
        }
        for semaphores in self.semaphores.iter() {
            unsafe { semaphores.destroy(self.ctx.device()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_must_be_exact() {
        assert_eq!(choose_image_count(&caps(2, 8)).unwrap(), IMAGE_COUNT as u32);
        assert_eq!(choose_image_count(&caps(3, 0)).unwrap(), IMAGE_COUNT as u32);
        assert!(matches!(
            choose_image_count(&caps(4, 8)),
            Err(GpuError::SwapchainImageCount { wanted: 3, min: 4, max: 8 })
        ));
        assert!(choose_image_count(&caps(1, 2)).unwrap_err().is_fatal());
    }

    #[test]
    fn present_mode_preference() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(select_surface_format(&[unorm, srgb]).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(select_surface_format(&[unorm]).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(calculate_extent(&c, 1, 1), vk::Extent2D { width: 800, height: 600 });

        c.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        c.min_image_extent = vk::Extent2D { width: 16, height: 16 };
        c.max_image_extent = vk::Extent2D { width: 1024, height: 1024 };
        assert_eq!(calculate_extent(&c, 4000, 8), vk::Extent2D { width: 1024, height: 16 });
    }

    #[test]
    fn presentation_pass_ends_in_present_layout() {
        let desc = present_color_description(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(desc.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.load_op, vk::AttachmentLoadOp::CLEAR);
    }
}
