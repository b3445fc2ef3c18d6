//! Frame buffers.
//!
//! A [`LogicalFrameBuffer`] is one native framebuffer with its attachments.
//! A [`FrameBuffer`] composes one of them, or two in ping-pong mode, around a
//! shared render pass. In ping-pong mode a pass renders into the front buffer
//! while sampling the back buffer, and [`FrameBuffer::end`] swaps them.

use crate::attachment::{clamp_attachment_size, sampled_layout, AttachmentKind, FrameBufferAttachment};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::layout::{image_barrier, TransitionMasks};
use crate::render_pass::{create_render_pass, expected_attachment_count, RenderPassLayout};
use ash::vk;
use std::sync::Arc;

/// Most color attachments a frame buffer can have.
pub const MAX_COLOR_BUFFERS: u32 = 8;

/// Parameters of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameBufferDesc {
    pub width: u32,
    pub height: u32,
    pub color_count: u32,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub use_depth: bool,
    pub depth_format: vk::Format,
    pub mip_levels: u32,
    pub needs_clear: bool,
    pub clear_color: [f32; 4],
    pub ping_pong: bool,
}

impl Default for FrameBufferDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            color_count: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            use_depth: false,
            depth_format: vk::Format::D32_SFLOAT,
            mip_levels: 1,
            needs_clear: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            ping_pong: false,
        }
    }
}

impl FrameBufferDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_color_count(mut self, count: u32) -> Self {
        self.color_count = count;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[must_use]
    pub fn with_depth(mut self, format: vk::Format) -> Self {
        self.use_depth = true;
        self.depth_format = format;
        self
    }

    #[must_use]
    pub fn with_clear(mut self, clear_color: Option<[f32; 4]>) -> Self {
        self.needs_clear = clear_color.is_some();
        if let Some(color) = clear_color {
            self.clear_color = color;
        }
        self
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[must_use]
    pub fn with_ping_pong(mut self, enabled: bool) -> Self {
        self.ping_pong = enabled;
        self
    }

    /// Check the color count, mip levels and size without creating anything.
    pub fn validate(&self) -> Result<vk::Extent2D> {
        validate_color_count(self.color_count)?;
        if self.samples != vk::SampleCountFlags::TYPE_1 && self.mip_levels > 1 {
            tracing::error!("Multisampled frame buffer cannot have {} mip levels", self.mip_levels);
            return Err(GpuError::InvalidState(format!(
                "multisampled frame buffer with {} mip levels",
                self.mip_levels
            )));
        }
        clamp_attachment_size(self.width, self.height)
    }
}

pub(crate) fn validate_color_count(count: u32) -> Result<()> {
    if count == 0 || count > MAX_COLOR_BUFFERS {
        tracing::error!("Frame buffer color count {count} outside 1..={MAX_COLOR_BUFFERS}");
        return Err(GpuError::InvalidBufferCount {
            count,
            max: MAX_COLOR_BUFFERS,
        });
    }
    Ok(())
}

/// Front/back selection for double-buffered resources.
///
/// When disabled, front and back are both 0. When enabled they are always
/// different.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    enabled: bool,
    front: usize,
}

impl PingPong {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, front: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of buffers to create.
    pub fn buffer_count(&self) -> usize {
        if self.enabled {
            2
        } else {
            1
        }
    }

    /// Index written this frame.
    pub fn front(&self) -> usize {
        self.front
    }

    /// Index read this frame.
    pub fn back(&self) -> usize {
        if self.enabled {
            1 - self.front
        } else {
            self.front
        }
    }

    /// Flip front and back; no-op when disabled.
    pub fn swap(&mut self) {
        if self.enabled {
            self.front = 1 - self.front;
        }
    }

    pub fn reset(&mut self) {
        self.front = 0;
    }
}

/// A pending resize, applied between frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeRequest {
    pending: Option<PendingResize>,
}

/// Target of a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResize {
    pub width: u32,
    pub height: u32,
    pub color_count: Option<u32>,
}

impl ResizeRequest {
    /// Record a request, replacing any earlier one.
    pub fn request(&mut self, width: u32, height: u32, color_count: Option<u32>) {
        self.pending = Some(PendingResize {
            width,
            height,
            color_count,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn peek(&self) -> Option<PendingResize> {
        self.pending
    }

    /// Clear and return the pending request.
    pub fn take(&mut self) -> Option<PendingResize> {
        self.pending.take()
    }
}

/// Fail with [`GpuError::FeedbackHazard`] if a sampled view is also written.
pub fn check_feedback(written: &[vk::ImageView], sampled: &[vk::ImageView]) -> Result<()> {
    match sampled.iter().find(|view| written.contains(view)) {
        Some(view) => Err(GpuError::FeedbackHazard(*view)),
        None => Ok(()),
    }
}

/// One native framebuffer and its attachments, ordered color, resolve, depth.
pub struct LogicalFrameBuffer {
    ctx: Arc<GpuContext>,
    attachments: Vec<FrameBufferAttachment>,
    color_count: usize,
    resolve_count: usize,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl LogicalFrameBuffer {
    /// Build the attachments and framebuffer.
    ///
    /// Creates a render pass unless `render_pass` is given; a created pass is
    /// returned alongside and owned by the caller. On error everything created
    /// so far is released.
    pub fn init(
        ctx: &Arc<GpuContext>,
        desc: &FrameBufferDesc,
        render_pass: Option<vk::RenderPass>,
    ) -> Result<(Self, Option<vk::RenderPass>)> {
        let extent = desc.validate()?;
        let samples = ctx.usable_sample_count(desc.samples);
        let multisampled = samples != vk::SampleCountFlags::TYPE_1;
        let color_count = desc.color_count as usize;

        let mut attachments = Vec::with_capacity(expected_attachment_count(color_count, samples, desc.use_depth));
        for _ in 0..color_count {
            attachments.push(FrameBufferAttachment::init_color_2d(
                ctx,
                extent,
                desc.format,
                desc.mip_levels,
                desc.needs_clear,
                samples,
            )?);
        }
        if multisampled {
            for _ in 0..color_count {
                attachments.push(FrameBufferAttachment::init_resolve(ctx, extent, desc.format)?);
            }
        }
        if desc.use_depth {
            attachments.push(FrameBufferAttachment::init_depth(ctx, extent, desc.depth_format, samples)?);
        }

        // Outputs must be sampleable before their first pass, e.g. as the back buffer
        let output_kind = if multisampled {
            AttachmentKind::Resolve
        } else {
            AttachmentKind::Color
        };
        for output in attachments.iter().filter(|a| a.kind() == output_kind) {
            output
                .image()
                .transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        }

        let resolve_count = if multisampled { color_count } else { 0 };
        let descriptions: Vec<vk::AttachmentDescription> =
            attachments.iter().map(FrameBufferAttachment::description).collect();
        let layout = RenderPassLayout::from_parts(
            &descriptions[..color_count],
            &descriptions[color_count..color_count + resolve_count],
            desc.use_depth.then(|| descriptions[color_count + resolve_count]),
        )?;

        let views: Vec<vk::ImageView> = attachments.iter().map(FrameBufferAttachment::render_view).collect();
        debug_assert_eq!(views.len(), layout.attachment_count());

        let (render_pass, created) = match render_pass {
            Some(pass) => (pass, None),
            None => {
                let pass = unsafe { create_render_pass(ctx.device(), &layout)? };
                (pass, Some(pass))
            }
        };

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = match unsafe { ctx.device().create_framebuffer(&create_info, None) } {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                if let Some(pass) = created {
                    unsafe { ctx.device().destroy_render_pass(pass, None) };
                }
                return Err(e.into());
            }
        };

        tracing::debug!(
            "Created frame buffer {}x{} with {} attachments",
            extent.width,
            extent.height,
            views.len()
        );

        Ok((
            Self {
                ctx: Arc::clone(ctx),
                attachments,
                color_count,
                resolve_count,
                framebuffer,
                extent,
            },
            created,
        ))
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// All attachments in render pass order.
    pub fn attachments(&self) -> &[FrameBufferAttachment] {
        &self.attachments
    }

    pub fn color_attachments(&self) -> &[FrameBufferAttachment] {
        &self.attachments[..self.color_count]
    }

    pub fn resolve_attachments(&self) -> &[FrameBufferAttachment] {
        &self.attachments[self.color_count..self.color_count + self.resolve_count]
    }

    pub fn depth_attachment(&self) -> Option<&FrameBufferAttachment> {
        self.attachments
            .get(self.color_count + self.resolve_count)
            .filter(|a| a.kind() == AttachmentKind::Depth)
    }

    /// The single-sample result of color target `index`: its resolve target
    /// when multisampled, otherwise the color attachment itself.
    pub fn output(&self, index: usize) -> Option<&FrameBufferAttachment> {
        if self.resolve_count > 0 {
            self.resolve_attachments().get(index)
        } else {
            self.color_attachments().get(index)
        }
    }

    /// Every view of the attachments, sampled and rendered.
    pub fn views(&self) -> Vec<vk::ImageView> {
        let mut views = Vec::with_capacity(self.attachments.len() * 2);
        for attachment in &self.attachments {
            views.push(attachment.view());
            if attachment.render_view() != attachment.view() {
                views.push(attachment.render_view());
            }
        }
        views
    }

    /// Clear values in attachment order.
    pub fn clear_values(&self, clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.attachments
            .iter()
            .map(|a| match a.kind() {
                AttachmentKind::Depth => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
                AttachmentKind::Color | AttachmentKind::Resolve => vk::ClearValue {
                    color: vk::ClearColorValue { float32: clear_color },
                },
            })
            .collect()
    }

    /// Move single-sample outputs and depth into their sampled layouts.
    ///
    /// Only level 0 is rendered; higher levels stay in the sampled layout.
    ///
    /// # Safety
    /// `cmd` must be recording, outside a render pass, after this buffer's pass.
    pub unsafe fn record_sampled_transition(&self, cmd: vk::CommandBuffer) {
        let outputs = (0..self.color_count).filter_map(|i| self.output(i));
        for attachment in outputs.chain(self.depth_attachment()) {
            let (old, masks) = match attachment.kind() {
                AttachmentKind::Depth => (
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    TransitionMasks {
                        src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        dst_access: vk::AccessFlags::SHADER_READ,
                        src_stage: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER
                            | vk::PipelineStageFlags::COMPUTE_SHADER,
                    },
                ),
                AttachmentKind::Color | AttachmentKind::Resolve => (
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    TransitionMasks {
                        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                        dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ,
                        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER
                            | vk::PipelineStageFlags::COMPUTE_SHADER
                            | vk::PipelineStageFlags::TRANSFER,
                    },
                ),
            };
            image_barrier(
                self.ctx.device(),
                cmd,
                attachment.image().handle(),
                attachment.image().level_range(0),
                old,
                sampled_layout(attachment.kind()),
                masks,
            );
        }
    }
}

impl Drop for LogicalFrameBuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_framebuffer(self.framebuffer, None) };
    }
}

/// Who destroys the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderPassHandle {
    Owned(vk::RenderPass),
    External(vk::RenderPass),
}

impl RenderPassHandle {
    fn raw(self) -> vk::RenderPass {
        match self {
            Self::Owned(pass) | Self::External(pass) => pass,
        }
    }
}

/// Build the logical buffers for `desc`, sharing one render pass.
fn build_buffers(
    ctx: &Arc<GpuContext>,
    desc: &FrameBufferDesc,
    ping_pong: PingPong,
    external: Option<vk::RenderPass>,
) -> Result<(Vec<LogicalFrameBuffer>, RenderPassHandle)> {
    let (first, created) = LogicalFrameBuffer::init(ctx, desc, external)?;
    let handle = match (created, external) {
        (Some(pass), _) => RenderPassHandle::Owned(pass),
        (None, Some(pass)) => RenderPassHandle::External(pass),
        (None, None) => return Err(GpuError::InvalidState("no render pass".to_string())),
    };

    let mut buffers = vec![first];
    while buffers.len() < ping_pong.buffer_count() {
        match LogicalFrameBuffer::init(ctx, desc, Some(handle.raw())) {
            Ok((buffer, _)) => buffers.push(buffer),
            Err(e) => {
                drop(buffers);
                if let RenderPassHandle::Owned(pass) = handle {
                    unsafe { ctx.device().destroy_render_pass(pass, None) };
                }
                return Err(e);
            }
        }
    }
    Ok((buffers, handle))
}

/// A render target made of one or two logical frame buffers.
///
/// Resizing is two-phase: [`need_resize`](Self::need_resize) records the
/// request at any time and [`resize_if_needed`](Self::resize_if_needed)
/// applies it. The owner must only call the latter between frames, when no
/// submitted command buffer references the old framebuffers.
pub struct FrameBuffer {
    ctx: Arc<GpuContext>,
    desc: FrameBufferDesc,
    buffers: Vec<LogicalFrameBuffer>,
    render_pass: RenderPassHandle,
    ping_pong: PingPong,
    resize: ResizeRequest,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
}

impl FrameBuffer {
    /// Create the frame buffers, and a render pass unless `external_render_pass` is given.
    ///
    /// An external render pass must be compatible with `desc` and outlive this
    /// object; it is never destroyed here.
    pub fn new(
        ctx: &Arc<GpuContext>,
        desc: FrameBufferDesc,
        external_render_pass: Option<vk::RenderPass>,
    ) -> Result<Self> {
        let extent = desc.validate()?;
        let ping_pong = PingPong::new(desc.ping_pong);
        let (buffers, render_pass) = build_buffers(ctx, &desc, ping_pong, external_render_pass)?;

        Ok(Self {
            ctx: Arc::clone(ctx),
            desc,
            buffers,
            render_pass,
            ping_pong,
            resize: ResizeRequest::default(),
            viewport: viewport_for(extent),
            scissor: scissor_for(extent),
        })
    }

    pub fn desc(&self) -> &FrameBufferDesc {
        &self.desc
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    /// Whether the render pass was supplied by the caller.
    pub fn has_external_render_pass(&self) -> bool {
        matches!(self.render_pass, RenderPassHandle::External(_))
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.scissor.extent
    }

    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
    }

    pub fn scissor(&self) -> vk::Rect2D {
        self.scissor
    }

    pub fn ping_pong(&self) -> PingPong {
        self.ping_pong
    }

    /// Buffer written by the next pass.
    pub fn front(&self) -> &LogicalFrameBuffer {
        &self.buffers[self.ping_pong.front()]
    }

    /// Buffer holding the previous pass's result. Same as front without ping-pong.
    pub fn back(&self) -> &LogicalFrameBuffer {
        &self.buffers[self.ping_pong.back()]
    }

    pub fn buffers(&self) -> &[LogicalFrameBuffer] {
        &self.buffers
    }

    /// Set the dynamic viewport and scissor and begin the render pass on the front buffer.
    ///
    /// Without ping-pong, reading this buffer's own outputs in the pass is
    /// feedback the caller must guard with barriers; use
    /// [`begin_with_inputs`](Self::begin_with_inputs) to have that checked.
    ///
    /// # Safety
    /// `cmd` must be recording and outside a render pass.
    pub unsafe fn begin(&self, cmd: vk::CommandBuffer) {
        let device = self.ctx.device();
        let front = self.front();
        let clear_values = front.clear_values(self.desc.clear_color);

        device.cmd_set_viewport(cmd, 0, &[self.viewport]);
        device.cmd_set_scissor(cmd, 0, &[self.scissor]);

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass.raw())
            .framebuffer(front.framebuffer())
            .render_area(self.scissor)
            .clear_values(&clear_values);
        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
    }

    /// [`begin`](Self::begin), after checking that no view in `sampled` is written by this pass.
    ///
    /// # Safety
    /// As for [`begin`](Self::begin).
    pub unsafe fn begin_with_inputs(&self, cmd: vk::CommandBuffer, sampled: &[vk::ImageView]) -> Result<()> {
        check_feedback(&self.front().views(), sampled)?;
        self.begin(cmd);
        Ok(())
    }

    /// End the render pass, make the outputs sampleable, and swap.
    ///
    /// # Safety
    /// `cmd` must be inside the render pass started by [`begin`](Self::begin).
    pub unsafe fn end(&mut self, cmd: vk::CommandBuffer) {
        self.ctx.device().cmd_end_render_pass(cmd);
        self.front().record_sampled_transition(cmd);
        self.swap();
    }

    /// Flip front and back in ping-pong mode.
    pub fn swap(&mut self) {
        self.ping_pong.swap();
    }

    /// Record a resize to apply at the next [`resize_if_needed`](Self::resize_if_needed).
    pub fn need_resize(&mut self, width: u32, height: u32, color_count: Option<u32>) {
        self.resize.request(width, height, color_count);
    }

    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    /// Apply a pending resize.
    ///
    /// Returns `Ok(false)` when nothing is pending. On error the current
    /// buffers are kept and the request is dropped.
    pub fn resize_if_needed(&mut self) -> Result<bool> {
        let Some(pending) = self.resize.take() else {
            return Ok(false);
        };

        let mut desc = self.desc;
        desc.width = pending.width;
        desc.height = pending.height;
        if let Some(count) = pending.color_count {
            desc.color_count = count;
        }
        let extent = desc.validate()?;

        let external = match self.render_pass {
            RenderPassHandle::External(pass) => Some(pass),
            RenderPassHandle::Owned(_) => None,
        };
        let (buffers, render_pass) = build_buffers(&self.ctx, &desc, self.ping_pong, external)?;

        let old_pass = std::mem::replace(&mut self.render_pass, render_pass);
        self.buffers = buffers;
        if let RenderPassHandle::Owned(pass) = old_pass {
            unsafe { self.ctx.device().destroy_render_pass(pass, None) };
        }

        self.desc = desc;
        self.ping_pong.reset();
        self.viewport = viewport_for(extent);
        self.scissor = scissor_for(extent);
        tracing::debug!("Frame buffer resized to {}x{}", extent.width, extent.height);
        Ok(true)
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.buffers.clear();
        if let RenderPassHandle::Owned(pass) = self.render_pass {
            unsafe { self.ctx.device().destroy_render_pass(pass, None) };
        }
    }
}

pub(crate) fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub(crate) fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn ping_pong_never_aliases() {
        let mut pp = PingPong::new(true);
        for _ in 0..10 {
            assert_ne!(pp.front(), pp.back());
            assert_eq!(pp.front(), 1 - pp.back());
            pp.swap();
        }
    }

    #[test]
    fn single_buffer_front_is_back() {
        let mut pp = PingPong::new(false);
        for _ in 0..4 {
            assert_eq!(pp.front(), 0);
            assert_eq!(pp.back(), 0);
            pp.swap();
        }
        assert_eq!(pp.buffer_count(), 1);
    }

    #[test]
    fn swap_alternates() {
        let mut pp = PingPong::new(true);
        let fronts: Vec<usize> = (0..4)
            .map(|_| {
                let f = pp.front();
                pp.swap();
                f
            })
            .collect();
        assert_eq!(fronts, vec![0, 1, 0, 1]);
        pp.reset();
        assert_eq!(pp.front(), 0);
    }

    #[test]
    fn resize_request_is_consumed_once() {
        let mut request = ResizeRequest::default();
        assert!(request.take().is_none());

        request.request(640, 480, None);
        request.request(800, 600, Some(2));
        assert_eq!(
            request.take(),
            Some(PendingResize {
                width: 800,
                height: 600,
                color_count: Some(2)
            })
        );
        assert!(request.take().is_none());
        assert!(!request.is_pending());
    }

    #[test]
    fn color_count_bounds() {
        assert!(validate_color_count(1).is_ok());
        assert!(validate_color_count(MAX_COLOR_BUFFERS).is_ok());
        assert!(matches!(
            validate_color_count(0),
            Err(GpuError::InvalidBufferCount { count: 0, .. })
        ));
        assert!(validate_color_count(9).is_err());
    }

    #[test]
    fn desc_validation_rejects_degenerate_sizes() {
        assert!(FrameBufferDesc::new(0, 10).validate().is_err());
        let extent = FrameBufferDesc::new(10_000, 20).validate().unwrap();
        assert_eq!((extent.width, extent.height), (8192, 20));
        assert!(FrameBufferDesc::new(4, 4).with_color_count(9).validate().is_err());
    }

    #[test]
    fn multisampled_targets_have_one_mip_level() {
        let msaa = FrameBufferDesc::new(64, 64).with_samples(vk::SampleCountFlags::TYPE_4);
        assert!(msaa.validate().is_ok());
        assert!(matches!(
            msaa.with_mip_levels(4).validate(),
            Err(GpuError::InvalidState(_))
        ));
        assert!(FrameBufferDesc::new(64, 64).with_mip_levels(4).validate().is_ok());
    }

    #[test]
    fn feedback_is_detected() {
        let a = vk::ImageView::from_raw(1);
        let b = vk::ImageView::from_raw(2);
        let c = vk::ImageView::from_raw(3);

        assert!(check_feedback(&[a, b], &[c]).is_ok());
        assert!(check_feedback(&[a], &[]).is_ok());
        assert!(matches!(
            check_feedback(&[a, b], &[c, b]),
            Err(GpuError::FeedbackHazard(v)) if v == b
        ));
    }

    #[test]
    fn viewport_covers_extent() {
        let extent = vk::Extent2D {
            width: 320,
            height: 200,
        };
        let viewport = viewport_for(extent);
        assert_eq!((viewport.width, viewport.height), (320.0, 200.0));
        assert_eq!(scissor_for(extent).extent, extent);
    }
}
