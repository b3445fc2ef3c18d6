//! Compute targets.
//!
//! [`ComputeBuffer`] mirrors [`FrameBuffer`](crate::framebuffer::FrameBuffer)
//! for storage images: one or two sets of targets in `GENERAL` layout, with
//! the same front/back swapping and two-phase resize, but no render pass.

use crate::attachment::clamp_attachment_size;
use crate::context::GpuContext;
use crate::error::Result;
use crate::framebuffer::{check_feedback, validate_color_count, PingPong, ResizeRequest};
use crate::image::{create_compute_target_2d, create_sampler, ImageObject};
use crate::layout::{image_barrier, TransitionMasks};
use ash::vk;
use std::sync::Arc;

/// Parameters of a compute buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeBufferDesc {
    pub width: u32,
    pub height: u32,
    pub count: u32,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub ping_pong: bool,
}

impl ComputeBufferDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            count: 1,
            format: vk::Format::R32G32B32A32_SFLOAT,
            mip_levels: 1,
            ping_pong: false,
        }
    }

    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_ping_pong(mut self, enabled: bool) -> Self {
        self.ping_pong = enabled;
        self
    }

    pub fn validate(&self) -> Result<vk::Extent2D> {
        validate_color_count(self.count)?;
        clamp_attachment_size(self.width, self.height)
    }
}

/// Workgroup counts covering `extent` with `local_size` invocations per group.
pub fn group_count(extent: vk::Extent2D, local_size: [u32; 2]) -> [u32; 2] {
    [
        extent.width.div_ceil(local_size[0].max(1)),
        extent.height.div_ceil(local_size[1].max(1)),
    ]
}

/// One storage image with its view and sampler.
pub struct ComputeTarget {
    ctx: Arc<GpuContext>,
    image: ImageObject,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl ComputeTarget {
    fn new(ctx: &Arc<GpuContext>, extent: vk::Extent2D, desc: &ComputeBufferDesc) -> Result<Self> {
        let image = create_compute_target_2d(ctx, extent, desc.format, desc.mip_levels.max(1), "compute target")?;
        let view = image.create_view(vk::ImageViewType::TYPE_2D)?;
        let sampler = match create_sampler(ctx, vk::Filter::LINEAR, image.mip_levels()) {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { ctx.device().destroy_image_view(view, None) };
                return Err(e);
            }
        };
        Ok(Self {
            ctx: Arc::clone(ctx),
            image,
            view,
            sampler,
        })
    }

    pub fn image(&self) -> &ImageObject {
        &self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Descriptor for writing the target as a storage image.
    pub fn storage_descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .image_view(self.view)
            .image_layout(vk::ImageLayout::GENERAL)
    }

    /// Descriptor for sampling the target.
    pub fn sampled_descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.view)
            .image_layout(vk::ImageLayout::GENERAL)
    }
}

impl Drop for ComputeTarget {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_sampler(self.sampler, None);
            self.ctx.device().destroy_image_view(self.view, None);
        }
    }
}

fn build_sets(
    ctx: &Arc<GpuContext>,
    desc: &ComputeBufferDesc,
    extent: vk::Extent2D,
    ping_pong: PingPong,
) -> Result<Vec<Vec<ComputeTarget>>> {
    (0..ping_pong.buffer_count())
        .map(|_| {
            (0..desc.count)
                .map(|_| ComputeTarget::new(ctx, extent, desc))
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// One or two sets of compute targets.
pub struct ComputeBuffer {
    ctx: Arc<GpuContext>,
    desc: ComputeBufferDesc,
    extent: vk::Extent2D,
    sets: Vec<Vec<ComputeTarget>>,
    ping_pong: PingPong,
    resize: ResizeRequest,
}

impl ComputeBuffer {
    pub fn new(ctx: &Arc<GpuContext>, desc: ComputeBufferDesc) -> Result<Self> {
        let extent = desc.validate()?;
        let ping_pong = PingPong::new(desc.ping_pong);
        let sets = build_sets(ctx, &desc, extent, ping_pong)?;
        tracing::debug!(
            "Created compute buffer {}x{} with {} targets per set",
            extent.width,
            extent.height,
            desc.count
        );
        Ok(Self {
            ctx: Arc::clone(ctx),
            desc,
            extent,
            sets,
            ping_pong,
            resize: ResizeRequest::default(),
        })
    }

    pub fn desc(&self) -> &ComputeBufferDesc {
        &self.desc
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn ping_pong(&self) -> PingPong {
        self.ping_pong
    }

    /// Targets written this frame.
    pub fn front(&self) -> &[ComputeTarget] {
        &self.sets[self.ping_pong.front()]
    }

    /// Targets read this frame.
    pub fn back(&self) -> &[ComputeTarget] {
        &self.sets[self.ping_pong.back()]
    }

    /// Workgroup counts for a dispatch covering the targets.
    pub fn group_count(&self, local_size: [u32; 2]) -> [u32; 2] {
        group_count(self.extent, local_size)
    }

    /// Check that no view in `sampled` is one of the front targets.
    pub fn check_inputs(&self, sampled: &[vk::ImageView]) -> Result<()> {
        let written: Vec<vk::ImageView> = self.front().iter().map(ComputeTarget::view).collect();
        check_feedback(&written, sampled)
    }

    /// Make the front targets' writes visible to later reads, then swap.
    ///
    /// # Safety
    /// `cmd` must be recording, after the dispatch writing the front targets.
    pub unsafe fn end(&mut self, cmd: vk::CommandBuffer) {
        let masks = TransitionMasks {
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::TRANSFER,
        };
        for target in self.front() {
            image_barrier(
                self.ctx.device(),
                cmd,
                target.image().handle(),
                target.image().full_range(),
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::GENERAL,
                masks,
            );
        }
        self.swap();
    }

    pub fn swap(&mut self) {
        self.ping_pong.swap();
    }

    /// Record a resize to apply at the next [`resize_if_needed`](Self::resize_if_needed).
    pub fn need_resize(&mut self, width: u32, height: u32, count: Option<u32>) {
        self.resize.request(width, height, count);
    }

    /// Apply a pending resize between frames. `Ok(false)` when nothing is pending.
    pub fn resize_if_needed(&mut self) -> Result<bool> {
        let Some(pending) = self.resize.take() else {
            return Ok(false);
        };

        let mut desc = self.desc;
        desc.width = pending.width;
        desc.height = pending.height;
        if let Some(count) = pending.color_count {
            desc.count = count;
        }
        let extent = desc.validate()?;
        self.sets = build_sets(&self.ctx, &desc, extent, self.ping_pong)?;
        self.desc = desc;
        self.extent = extent;
        self.ping_pong.reset();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_round_up() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1081,
        };
        assert_eq!(group_count(extent, [16, 16]), [120, 68]);
        assert_eq!(group_count(extent, [0, 1]), [1920, 1081]);
    }

    #[test]
    fn desc_validation() {
        assert!(ComputeBufferDesc::new(64, 64).validate().is_ok());
        assert!(ComputeBufferDesc::new(64, 0).validate().is_err());
        assert!(ComputeBufferDesc::new(64, 64).with_count(0).validate().is_err());
    }
}
