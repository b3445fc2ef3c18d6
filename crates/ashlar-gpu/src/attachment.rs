//! Frame buffer attachments.
//!
//! A [`FrameBufferAttachment`] bundles one image with its view, sampler,
//! descriptor info and the [`vk::AttachmentDescription`] used when building a
//! render pass around it. The sampled view covers the image's full mip range;
//! the framebuffer binds a view of level 0 only.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::image::{create_color_attachment_2d, create_depth_attachment, create_sampler, ImageObject};
use ash::vk;
use std::sync::Arc;

/// Largest attachment dimension.
pub const MAX_ATTACHMENT_SIZE: u32 = 8192;

/// Role of an attachment inside a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Color,
    Resolve,
    Depth,
}

/// Validate and clamp a requested attachment size.
///
/// Zero dimensions are rejected; larger ones are clamped to
/// [`MAX_ATTACHMENT_SIZE`].
pub fn clamp_attachment_size(width: u32, height: u32) -> Result<vk::Extent2D> {
    if width == 0 || height == 0 {
        return Err(GpuError::InvalidSize { width, height });
    }
    Ok(vk::Extent2D {
        width: width.min(MAX_ATTACHMENT_SIZE),
        height: height.min(MAX_ATTACHMENT_SIZE),
    })
}

fn is_multisampled(samples: vk::SampleCountFlags) -> bool {
    samples != vk::SampleCountFlags::TYPE_1
}

/// Mip levels a color attachment is created with: at least one, and exactly one when multisampled.
pub fn attachment_mip_levels(requested: u32, samples: vk::SampleCountFlags) -> u32 {
    if is_multisampled(samples) {
        1
    } else {
        requested.max(1)
    }
}

/// Render pass description of a color attachment.
///
/// Load is `CLEAR` when a clear is requested, otherwise `DONT_CARE` for
/// multisampled targets and `LOAD` for single-sampled ones. Multisampled
/// targets are resolved elsewhere and are not stored. A `LOAD` target's initial
/// layout is `SHADER_READ_ONLY_OPTIMAL`, where frame buffers leave their
/// outputs, so its previous contents survive.
pub fn color_attachment_description(
    format: vk::Format,
    samples: vk::SampleCountFlags,
    needs_clear: bool,
) -> vk::AttachmentDescription {
    let load_op = if needs_clear {
        vk::AttachmentLoadOp::CLEAR
    } else if is_multisampled(samples) {
        vk::AttachmentLoadOp::DONT_CARE
    } else {
        vk::AttachmentLoadOp::LOAD
    };
    let store_op = if is_multisampled(samples) {
        vk::AttachmentStoreOp::DONT_CARE
    } else {
        vk::AttachmentStoreOp::STORE
    };
    let initial_layout = if load_op == vk::AttachmentLoadOp::LOAD {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::UNDEFINED
    };

    vk::AttachmentDescription::default()
        .format(format)
        .samples(samples)
        .load_op(load_op)
        .store_op(store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial_layout)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
}

/// Render pass description of a depth attachment: always cleared, stencil ignored.
pub fn depth_attachment_description(
    format: vk::Format,
    samples: vk::SampleCountFlags,
) -> vk::AttachmentDescription {
    let store_op = if is_multisampled(samples) {
        vk::AttachmentStoreOp::DONT_CARE
    } else {
        vk::AttachmentStoreOp::STORE
    };

    vk::AttachmentDescription::default()
        .format(format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
}

/// Layout an attachment is sampled in after its pass ended.
pub fn sampled_layout(kind: AttachmentKind) -> vk::ImageLayout {
    match kind {
        AttachmentKind::Color | AttachmentKind::Resolve => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AttachmentKind::Depth => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    }
}

/// One image bound as a render pass attachment.
pub struct FrameBufferAttachment {
    ctx: Arc<GpuContext>,
    image: ImageObject,
    view: vk::ImageView,
    /// Same handle as `view` for single-level images.
    render_view: vk::ImageView,
    sampler: vk::Sampler,
    kind: AttachmentKind,
    extent: vk::Extent2D,
    description: vk::AttachmentDescription,
}

impl FrameBufferAttachment {
    /// Color attachment of `size` (see [`clamp_attachment_size`]).
    ///
    /// Multisampled images cannot have mip levels, so `mip_levels` is ignored for them.
    pub fn init_color_2d(
        ctx: &Arc<GpuContext>,
        size: vk::Extent2D,
        format: vk::Format,
        mip_levels: u32,
        needs_clear: bool,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let extent = clamp_attachment_size(size.width, size.height)?;
        let samples = ctx.usable_sample_count(samples);
        let mip_levels = attachment_mip_levels(mip_levels, samples);
        let image = create_color_attachment_2d(ctx, extent, format, mip_levels, samples, "color attachment")?;
        Self::from_image(
            ctx,
            image,
            AttachmentKind::Color,
            extent,
            color_attachment_description(format, samples, needs_clear),
        )
    }

    /// Single-sample target a multisampled color attachment resolves into.
    pub fn init_resolve(ctx: &Arc<GpuContext>, size: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let mut attachment =
            Self::init_color_2d(ctx, size, format, 1, false, vk::SampleCountFlags::TYPE_1)?;
        attachment.kind = AttachmentKind::Resolve;
        Ok(attachment)
    }

    /// Depth attachment of `size`.
    pub fn init_depth(
        ctx: &Arc<GpuContext>,
        size: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let extent = clamp_attachment_size(size.width, size.height)?;
        let samples = ctx.usable_sample_count(samples);
        let image = create_depth_attachment(ctx, extent, format, samples, "depth attachment")?;
        Self::from_image(
            ctx,
            image,
            AttachmentKind::Depth,
            extent,
            depth_attachment_description(format, samples),
        )
    }

    fn from_image(
        ctx: &Arc<GpuContext>,
        image: ImageObject,
        kind: AttachmentKind,
        extent: vk::Extent2D,
        description: vk::AttachmentDescription,
    ) -> Result<Self> {
        let device = ctx.device();
        let view = image.create_view(vk::ImageViewType::TYPE_2D)?;
        let render_view = if image.mip_levels() > 1 {
            match image.create_level_view(vk::ImageViewType::TYPE_2D, 0) {
                Ok(render_view) => render_view,
                Err(e) => {
                    unsafe { device.destroy_image_view(view, None) };
                    return Err(e);
                }
            }
        } else {
            view
        };
        let sampler = match create_sampler(ctx, vk::Filter::LINEAR, image.mip_levels()) {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe {
                    if render_view != view {
                        device.destroy_image_view(render_view, None);
                    }
                    device.destroy_image_view(view, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            image,
            view,
            render_view,
            sampler,
            kind,
            extent,
            description,
        })
    }

    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    pub fn image(&self) -> &ImageObject {
        &self.image
    }

    /// View over every mip level, used for sampling.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Level-0 view bound to the framebuffer.
    pub fn render_view(&self) -> vk::ImageView {
        self.render_view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn format(&self) -> vk::Format {
        self.description.format
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.description.samples
    }

    /// Description used when building a render pass.
    pub fn description(&self) -> vk::AttachmentDescription {
        self.description
    }

    /// Sampler, view and layout for binding this attachment in a later pass.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.view)
            .image_layout(sampled_layout(self.kind))
    }
}

impl Drop for FrameBufferAttachment {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_sampler(self.sampler, None);
            if self.render_view != self.view {
                self.ctx.device().destroy_image_view(self.render_view, None);
            }
            self.ctx.device().destroy_image_view(self.view, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_validated_then_clamped() {
        assert!(matches!(
            clamp_attachment_size(0, 10),
            Err(GpuError::InvalidSize { width: 0, height: 10 })
        ));
        assert!(clamp_attachment_size(10, 0).is_err());
        assert_eq!(
            clamp_attachment_size(20_000, 1).unwrap(),
            vk::Extent2D {
                width: MAX_ATTACHMENT_SIZE,
                height: 1
            }
        );
    }

    #[test]
    fn plain_rgba8_color_attachment() {
        let extent = clamp_attachment_size(256, 256).unwrap();
        assert_eq!((extent.width, extent.height), (256, 256));

        let desc = color_attachment_description(vk::Format::R8G8B8A8_UNORM, vk::SampleCountFlags::TYPE_1, false);
        assert_eq!(desc.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(desc.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(desc.initial_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(desc.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn color_load_and_store_ops() {
        let cases = [
            (vk::SampleCountFlags::TYPE_1, true, vk::AttachmentLoadOp::CLEAR, vk::AttachmentStoreOp::STORE),
            (vk::SampleCountFlags::TYPE_1, false, vk::AttachmentLoadOp::LOAD, vk::AttachmentStoreOp::STORE),
            (vk::SampleCountFlags::TYPE_4, true, vk::AttachmentLoadOp::CLEAR, vk::AttachmentStoreOp::DONT_CARE),
            (
                vk::SampleCountFlags::TYPE_4,
                false,
                vk::AttachmentLoadOp::DONT_CARE,
                vk::AttachmentStoreOp::DONT_CARE,
            ),
        ];
        for (samples, clear, load, store) in cases {
            let desc = color_attachment_description(vk::Format::R8G8B8A8_UNORM, samples, clear);
            assert_eq!(desc.load_op, load, "{samples:?} clear={clear}");
            assert_eq!(desc.store_op, store, "{samples:?} clear={clear}");
            assert_eq!(desc.samples, samples);
        }
    }

    #[test]
    fn multisampled_color_has_a_single_mip_level() {
        assert_eq!(attachment_mip_levels(4, vk::SampleCountFlags::TYPE_4), 1);
        assert_eq!(attachment_mip_levels(0, vk::SampleCountFlags::TYPE_1), 1);
        assert_eq!(attachment_mip_levels(4, vk::SampleCountFlags::TYPE_1), 4);
    }

    #[test]
    fn depth_is_always_cleared() {
        let desc = depth_attachment_description(vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(desc.stencil_store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(desc.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }
}
