//! Render pass construction.
//!
//! Attachments are always ordered color, then resolve, then depth. The same
//! order is used for render pass descriptions and framebuffer views, so the
//! two cannot disagree.

use crate::error::{GpuError, Result};
use ash::vk;

/// Number of attachments a frame buffer with these parameters binds.
pub fn expected_attachment_count(
    color_count: usize,
    samples: vk::SampleCountFlags,
    use_depth: bool,
) -> usize {
    let resolve_count = if samples == vk::SampleCountFlags::TYPE_1 {
        0
    } else {
        color_count
    };
    color_count + resolve_count + usize::from(use_depth)
}

/// Attachment descriptions and subpass references for a single-subpass pass.
#[derive(Debug, Clone, Default)]
pub struct RenderPassLayout {
    pub descriptions: Vec<vk::AttachmentDescription>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub resolve_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
}

impl RenderPassLayout {
    /// Lay out `color`, `resolve` and `depth` in that order.
    ///
    /// `resolve` is either empty or has one entry per color attachment.
    pub fn from_parts(
        color: &[vk::AttachmentDescription],
        resolve: &[vk::AttachmentDescription],
        depth: Option<vk::AttachmentDescription>,
    ) -> Result<Self> {
        if !resolve.is_empty() && resolve.len() != color.len() {
            return Err(GpuError::InvalidBufferCount {
                count: resolve.len() as u32,
                max: color.len() as u32,
            });
        }

        let mut layout = Self::default();
        let mut push = |desc: vk::AttachmentDescription, layout_kind: vk::ImageLayout| {
            let index = layout.descriptions.len() as u32;
            layout.descriptions.push(desc);
            vk::AttachmentReference::default()
                .attachment(index)
                .layout(layout_kind)
        };

        let color_refs: Vec<_> = color
            .iter()
            .map(|d| push(*d, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let resolve_refs: Vec<_> = resolve
            .iter()
            .map(|d| push(*d, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let depth_ref = depth.map(|d| push(d, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));

        layout.color_refs = color_refs;
        layout.resolve_refs = resolve_refs;
        layout.depth_ref = depth_ref;
        Ok(layout)
    }

    pub fn attachment_count(&self) -> usize {
        self.descriptions.len()
    }

    /// Sample count of the color attachments.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.color_refs
            .first()
            .and_then(|r| self.descriptions.get(r.attachment as usize))
            .map_or(vk::SampleCountFlags::TYPE_1, |d| d.samples)
    }
}

/// The barrier pair around the single subpass.
///
/// The first orders the pass after earlier fragment shader reads of the same
/// images; the second makes the results visible to later fragment shaders.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .dependency_flags(vk::DependencyFlags::BY_REGION),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ]
}

/// Create a render pass with one graphics subpass using every reference in `layout`.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_render_pass(device: &ash::Device, layout: &RenderPassLayout) -> Result<vk::RenderPass> {
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&layout.color_refs);
    if !layout.resolve_refs.is_empty() {
        subpass = subpass.resolve_attachments(&layout.resolve_refs);
    }
    if let Some(depth_ref) = layout.depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }

    let dependencies = subpass_dependencies();
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&layout.descriptions)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);

    let render_pass = device.create_render_pass(&create_info, None)?;
    Ok(render_pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{color_attachment_description, depth_attachment_description};

    fn color(samples: vk::SampleCountFlags) -> vk::AttachmentDescription {
        color_attachment_description(vk::Format::R8G8B8A8_UNORM, samples, true)
    }

    #[test]
    fn arity_formula() {
        let s1 = vk::SampleCountFlags::TYPE_1;
        let s4 = vk::SampleCountFlags::TYPE_4;
        assert_eq!(expected_attachment_count(1, s1, false), 1);
        assert_eq!(expected_attachment_count(2, s1, true), 3);
        assert_eq!(expected_attachment_count(3, s4, true), 7);
        assert_eq!(expected_attachment_count(8, s4, false), 16);
    }

    #[test]
    fn three_msaa_colors_with_depth() {
        let s4 = vk::SampleCountFlags::TYPE_4;
        let colors = [color(s4); 3];
        let resolves = [color(vk::SampleCountFlags::TYPE_1); 3];
        let depth = depth_attachment_description(vk::Format::D32_SFLOAT, s4);

        let layout = RenderPassLayout::from_parts(&colors, &resolves, Some(depth)).unwrap();
        assert_eq!(layout.attachment_count(), 7);
        assert_eq!(layout.attachment_count(), expected_attachment_count(3, s4, true));
        assert_eq!(layout.color_refs.len(), 3);
        assert_eq!(layout.resolve_refs.len(), 3);

        let order: Vec<u32> = layout
            .color_refs
            .iter()
            .chain(&layout.resolve_refs)
            .chain(layout.depth_ref.iter())
            .map(|r| r.attachment)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6]);

        let depth_ref = layout.depth_ref.unwrap();
        assert_eq!(depth_ref.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert!(layout.resolve_refs.iter().all(|r| r.layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(layout.samples(), s4);
        assert_eq!(layout.descriptions[6].format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn single_sample_has_no_resolves() {
        let layout = RenderPassLayout::from_parts(&[color(vk::SampleCountFlags::TYPE_1)], &[], None).unwrap();
        assert_eq!(layout.attachment_count(), 1);
        assert!(layout.resolve_refs.is_empty());
        assert!(layout.depth_ref.is_none());
    }

    #[test]
    fn mismatched_resolve_count_is_rejected() {
        let s4 = vk::SampleCountFlags::TYPE_4;
        let err = RenderPassLayout::from_parts(&[color(s4); 2], &[color(s4)], None).unwrap_err();
        assert!(matches!(err, GpuError::InvalidBufferCount { count: 1, max: 2 }));
    }

    #[test]
    fn dependencies_bracket_the_subpass() {
        let [into, out] = subpass_dependencies();
        assert_eq!(into.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(into.dst_subpass, 0);
        assert_eq!(out.src_subpass, 0);
        assert_eq!(out.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(out.dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
    }
}
