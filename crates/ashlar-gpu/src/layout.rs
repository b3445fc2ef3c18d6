//! Image layout transitions.
//!
//! [`transition_image_layout`] only accepts the pairs in [`transition_masks`];
//! anything else is [`GpuError::UnsupportedLayoutTransition`]. Code that needs
//! other barriers (mip blits, captures) records them with [`image_barrier`].

use crate::error::{GpuError, Result};
use ash::vk;

/// Access and stage masks for one side of a barrier pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The supported layout transition table.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL) => {
            (A::empty(), A::TRANSFER_READ, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::empty(), A::SHADER_READ, S::TOP_OF_PIPE, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::UNDEFINED, L::GENERAL) => (
            A::empty(),
            A::SHADER_READ | A::SHADER_WRITE,
            S::TOP_OF_PIPE,
            S::COMPUTE_SHADER,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            A::TRANSFER_WRITE,
            A::SHADER_READ,
            S::TRANSFER,
            S::FRAGMENT_SHADER,
        ),
        _ => return Err(GpuError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Whether the format has a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Whether the format has a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask covering every component of the format.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else if format == vk::Format::S8_UINT {
        vk::ImageAspectFlags::empty()
    } else {
        vk::ImageAspectFlags::COLOR
    };
    if has_stencil_component(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    aspect
}

/// Subresource range of `level_count` mips starting at `base_mip`, all layers.
pub fn subresource_range(
    format: vk::Format,
    base_mip: u32,
    level_count: u32,
    layer_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask(format))
        .base_mip_level(base_mip)
        .level_count(level_count)
        .base_array_layer(0)
        .layer_count(layer_count)
}

/// Record a layout transition from the supported table.
///
/// # Safety
/// The device, command buffer and image must be valid and the image must
/// currently be in `old` for `range`.
pub unsafe fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old, new)?;
    image_barrier(device, cmd, image, range, old, new, masks);
    Ok(())
}

/// Record one image memory barrier.
///
/// # Safety
/// The device, command buffer and image must be valid.
pub unsafe fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    masks: TransitionMasks,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::ImageLayout as L;

    #[test]
    fn supported_pairs() {
        let supported = [
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL),
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL),
            (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL),
            (L::UNDEFINED, L::GENERAL),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        ];
        for (old, new) in supported {
            assert!(transition_masks(old, new).is_ok(), "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn everything_else_is_rejected() {
        for (old, new) in [
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR),
            (L::UNDEFINED, L::UNDEFINED),
        ] {
            let err = transition_masks(old, new).unwrap_err();
            assert!(matches!(
                err,
                GpuError::UnsupportedLayoutTransition { old: o, new: n } if o == old && n == new
            ));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn upload_completion_waits_for_the_copy() {
        let masks = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn compute_targets_are_readable_and_writable() {
        let masks = transition_masks(L::UNDEFINED, L::GENERAL).unwrap();
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn depth_aspects() {
        assert_eq!(aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert!(!is_depth_format(vk::Format::R32_SFLOAT));
    }
}
