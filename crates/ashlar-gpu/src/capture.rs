//! Frame capture: read a frame-buffer attachment back to the CPU.

use crate::attachment::{sampled_layout, AttachmentKind, FrameBufferAttachment};
use crate::buffer::BufferObject;
use crate::command::execute_single_time_commands;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::layout::{image_barrier, subresource_range, TransitionMasks};
use ash::vk;
use std::sync::Arc;

/// Tightly packed RGBA8 pixels, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Convert raw texels of an 8-bit four-channel format into RGBA order.
pub fn to_rgba8(format: vk::Format, mut texels: Vec<u8>) -> Result<Vec<u8>> {
    use vk::Format as F;
    match format {
        F::R8G8B8A8_UNORM | F::R8G8B8A8_SRGB => Ok(texels),
        F::B8G8R8A8_UNORM | F::B8G8R8A8_SRGB => {
            for pixel in texels.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            Ok(texels)
        }
        _ => Err(GpuError::UnsupportedFormat {
            format,
            reason: "capture supports 8-bit RGBA and BGRA only",
        }),
    }
}

/// Copy a single-sample color attachment into host memory.
///
/// The attachment must be in its sampled layout, i.e. its pass has ended, and
/// no pending GPU work may write to it. Multisampled buffers are captured via
/// their resolve attachment.
pub fn capture_attachment(ctx: &Arc<GpuContext>, attachment: &FrameBufferAttachment) -> Result<CapturedImage> {
    if attachment.kind() == AttachmentKind::Depth {
        return Err(GpuError::UnsupportedFormat {
            format: attachment.format(),
            reason: "depth attachments cannot be captured",
        });
    }
    if attachment.samples() != vk::SampleCountFlags::TYPE_1 {
        return Err(GpuError::InvalidState(
            "multisampled attachment, capture the resolve attachment instead".to_string(),
        ));
    }
    // Reject before recording anything
    to_rgba8(attachment.format(), Vec::new())?;

    let extent = attachment.extent();
    let size = u64::from(extent.width) * u64::from(extent.height) * 4;
    let readback = BufferObject::readback(ctx, size)?;

    let image = attachment.image().handle();
    let range = subresource_range(attachment.format(), 0, 1, 1);
    let sampled = sampled_layout(attachment.kind());

    unsafe {
        execute_single_time_commands(ctx, |cmd| {
            let device = ctx.device();
            image_barrier(
                device,
                cmd,
                image,
                range,
                sampled,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                TransitionMasks {
                    src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    dst_access: vk::AccessFlags::TRANSFER_READ,
                    src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    dst_stage: vk::PipelineStageFlags::TRANSFER,
                },
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.handle(),
                &[region],
            );

            image_barrier(
                device,
                cmd,
                image,
                range,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                sampled,
                TransitionMasks {
                    src_access: vk::AccessFlags::TRANSFER_READ,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                },
            );
        })?;
    }

    let texels = readback.download(0, size as usize)?;
    tracing::debug!("Captured {}x{} {:?} attachment", extent.width, extent.height, attachment.format());
    Ok(CapturedImage {
        width: extent.width,
        height: extent.height,
        rgba: to_rgba8(attachment.format(), texels)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_is_swizzled() {
        let rgba = to_rgba8(vk::Format::B8G8R8A8_UNORM, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(rgba, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn rgba_passes_through() {
        let rgba = to_rgba8(vk::Format::R8G8B8A8_SRGB, vec![9, 8, 7, 6]).unwrap();
        assert_eq!(rgba, vec![9, 8, 7, 6]);
    }

    #[test]
    fn float_formats_are_rejected() {
        assert!(matches!(
            to_rgba8(vk::Format::R16G16B16A16_SFLOAT, Vec::new()),
            Err(GpuError::UnsupportedFormat { .. })
        ));
    }
}
