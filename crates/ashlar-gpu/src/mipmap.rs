//! Mipmap generation by successive linear blits.

use crate::command::execute_single_time_commands;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::layout::{aspect_mask, image_barrier, TransitionMasks};
use ash::vk;

/// Full mip chain length for an extent: `floor(log2(max_dim)) + 1`.
pub fn mip_levels_for(extent: vk::Extent3D) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Extent of `level`, halving each dimension per level with a floor of 1.
pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent3D {
        width: shrink(extent.width),
        height: shrink(extent.height),
        depth: shrink(extent.depth),
    }
}

/// One step of mip chain generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipCommand {
    Barrier {
        level: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    Blit {
        src_level: u32,
        dst_level: u32,
        src_extent: vk::Extent3D,
        dst_extent: vk::Extent3D,
    },
}

/// Commands that fill levels `1..levels` from level 0.
///
/// Expects every level in `TRANSFER_DST_OPTIMAL` and leaves every level in
/// `SHADER_READ_ONLY_OPTIMAL`.
pub fn plan_mip_chain(extent: vk::Extent3D, levels: u32) -> Vec<MipCommand> {
    use vk::ImageLayout as L;

    let levels = levels.max(1);
    let mut commands = Vec::with_capacity(levels as usize * 3);
    for dst_level in 1..levels {
        let src_level = dst_level - 1;
        commands.push(MipCommand::Barrier {
            level: src_level,
            old: L::TRANSFER_DST_OPTIMAL,
            new: L::TRANSFER_SRC_OPTIMAL,
        });
        commands.push(MipCommand::Blit {
            src_level,
            dst_level,
            src_extent: mip_extent(extent, src_level),
            dst_extent: mip_extent(extent, dst_level),
        });
        commands.push(MipCommand::Barrier {
            level: src_level,
            old: L::TRANSFER_SRC_OPTIMAL,
            new: L::SHADER_READ_ONLY_OPTIMAL,
        });
    }
    commands.push(MipCommand::Barrier {
        level: levels - 1,
        old: L::TRANSFER_DST_OPTIMAL,
        new: L::SHADER_READ_ONLY_OPTIMAL,
    });
    commands
}

fn barrier_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    use vk::AccessFlags as A;
    use vk::PipelineStageFlags as S;

    let (src_access, src_stage) = match old {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (A::TRANSFER_READ, S::TRANSFER),
        _ => (A::TRANSFER_WRITE, S::TRANSFER),
    };
    let (dst_access, dst_stage) = match new {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (A::TRANSFER_READ, S::TRANSFER),
        _ => (A::SHADER_READ, S::FRAGMENT_SHADER),
    };
    TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    }
}

fn offset_of(extent: vk::Extent3D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

/// Record mip generation for an image whose levels are all in transfer-dst.
///
/// # Safety
/// The device, command buffer and image must be valid.
pub unsafe fn record_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent3D,
    levels: u32,
    layer_count: u32,
) {
    let aspect = aspect_mask(format);
    for command in plan_mip_chain(extent, levels) {
        match command {
            MipCommand::Barrier { level, old, new } => {
                let range = vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(level)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(layer_count);
                image_barrier(device, cmd, image, range, old, new, barrier_masks(old, new));
            }
            MipCommand::Blit {
                src_level,
                dst_level,
                src_extent,
                dst_extent,
            } => {
                let layers = |mip_level| {
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(aspect)
                        .mip_level(mip_level)
                        .base_array_layer(0)
                        .layer_count(layer_count)
                };
                let blit = vk::ImageBlit::default()
                    .src_subresource(layers(src_level))
                    .src_offsets([vk::Offset3D::default(), offset_of(src_extent)])
                    .dst_subresource(layers(dst_level))
                    .dst_offsets([vk::Offset3D::default(), offset_of(dst_extent)]);

                device.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }
        }
    }
}

/// Generate every mip level of `image` and leave it shader-readable.
///
/// Fails with [`GpuError::UnsupportedFormat`] when the format cannot be
/// blitted with linear filtering; there is no fallback.
///
/// # Safety
/// The image must be idle with all `levels` in transfer-dst layout.
pub unsafe fn generate_mipmaps(
    ctx: &GpuContext,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent3D,
    levels: u32,
    layer_count: u32,
) -> Result<()> {
    if !ctx.supports_linear_blit(format) {
        return Err(GpuError::UnsupportedFormat {
            format,
            reason: "linear blit not supported, cannot generate mipmaps",
        });
    }

    tracing::debug!("Generating {levels} mip levels for {format:?}");
    execute_single_time_commands(ctx, |cmd| {
        record_mipmaps(ctx.device(), cmd, image, format, extent, levels, layer_count);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::ImageLayout as L;

    fn extent(width: u32, height: u32) -> vk::Extent3D {
        vk::Extent3D {
            width,
            height,
            depth: 1,
        }
    }

    /// Replays barriers and returns the final layout of every level.
    fn simulate(commands: &[MipCommand], levels: u32) -> Vec<L> {
        let mut layouts = vec![L::TRANSFER_DST_OPTIMAL; levels as usize];
        for command in commands {
            match *command {
                MipCommand::Barrier { level, old, new } => {
                    assert_eq!(layouts[level as usize], old);
                    layouts[level as usize] = new;
                }
                MipCommand::Blit {
                    src_level,
                    dst_level,
                    ..
                } => {
                    assert_eq!(layouts[src_level as usize], L::TRANSFER_SRC_OPTIMAL);
                    assert_eq!(layouts[dst_level as usize], L::TRANSFER_DST_OPTIMAL);
                }
            }
        }
        layouts
    }

    #[test]
    fn full_chain_length() {
        assert_eq!(mip_levels_for(extent(1, 1)), 1);
        assert_eq!(mip_levels_for(extent(256, 256)), 9);
        assert_eq!(mip_levels_for(extent(300, 17)), 9);
        assert_eq!(mip_levels_for(extent(0, 0)), 1);
    }

    #[test]
    fn levels_halve_with_floor_of_one() {
        let base = extent(256, 64);
        let levels = mip_levels_for(base);
        let sizes: Vec<(u32, u32)> = (0..levels)
            .map(|l| {
                let e = mip_extent(base, l);
                (e.width, e.height)
            })
            .collect();
        assert_eq!(
            sizes,
            vec![(256, 64), (128, 32), (64, 16), (32, 8), (16, 4), (8, 2), (4, 1), (2, 1), (1, 1)]
        );
    }

    #[test]
    fn blit_count_is_levels_minus_one() {
        for levels in 1..=9 {
            let plan = plan_mip_chain(extent(256, 256), levels);
            let blits = plan
                .iter()
                .filter(|c| matches!(c, MipCommand::Blit { .. }))
                .count();
            assert_eq!(blits as u32, levels - 1);
        }
    }

    #[test]
    fn every_level_ends_shader_readable() {
        for levels in [1, 2, 5, 9] {
            let plan = plan_mip_chain(extent(256, 256), levels);
            let layouts = simulate(&plan, levels);
            assert!(layouts.iter().all(|l| *l == L::SHADER_READ_ONLY_OPTIMAL));
        }
    }

    #[test]
    fn each_blit_halves_the_previous_level() {
        let plan = plan_mip_chain(extent(100, 30), mip_levels_for(extent(100, 30)));
        for command in plan {
            if let MipCommand::Blit {
                src_extent,
                dst_extent,
                ..
            } = command
            {
                assert_eq!(dst_extent.width, (src_extent.width / 2).max(1));
                assert_eq!(dst_extent.height, (src_extent.height / 2).max(1));
            }
        }
    }

    #[test]
    fn extreme_levels_clamp_to_one() {
        assert_eq!(mip_extent(extent(8, 8), 40), extent(1, 1));
    }
}
