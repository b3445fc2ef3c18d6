//! Image resources.
//!
//! Images come in four roles: sampled textures (uploaded through staging),
//! color and depth attachments, and compute storage targets. Each role gets
//! the usage flags it needs and is transitioned to its working layout before
//! it is returned.

use crate::buffer::BufferObject;
use crate::command::{begin_single_time_commands, flush_single_time_commands};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::layout::{subresource_range, transition_image_layout};
use crate::memory::MemoryUsage;
use crate::mipmap::{generate_mipmaps, mip_levels_for};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::sync::Arc;

/// Parameters for [`ImageObject::new`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub layer_count: u32,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub memory_usage: MemoryUsage,
}

impl ImageDesc {
    /// A single-layer, single-sample GPU-only 2D image.
    pub fn texture_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            layer_count: 1,
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            flags: vk::ImageCreateFlags::empty(),
            memory_usage: MemoryUsage::GpuOnly,
        }
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

/// An image with its memory.
pub struct ImageObject {
    ctx: Arc<GpuContext>,
    image: vk::Image,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl ImageObject {
    /// Allocate an image. The caller transitions it out of `UNDEFINED`.
    pub fn new(ctx: &Arc<GpuContext>, desc: &ImageDesc, name: &str) -> Result<Self> {
        let extent = desc.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(GpuError::InvalidSize {
                width: extent.width,
                height: extent.height,
            });
        }

        let create_info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layer_count)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) = ctx
            .allocator()
            .lock()
            .allocate_image(&create_info, desc.memory_usage, name)?;

        unsafe { ctx.labels().name_object(image, name) };
        tracing::debug!(
            "Created image '{name}' {}x{}x{} {:?} mips={} samples={:?}",
            extent.width,
            extent.height,
            extent.depth,
            desc.format,
            desc.mip_levels,
            desc.samples
        );

        Ok(Self {
            ctx: Arc::clone(ctx),
            image,
            allocation: Some(allocation),
            desc: *desc,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.desc.samples
    }

    /// Range covering every mip level and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        subresource_range(self.desc.format, 0, self.desc.mip_levels, self.desc.layer_count)
    }

    /// Range covering one mip level and every layer.
    pub fn level_range(&self, level: u32) -> vk::ImageSubresourceRange {
        subresource_range(self.desc.format, level, 1, self.desc.layer_count)
    }

    /// Create a view over the whole image. The caller destroys it.
    pub fn create_view(&self, view_type: vk::ImageViewType) -> Result<vk::ImageView> {
        self.create_view_of(view_type, self.full_range())
    }

    /// Create a view of a single mip level, as framebuffers require. The caller destroys it.
    pub fn create_level_view(&self, view_type: vk::ImageViewType, level: u32) -> Result<vk::ImageView> {
        self.create_view_of(view_type, self.level_range(level))
    }

    fn create_view_of(
        &self,
        view_type: vk::ImageViewType,
        range: vk::ImageSubresourceRange,
    ) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(self.desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(range);
        let view = unsafe { self.ctx.device().create_image_view(&info, None)? };
        Ok(view)
    }

    /// Transition every subresource, blocking until done.
    pub fn transition(&self, old: vk::ImageLayout, new: vk::ImageLayout) -> Result<()> {
        unsafe {
            let commands = begin_single_time_commands(&self.ctx, None)?;
            let recorded = transition_image_layout(
                self.ctx.device(),
                commands.command_buffer(),
                self.image,
                self.full_range(),
                old,
                new,
            );
            let flushed = flush_single_time_commands(&self.ctx, commands);
            recorded.and(flushed)
        }
    }
}

impl Drop for ImageObject {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.ctx.allocator().lock().free(allocation) {
                tracing::warn!("Failed to free image memory: {e}");
            }
        }
    }
}

/// Allocate an image without transitioning it.
pub fn create_image(ctx: &Arc<GpuContext>, desc: &ImageDesc, name: &str) -> Result<ImageObject> {
    ImageObject::new(ctx, desc, name)
}

/// Size in bytes of one texel, for the formats textures can be created with.
pub fn bytes_per_pixel(format: vk::Format) -> Result<u32> {
    use vk::Format as F;
    Ok(match format {
        F::R8_UNORM | F::R8_SNORM | F::R8_UINT | F::R8_SRGB => 1,
        F::R8G8_UNORM | F::R8G8_SNORM | F::R16_SFLOAT | F::R16_UNORM | F::R16_UINT => 2,
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SRGB
        | F::R8G8B8A8_SNORM
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::R16G16_SFLOAT
        | F::R32_SFLOAT
        | F::R32_UINT
        | F::A2B10G10R10_UNORM_PACK32 => 4,
        F::R16G16B16A16_SFLOAT | F::R16G16B16A16_UNORM | F::R32G32_SFLOAT => 8,
        F::R32G32B32A32_SFLOAT | F::R32G32B32A32_UINT => 16,
        _ => {
            return Err(GpuError::UnsupportedFormat {
                format,
                reason: "no pixel size known for texture upload",
            })
        }
    })
}

/// One step of a texture upload, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    /// Copy host data into a staging buffer.
    Stage,
    /// `UNDEFINED` to `TRANSFER_DST_OPTIMAL` on every level.
    TransitionToTransferDst,
    /// Copy staging into mip level 0.
    CopyToImage,
    /// Blit the remaining levels and make all of them shader-readable.
    GenerateMipmaps { blits: u32 },
    /// `TRANSFER_DST_OPTIMAL` to `SHADER_READ_ONLY_OPTIMAL`.
    TransitionToShaderRead,
}

/// Steps to upload a texture with `mip_levels` levels.
pub fn plan_texture_upload(mip_levels: u32) -> [UploadStep; 4] {
    let last = if mip_levels > 1 {
        UploadStep::GenerateMipmaps {
            blits: mip_levels - 1,
        }
    } else {
        UploadStep::TransitionToShaderRead
    };
    [
        UploadStep::Stage,
        UploadStep::TransitionToTransferDst,
        UploadStep::CopyToImage,
        last,
    ]
}

fn expected_texture_bytes(desc: &ImageDesc) -> Result<usize> {
    let texel = bytes_per_pixel(desc.format)? as usize;
    let e = desc.extent;
    Ok(texel * e.width as usize * e.height as usize * e.depth as usize * desc.layer_count as usize)
}

/// Upload `data` into a new sampled image described by `desc`.
fn create_texture(ctx: &Arc<GpuContext>, mut desc: ImageDesc, data: &[u8], name: &str) -> Result<ImageObject> {
    let expected = expected_texture_bytes(&desc)?;
    if data.len() != expected {
        return Err(GpuError::OutOfRange(format!(
            "texture '{name}' needs {expected} bytes, got {}",
            data.len()
        )));
    }

    desc.usage |= vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    if desc.mip_levels > 1 {
        desc.usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }

    let mut staging: Option<BufferObject> = None;
    let mut image: Option<ImageObject> = None;

    for step in plan_texture_upload(desc.mip_levels) {
        match step {
            UploadStep::Stage => {
                let mut buffer = BufferObject::staging(ctx, data.len() as vk::DeviceSize)?;
                buffer.upload(0, data)?;
                staging = Some(buffer);
                image = Some(ImageObject::new(ctx, &desc, name)?);
            }
            UploadStep::TransitionToTransferDst => {
                let image = image.as_ref().ok_or_else(missing_image)?;
                image.transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
            }
            UploadStep::CopyToImage => {
                let image = image.as_ref().ok_or_else(missing_image)?;
                let staging = staging.as_ref().ok_or_else(missing_image)?;
                copy_buffer_to_image(ctx, staging, image)?;
            }
            UploadStep::GenerateMipmaps { .. } => {
                let image = image.as_ref().ok_or_else(missing_image)?;
                unsafe {
                    generate_mipmaps(
                        ctx,
                        image.handle(),
                        desc.format,
                        desc.extent,
                        desc.mip_levels,
                        desc.layer_count,
                    )?;
                }
            }
            UploadStep::TransitionToShaderRead => {
                let image = image.as_ref().ok_or_else(missing_image)?;
                image.transition(
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )?;
            }
        }
    }

    image.ok_or_else(missing_image)
}

fn missing_image() -> GpuError {
    GpuError::InvalidState("texture upload steps out of order".to_string())
}

fn copy_buffer_to_image(ctx: &GpuContext, src: &BufferObject, dst: &ImageObject) -> Result<()> {
    let desc = dst.desc();
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(desc.layer_count),
        )
        .image_offset(vk::Offset3D::default())
        .image_extent(desc.extent);

    unsafe {
        crate::command::execute_single_time_commands(ctx, |cmd| {
            ctx.device().cmd_copy_buffer_to_image(
                cmd,
                src.handle(),
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }
}

/// Sampled 2D texture from tightly packed texels.
///
/// `mip_levels` of 0 means the full chain.
pub fn create_texture_image_2d(
    ctx: &Arc<GpuContext>,
    width: u32,
    height: u32,
    format: vk::Format,
    mip_levels: u32,
    data: &[u8],
) -> Result<ImageObject> {
    let mut desc = ImageDesc::texture_2d(width, height, format, vk::ImageUsageFlags::empty());
    desc.mip_levels = resolve_mip_levels(desc.extent, mip_levels);
    create_texture(ctx, desc, data, "texture 2d")
}

/// Sampled 3D texture from tightly packed texels.
pub fn create_texture_image_3d(
    ctx: &Arc<GpuContext>,
    extent: vk::Extent3D,
    format: vk::Format,
    mip_levels: u32,
    data: &[u8],
) -> Result<ImageObject> {
    let desc = ImageDesc {
        image_type: vk::ImageType::TYPE_3D,
        extent,
        mip_levels: resolve_mip_levels(extent, mip_levels),
        ..ImageDesc::texture_2d(extent.width, extent.height, format, vk::ImageUsageFlags::empty())
    };
    create_texture(ctx, desc, data, "texture 3d")
}

/// Cube texture; `data` holds the six faces one after another.
pub fn create_texture_image_cube(
    ctx: &Arc<GpuContext>,
    size: u32,
    format: vk::Format,
    mip_levels: u32,
    data: &[u8],
) -> Result<ImageObject> {
    let mut desc = ImageDesc::texture_2d(size, size, format, vk::ImageUsageFlags::empty());
    desc.layer_count = 6;
    desc.flags = vk::ImageCreateFlags::CUBE_COMPATIBLE;
    desc.mip_levels = resolve_mip_levels(desc.extent, mip_levels);
    create_texture(ctx, desc, data, "texture cube")
}

/// Zero-filled sampled 2D texture.
///
/// Fails with [`GpuError::UnsupportedFormat`] for formats missing from the
/// pixel size table.
pub fn create_empty_texture_2d(
    ctx: &Arc<GpuContext>,
    width: u32,
    height: u32,
    format: vk::Format,
) -> Result<ImageObject> {
    let texel = bytes_per_pixel(format)? as usize;
    let zeros = vec![0_u8; texel * width as usize * height as usize];
    create_texture_image_2d(ctx, width, height, format, 1, &zeros)
}

fn resolve_mip_levels(extent: vk::Extent3D, requested: u32) -> u32 {
    let full = mip_levels_for(extent);
    if requested == 0 {
        full
    } else {
        requested.min(full)
    }
}

/// Color attachment, transitioned to `COLOR_ATTACHMENT_OPTIMAL`.
pub fn create_color_attachment_2d(
    ctx: &Arc<GpuContext>,
    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,
    samples: vk::SampleCountFlags,
    name: &str,
) -> Result<ImageObject> {
    let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_SRC;
    let desc = ImageDesc::texture_2d(extent.width, extent.height, format, usage)
        .with_mip_levels(mip_levels)
        .with_samples(samples);
    let image = ImageObject::new(ctx, &desc, name)?;
    image.transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
    Ok(image)
}

/// Depth attachment, transitioned to `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`.
pub fn create_depth_attachment(
    ctx: &Arc<GpuContext>,
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    name: &str,
) -> Result<ImageObject> {
    if !crate::layout::is_depth_format(format) {
        return Err(GpuError::UnsupportedFormat {
            format,
            reason: "not a depth format",
        });
    }
    let usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
    let desc = ImageDesc::texture_2d(extent.width, extent.height, format, usage).with_samples(samples);
    let image = ImageObject::new(ctx, &desc, name)?;
    image.transition(
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    )?;
    Ok(image)
}

/// Storage image for compute, transitioned to `GENERAL`.
pub fn create_compute_target_2d(
    ctx: &Arc<GpuContext>,
    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,
    name: &str,
) -> Result<ImageObject> {
    let usage = vk::ImageUsageFlags::STORAGE
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_SRC;
    let desc = ImageDesc::texture_2d(extent.width, extent.height, format, usage).with_mip_levels(mip_levels);
    let image = ImageObject::new(ctx, &desc, name)?;
    image.transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)?;
    Ok(image)
}

/// Linear, clamp-to-edge sampler covering `mip_levels` levels.
pub fn create_sampler(ctx: &GpuContext, filter: vk::Filter, mip_levels: u32) -> Result<vk::Sampler> {
    let mipmap_mode = if filter == vk::Filter::NEAREST {
        vk::SamplerMipmapMode::NEAREST
    } else {
        vk::SamplerMipmapMode::LINEAR
    };
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .min_lod(0.0)
        .max_lod(mip_levels as f32)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
    let sampler = unsafe { ctx.device().create_sampler(&info, None)? };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_upload_skips_mipmaps() {
        let plan = plan_texture_upload(1);
        assert!(!plan
            .iter()
            .any(|step| matches!(step, UploadStep::GenerateMipmaps { .. })));
        assert_eq!(plan[3], UploadStep::TransitionToShaderRead);
    }

    #[test]
    fn multi_level_upload_always_generates_mipmaps() {
        for levels in 2..=12 {
            let plan = plan_texture_upload(levels);
            assert_eq!(
                plan,
                [
                    UploadStep::Stage,
                    UploadStep::TransitionToTransferDst,
                    UploadStep::CopyToImage,
                    UploadStep::GenerateMipmaps { blits: levels - 1 },
                ]
            );
        }
    }

    #[test]
    fn pixel_size_table() {
        assert_eq!(bytes_per_pixel(vk::Format::R8G8B8A8_UNORM).unwrap(), 4);
        assert_eq!(bytes_per_pixel(vk::Format::R32G32B32A32_SFLOAT).unwrap(), 16);
        assert_eq!(bytes_per_pixel(vk::Format::R8_UNORM).unwrap(), 1);
        assert!(matches!(
            bytes_per_pixel(vk::Format::BC7_UNORM_BLOCK),
            Err(GpuError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn texture_byte_counts_include_layers() {
        let mut desc = ImageDesc::texture_2d(4, 4, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::empty());
        assert_eq!(expected_texture_bytes(&desc).unwrap(), 64);
        desc.layer_count = 6;
        assert_eq!(expected_texture_bytes(&desc).unwrap(), 384);
    }

    #[test]
    fn zero_mip_request_means_full_chain() {
        let extent = vk::Extent3D {
            width: 64,
            height: 16,
            depth: 1,
        };
        assert_eq!(resolve_mip_levels(extent, 0), 7);
        assert_eq!(resolve_mip_levels(extent, 3), 3);
        assert_eq!(resolve_mip_levels(extent, 50), 7);
    }
}
