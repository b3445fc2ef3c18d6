//! Descriptor set management.
//!
//! One [`DescriptorPool`] lives in the [`GpuContext`](crate::GpuContext) for the
//! whole device. Vulkan pools are externally synchronized, so allocation, free
//! and reset take an internal lock.

use crate::error::{check_device_lost, GpuError, Result};
use ash::vk;
use parking_lot::Mutex;

/// Sets the shared pool can hold.
pub const DEFAULT_MAX_SETS: u32 = 1024;

/// Pool sizes for the shared pool: every descriptor type the framework writes.
pub fn default_pool_sizes() -> [vk::DescriptorPoolSize; 4] {
    [
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1024),
        (vk::DescriptorType::STORAGE_IMAGE, 256),
        (vk::DescriptorType::UNIFORM_BUFFER, 256),
        (vk::DescriptorType::STORAGE_BUFFER, 256),
    ]
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
}

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a combined image sampler binding, as used by frame-buffer attachments.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, stage_flags)
    }

    /// Bindings added so far.
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'a>] {
        &self.bindings
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        if let Some(duplicate) = duplicate_binding(&self.bindings) {
            return Err(GpuError::InvalidState(format!("binding {duplicate} declared twice")));
        }
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn duplicate_binding(bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> Option<u32> {
    bindings.iter().enumerate().find_map(|(i, b)| {
        bindings[..i]
            .iter()
            .any(|other| other.binding == b.binding)
            .then_some(b.binding)
    })
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    lock: Mutex<()>,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        tracing::debug!("Created descriptor pool for {max_sets} sets");
        Ok(Self {
            pool,
            lock: Mutex::new(()),
        })
    }

    /// Create the shared pool with [`default_pool_sizes`].
    pub fn with_default_sizes(device: &ash::Device) -> Result<Self> {
        unsafe { Self::new(device, DEFAULT_MAX_SETS, &default_pool_sizes()) }
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one descriptor set per layout.
    ///
    /// # Safety
    /// The device must be the one the pool was created on.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let _guard = self.lock.lock();
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                GpuError::AllocationFailed(format!("descriptor pool exhausted: {e}"))
            }
            e => check_device_lost(e, "descriptor allocation"),
        })?;
        Ok(sets)
    }

    /// Return sets to the pool.
    ///
    /// # Safety
    /// The sets must not be in use by pending command buffers.
    pub unsafe fn free(&self, device: &ash::Device, sets: &[vk::DescriptorSet]) -> Result<()> {
        let _guard = self.lock.lock();
        unsafe { device.free_descriptor_sets(self.pool, sets)? };
        Ok(())
    }

    /// Reset the pool, freeing all descriptor sets.
    ///
    /// # Safety
    /// No descriptor sets may be in use.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        let _guard = self.lock.lock();
        unsafe { device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())? };
        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    info: vk::DescriptorBufferInfo,
) {
    unsafe { write_buffer(device, dst_set, binding, vk::DescriptorType::UNIFORM_BUFFER, info) };
}

/// Write a storage buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_storage_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    info: vk::DescriptorBufferInfo,
) {
    unsafe { write_buffer(device, dst_set, binding, vk::DescriptorType::STORAGE_BUFFER, info) };
}

unsafe fn write_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: vk::DescriptorBufferInfo,
) {
    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Write a storage image descriptor, e.g. a compute target.
///
/// # Safety
/// Device and image view must be valid.
pub unsafe fn write_storage_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    info: vk::DescriptorImageInfo,
) {
    unsafe { write_image(device, dst_set, binding, vk::DescriptorType::STORAGE_IMAGE, info) };
}

/// Write a combined image sampler descriptor, e.g. a frame-buffer attachment.
///
/// # Safety
/// Device, sampler and image view must be valid.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    info: vk::DescriptorImageInfo,
) {
    unsafe { write_image(device, dst_set, binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, info) };
}

unsafe fn write_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: vk::DescriptorImageInfo,
) {
    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .image_info(std::slice::from_ref(&info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_covers_written_types() {
        let sizes = default_pool_sizes();
        for ty in [
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
        ] {
            assert!(sizes.iter().any(|s| s.ty == ty && s.descriptor_count > 0), "{ty:?}");
        }
    }

    #[test]
    fn builder_records_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .sampled_image(0, vk::ShaderStageFlags::FRAGMENT)
            .storage_image(1, vk::ShaderStageFlags::COMPUTE)
            .uniform_buffer(2, vk::ShaderStageFlags::ALL_GRAPHICS);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(bindings[2].binding, 2);
        assert_eq!(duplicate_binding(bindings), None);
    }

    #[test]
    fn duplicate_binding_is_found() {
        let builder = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .storage_image(0, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(duplicate_binding(builder.bindings()), Some(0));
    }
}
