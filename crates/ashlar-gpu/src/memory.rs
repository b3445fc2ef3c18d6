//! GPU memory allocation adapter.
//!
//! Every buffer and image in the crate is carved out of one
//! [`GpuAllocator`] per device. Callers choose a [`MemoryUsage`] policy and
//! get back a raw handle bound to its allocation.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Memory placement policy for buffers and images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Device-local, not host mappable.
    GpuOnly,
    /// Host-visible memory the GPU reads (uploads, uniforms).
    CpuToGpu,
    /// Host-visible memory the GPU writes (readbacks).
    GpuToCpu,
}

impl MemoryUsage {
    /// The allocator location backing this policy.
    pub fn location(self) -> MemoryLocation {
        match self {
            Self::GpuOnly => MemoryLocation::GpuOnly,
            Self::CpuToGpu => MemoryLocation::CpuToGpu,
            Self::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }

    /// Whether memory with this policy can be mapped by the host.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }

    /// Fail with [`GpuError::NotHostVisible`] for GPU-only memory.
    pub fn ensure_host_access(self) -> Result<()> {
        if self.is_host_visible() {
            Ok(())
        } else {
            Err(GpuError::NotHostVisible)
        }
    }
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        buffer_device_address: bool,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    /// Create a buffer and bind fresh memory to it.
    pub fn allocate_buffer(
        &mut self,
        create_info: &vk::BufferCreateInfo,
        usage: MemoryUsage,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let device = Arc::clone(&self.device);
        let buffer = unsafe { device.create_buffer(create_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: usage.location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            let _ = self.free(allocation);
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok((buffer, allocation))
    }

    /// Create an image and bind fresh memory to it.
    pub fn allocate_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        usage: MemoryUsage,
        name: &str,
    ) -> Result<(vk::Image, Allocation)> {
        let device = Arc::clone(&self.device);
        let image = unsafe { device.create_image(create_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: usage.location(),
                    linear: create_info.tiling == vk::ImageTiling::LINEAR,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            let _ = self.free(allocation);
            unsafe { device.destroy_image(image, None) };
            return Err(e.into());
        }

        Ok((image, allocation))
    }

    /// Return an allocation to the allocator.
    pub fn free(&mut self, allocation: Allocation) -> Result<()> {
        self.inner()?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_only_memory_refuses_host_access() {
        assert!(matches!(
            MemoryUsage::GpuOnly.ensure_host_access(),
            Err(GpuError::NotHostVisible)
        ));
        assert!(MemoryUsage::CpuToGpu.ensure_host_access().is_ok());
        assert!(MemoryUsage::GpuToCpu.ensure_host_access().is_ok());
    }

    #[test]
    fn policies_map_to_allocator_locations() {
        assert_eq!(MemoryUsage::GpuOnly.location(), MemoryLocation::GpuOnly);
        assert_eq!(MemoryUsage::CpuToGpu.location(), MemoryLocation::CpuToGpu);
        assert_eq!(MemoryUsage::GpuToCpu.location(), MemoryLocation::GpuToCpu);
    }
}
