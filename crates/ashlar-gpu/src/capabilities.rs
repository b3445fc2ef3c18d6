//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
///
/// Optional features are plain flags. Every call site that uses an optional
/// feature checks its flag first; an unsupported extension never fails
/// device creation.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    // Optional extension features
    /// VK_EXT_robustness2 (null descriptors)
    pub supports_robustness2: bool,
    /// VK_EXT_extended_dynamic_state
    pub supports_extended_dynamic_state: bool,
    /// VK_KHR_synchronization2
    pub supports_synchronization2: bool,
    /// VK_KHR_buffer_device_address
    pub supports_buffer_device_address: bool,
    /// Acceleration structures, ray tracing pipelines and deferred host operations together.
    pub supports_ray_tracing: bool,
    /// VK_EXT_calibrated_timestamps
    pub supports_calibrated_timestamps: bool,
    /// VK_EXT_debug_utils (instance level, filled in after instance creation)
    pub supports_debug_utils: bool,

    // Limits
    /// Sample counts usable for both color and depth framebuffer attachments.
    pub framebuffer_sample_counts: vk::SampleCountFlags,
    /// Largest 2D image dimension.
    pub max_image_dimension_2d: u32,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self::from_parts(
            &properties,
            available_extensions,
            device_local_memory_mb,
            device_name,
        )
    }

    fn from_parts(
        properties: &vk::PhysicalDeviceProperties,
        available_extensions: HashSet<String>,
        device_local_memory_mb: u64,
        device_name: String,
    ) -> Self {
        let has = |name: &CStr| {
            name.to_str()
                .map(|n| available_extensions.contains(n))
                .unwrap_or(false)
        };
        let limits = &properties.limits;

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,

            supports_robustness2: has(ash::ext::robustness2::NAME),
            supports_extended_dynamic_state: has(ash::ext::extended_dynamic_state::NAME),
            supports_synchronization2: has(ash::khr::synchronization2::NAME),
            supports_buffer_device_address: has(ash::khr::buffer_device_address::NAME),
            supports_ray_tracing: has(ash::khr::acceleration_structure::NAME)
                && has(ash::khr::ray_tracing_pipeline::NAME)
                && has(ash::khr::deferred_host_operations::NAME),
            supports_calibrated_timestamps: has(ash::ext::calibrated_timestamps::NAME),
            supports_debug_utils: false,

            framebuffer_sample_counts: limits.framebuffer_color_sample_counts
                & limits.framebuffer_depth_sample_counts,
            max_image_dimension_2d: limits.max_image_dimension2_d,
            timestamp_period: limits.timestamp_period,
            device_local_memory_mb,

            available_extensions,
        }
    }

    /// Check whether a device extension is available.
    pub fn has_extension(&self, name: &CStr) -> bool {
        name.to_str()
            .map(|n| self.available_extensions.contains(n))
            .unwrap_or(false)
    }

    /// Highest sample count usable for color and depth attachments.
    pub fn max_sample_count(&self) -> vk::SampleCountFlags {
        clamp_sample_count(vk::SampleCountFlags::TYPE_64, self.framebuffer_sample_counts)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM - RTX {}",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            if self.supports_ray_tracing { "on" } else { "off" },
        )
    }
}

/// Pick the highest supported sample count that does not exceed `requested`.
pub fn clamp_sample_count(
    requested: vk::SampleCountFlags,
    supported: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    const ORDER: [vk::SampleCountFlags; 7] = [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
        vk::SampleCountFlags::TYPE_1,
    ];

    ORDER
        .into_iter()
        .filter(|count| count.as_raw() <= requested.as_raw())
        .find(|count| supported.contains(*count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn ray_tracing_needs_all_three_extensions() {
        let properties = vk::PhysicalDeviceProperties::default();
        let partial: HashSet<String> = [
            "VK_KHR_acceleration_structure",
            "VK_KHR_ray_tracing_pipeline",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let caps = GpuCapabilities::from_parts(&properties, partial, 0, "gpu".into());
        assert!(!caps.supports_ray_tracing);

        let full: HashSet<String> = [
            "VK_KHR_acceleration_structure",
            "VK_KHR_ray_tracing_pipeline",
            "VK_KHR_deferred_host_operations",
            "VK_EXT_robustness2",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let caps = GpuCapabilities::from_parts(&properties, full, 0, "gpu".into());
        assert!(caps.supports_ray_tracing);
        assert!(caps.supports_robustness2);
        assert!(!caps.supports_synchronization2);
    }

    #[test]
    fn sample_count_clamps_down_to_supported() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_8, supported),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_2, supported),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_4, vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
