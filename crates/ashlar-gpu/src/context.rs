//! GPU context management.
//!
//! [`GpuContext`] is the device layer: instance, physical and logical device,
//! one queue + command pool per [`QueueKind`], the allocator and the
//! descriptor pool. It is created once, shared as `Arc<GpuContext>`, and every
//! resource created from it holds that `Arc`, so the device always outlives
//! its resources.

use crate::capabilities::{clamp_sample_count, GpuCapabilities};
use crate::debug::{DebugLabels, DebugMessenger};
use crate::descriptors::DescriptorPool;
use crate::error::{check_device_lost, GpuError, Result};
use crate::features::{FeatureBlock, FeatureChainBuilder};
use crate::instance::{create_instance, select_physical_device, DeviceSelection, InstanceConfig};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use std::ffi::{c_char, CString};
use std::sync::Arc;

/// Queue roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [Self::Graphics, Self::Compute, Self::Transfer];

    const fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }
}

/// A queue together with its family and dedicated command pool.
#[derive(Debug, Clone, Copy)]
pub struct QueueInfo {
    pub queue: vk::Queue,
    pub family: u32,
    pub command_pool: vk::CommandPool,
}

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) queues: [QueueInfo; 3],
    pub(crate) descriptor_pool: DescriptorPool,
    pub(crate) labels: DebugLabels,
    debug_messenger: Option<DebugMessenger>,

    // Command pools are not thread safe; neither is submitting to one queue.
    command_pool_lock: Mutex<()>,
    submit_lock: Mutex<()>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Get the process-wide descriptor pool.
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// Debug labels and object names (no-ops without debug utils).
    pub fn labels(&self) -> &DebugLabels {
        &self.labels
    }

    /// Queue, family and pool for a role.
    pub fn queue(&self, kind: QueueKind) -> &QueueInfo {
        &self.queues[kind.index()]
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.queue(QueueKind::Graphics).queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.queue(QueueKind::Graphics).family
    }

    /// Get the compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.queue(QueueKind::Compute).queue
    }

    /// Get the compute queue family index.
    pub fn compute_queue_family(&self) -> u32 {
        self.queue(QueueKind::Compute).family
    }

    /// Serialize command pool allocation, reset and free.
    pub fn lock_command_pools(&self) -> MutexGuard<'_, ()> {
        self.command_pool_lock.lock()
    }

    /// Submit work to a queue.
    ///
    /// Submissions are serialized across threads. Device loss is logged and
    /// surfaces as [`GpuError::DeviceLost`].
    ///
    /// # Safety
    /// All handles referenced by `submits` must be valid and fully recorded.
    pub unsafe fn submit(
        &self,
        kind: QueueKind,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        let _guard = self.submit_lock.lock();
        self.device
            .queue_submit(self.queue(kind).queue, submits, fence)
            .map_err(|e| check_device_lost(e, "queue submit"))
    }

    /// Run a closure while holding the queue submission lock.
    ///
    /// Presentation goes through the graphics queue and must not race submits.
    pub fn with_submit_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.submit_lock.lock();
        f()
    }

    /// Format properties for optimal/linear tiling and buffers.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Whether `format` supports linear filtering in blits (mipmap generation).
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        self.format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    /// Pick the first depth format usable as an optimal-tiling depth attachment.
    pub fn find_depth_format(&self) -> Result<vk::Format> {
        [
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D32_SFLOAT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D16_UNORM,
        ]
        .into_iter()
        .find(|&format| {
            self.format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(GpuError::UnsupportedFormat {
            format: vk::Format::UNDEFINED,
            reason: "no depth attachment format supported",
        })
    }

    /// Clamp a requested sample count to what color and depth attachments support.
    pub fn usable_sample_count(&self, requested: vk::SampleCountFlags) -> vk::SampleCountFlags {
        clamp_sample_count(requested, self.capabilities.framebuffer_sample_counts)
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        let _guard = self.submit_lock.lock();
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| check_device_lost(e, "device wait idle"))?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.descriptor_pool.destroy(&self.device);
            for info in &self.queues {
                self.device.destroy_command_pool(info.command_pool, None);
            }

            // Free all VkDeviceMemory before the device goes away
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = &self.debug_messenger {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::info!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    device_selection: DeviceSelection,
    surface_extensions: Vec<CString>,
    extra_instance_extensions: Vec<CString>,
    enable_ray_tracing: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ashlar".to_string(),
            enable_validation: cfg!(debug_assertions),
            device_selection: DeviceSelection::Best,
            surface_extensions: Vec::new(),
            extra_instance_extensions: Vec::new(),
            enable_ray_tracing: false,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Choose the physical device.
    pub fn device(mut self, selection: DeviceSelection) -> Self {
        self.device_selection = selection;
        self
    }

    /// Instance extensions required to create a window surface.
    ///
    /// Setting any makes the swapchain device extension mandatory.
    pub fn surface_extensions(mut self, extensions: Vec<CString>) -> Self {
        self.surface_extensions = extensions;
        self
    }

    /// Extra instance extensions, enabled only when installed.
    pub fn instance_extension(mut self, name: CString) -> Self {
        self.extra_instance_extensions.push(name);
        self
    }

    /// Request the ray tracing feature group (falls back to off when missing).
    pub fn ray_tracing(mut self, enable: bool) -> Self {
        self.enable_ray_tracing = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<Arc<GpuContext>> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let presentable = !self.surface_extensions.is_empty();
        let created = unsafe {
            create_instance(
                &entry,
                &InstanceConfig {
                    app_name: self.app_name.clone(),
                    enable_validation: self.enable_validation,
                    required_extensions: self.surface_extensions.clone(),
                    optional_extensions: self.extra_instance_extensions.clone(),
                },
            )
        }?;
        let instance = created.instance;

        let debug_messenger = if created.debug_utils {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // From here on, failures must tear down what was created so far.
        let destroy_instance = |instance: &ash::Instance, messenger: &Option<DebugMessenger>| unsafe {
            if let Some(m) = messenger {
                m.destroy();
            }
            instance.destroy_instance(None);
        };

        let result = unsafe { self.create_device_objects(&instance, presentable, created.debug_utils) };
        match result {
            Ok(parts) => {
                tracing::info!("Selected GPU: {}", parts.capabilities.summary());
                Ok(Arc::new(GpuContext {
                    entry,
                    instance,
                    physical_device: parts.physical_device,
                    device: parts.device,
                    capabilities: parts.capabilities,
                    allocator: Mutex::new(parts.allocator),
                    queues: parts.queues,
                    descriptor_pool: parts.descriptor_pool,
                    labels: parts.labels,
                    debug_messenger,
                    command_pool_lock: Mutex::new(()),
                    submit_lock: Mutex::new(()),
                }))
            }
            Err(e) => {
                destroy_instance(&instance, &debug_messenger);
                Err(e)
            }
        }
    }

    unsafe fn create_device_objects(
        &self,
        instance: &ash::Instance,
        presentable: bool,
        debug_utils: bool,
    ) -> Result<DeviceParts> {
        let physical_device = select_physical_device(instance, self.device_selection)?;

        let mut capabilities = GpuCapabilities::query(instance, physical_device);
        capabilities.supports_debug_utils = debug_utils;

        let family_flags: Vec<vk::QueueFlags> = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .map(|family| family.queue_flags)
            .collect();
        let families = find_queue_families(&family_flags)?;

        let mut chain = FeatureChainBuilder::new(&capabilities.available_extensions);
        if !chain.extension(ash::khr::swapchain::NAME) && presentable {
            return Err(GpuError::ExtensionNotSupported(
                ash::khr::swapchain::NAME.to_string_lossy().into_owned(),
            ));
        }
        capabilities.supports_robustness2 = chain.add(FeatureBlock::robustness2());
        capabilities.supports_extended_dynamic_state = chain.add(FeatureBlock::extended_dynamic_state());
        capabilities.supports_synchronization2 = chain.add(FeatureBlock::synchronization2());
        capabilities.supports_buffer_device_address = chain.add(FeatureBlock::buffer_device_address());
        capabilities.supports_ray_tracing = self.enable_ray_tracing && chain.add_ray_tracing();
        capabilities.supports_calibrated_timestamps =
            chain.extension(ash::ext::calibrated_timestamps::NAME);

        let device = Arc::new(create_device(instance, physical_device, &families, &mut chain)?);

        let labels = DebugLabels::new(instance, &device, debug_utils);

        let queues = match create_queue_infos(&device, &families) {
            Ok(queues) => queues,
            Err(e) => {
                device.destroy_device(None);
                return Err(e);
            }
        };

        let descriptor_pool = match DescriptorPool::with_default_sizes(&device) {
            Ok(pool) => pool,
            Err(e) => {
                for info in &queues {
                    device.destroy_command_pool(info.command_pool, None);
                }
                device.destroy_device(None);
                return Err(e);
            }
        };

        let allocator = match GpuAllocator::new(
            instance,
            Arc::clone(&device),
            physical_device,
            capabilities.supports_buffer_device_address,
        ) {
            Ok(allocator) => allocator,
            Err(e) => {
                descriptor_pool.destroy(&device);
                for info in &queues {
                    device.destroy_command_pool(info.command_pool, None);
                }
                device.destroy_device(None);
                return Err(e);
            }
        };

        Ok(DeviceParts {
            physical_device,
            device,
            capabilities,
            allocator,
            queues,
            descriptor_pool,
            labels,
        })
    }
}

struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: GpuAllocator,
    queues: [QueueInfo; 3],
    descriptor_pool: DescriptorPool,
    labels: DebugLabels,
}

/// Queue family indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Distinct families, each requested exactly once at device creation.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }

    fn for_kind(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        }
    }
}

/// Find queue families for graphics, compute, and transfer.
///
/// Dedicated compute and transfer families are preferred; otherwise the
/// graphics family serves every role.
pub fn find_queue_families(families: &[vk::QueueFlags]) -> Result<QueueFamilyIndices> {
    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, flags) in families.iter().enumerate() {
        let i = i as u32;

        if flags.contains(vk::QueueFlags::COMPUTE)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && !flags.contains(vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;
    let compute = compute_family.unwrap_or(graphics);
    let transfer = transfer_family.unwrap_or(compute);

    Ok(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Create the logical device.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilyIndices,
    chain: &mut FeatureChainBuilder,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> =
        chain.extension_names().iter().map(|ext| ext.as_ptr()).collect();

    let supported = instance.get_physical_device_features(physical_device);
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .sample_rate_shading(supported.sample_rate_shading == vk::TRUE)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);
    let create_info = chain.link(create_info);

    let device = instance.create_device(physical_device, &create_info, None)?;
    Ok(device)
}

/// Fetch queues and create one resettable command pool per role.
unsafe fn create_queue_infos(
    device: &ash::Device,
    families: &QueueFamilyIndices,
) -> Result<[QueueInfo; 3]> {
    let mut infos = [QueueInfo {
        queue: vk::Queue::null(),
        family: 0,
        command_pool: vk::CommandPool::null(),
    }; 3];

    for kind in QueueKind::ALL {
        let family = families.for_kind(kind);
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match device.create_command_pool(&pool_info, None) {
            Ok(pool) => pool,
            Err(e) => {
                for info in infos.iter().filter(|i| i.command_pool != vk::CommandPool::null()) {
                    device.destroy_command_pool(info.command_pool, None);
                }
                return Err(e.into());
            }
        };
        infos[kind.index()] = QueueInfo {
            queue: device.get_device_queue(family, 0),
            family,
            command_pool,
        };
    }

    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_universal_family_is_requested_once() {
        let families = find_queue_families(&[vk::QueueFlags::GRAPHICS
            | vk::QueueFlags::COMPUTE
            | vk::QueueFlags::TRANSFER])
        .unwrap();
        assert_eq!(families.graphics, 0);
        assert_eq!(families.compute, 0);
        assert_eq!(families.transfer, 0);
        assert_eq!(families.unique(), vec![0]);
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let families = find_queue_families(&[
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::TRANSFER,
        ])
        .unwrap();
        assert_eq!(
            families,
            QueueFamilyIndices {
                graphics: 0,
                compute: 1,
                transfer: 2
            }
        );
        assert_eq!(families.unique(), vec![0, 1, 2]);
    }

    #[test]
    fn transfer_falls_back_to_compute_family() {
        let families = find_queue_families(&[
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ])
        .unwrap();
        assert_eq!(families.transfer, 1);
        assert_eq!(families.unique(), vec![0, 1]);
    }

    #[test]
    fn no_graphics_family_is_fatal() {
        let err = find_queue_families(&[vk::QueueFlags::COMPUTE]).unwrap_err();
        assert!(matches!(err, GpuError::NoSuitableDevice));
    }
}
