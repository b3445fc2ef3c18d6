//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

/// Validation layer requested when validation is enabled.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Outcome of intersecting wanted names against what is installed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Negotiated<'a> {
    /// Wanted names that are installed.
    pub enabled: Vec<&'a CStr>,
    /// Wanted names that are not installed.
    pub missing: Vec<&'a CStr>,
}

impl Negotiated<'_> {
    /// Whether `name` made it into the enabled set.
    pub fn is_enabled(&self, name: &CStr) -> bool {
        self.enabled.iter().any(|n| *n == name)
    }
}

/// Intersect wanted layer/extension names with the installed set.
///
/// Order of `wanted` is preserved and duplicates are dropped.
pub fn negotiate<'a>(installed: &HashSet<String>, wanted: &[&'a CStr]) -> Negotiated<'a> {
    let mut result = Negotiated::default();
    for &name in wanted {
        if result.enabled.contains(&name) || result.missing.contains(&name) {
            continue;
        }
        let found = name
            .to_str()
            .map(|n| installed.contains(n))
            .unwrap_or(false);
        if found {
            result.enabled.push(name);
        } else {
            result.missing.push(name);
        }
    }
    result
}

/// Which physical device to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// Highest scoring device (discrete first, then VRAM).
    #[default]
    Best,
    /// Fixed index into the enumeration order. Out of range is fatal.
    Index(usize),
}

/// Instance creation parameters.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    pub app_name: String,
    pub enable_validation: bool,
    /// Extensions the instance cannot work without (surface extensions).
    pub required_extensions: Vec<CString>,
    /// Extensions enabled only when installed.
    pub optional_extensions: Vec<CString>,
}

/// A created instance and what was actually enabled on it.
pub struct CreatedInstance {
    pub instance: ash::Instance,
    pub debug_utils: bool,
    pub validation: bool,
}

/// Create a Vulkan instance.
///
/// Missing required extensions fail with [`GpuError::ExtensionNotSupported`];
/// missing optional extensions and layers are logged and skipped.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(entry: &ash::Entry, config: &InstanceConfig) -> Result<CreatedInstance> {
    let app_name = CString::new(config.app_name.as_str())
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Ashlar")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let installed_extensions: HashSet<String> = entry
        .enumerate_instance_extension_properties(None)?
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .filter_map(|n| n.to_str().ok().map(String::from))
        .collect();

    let required: Vec<&CStr> = config.required_extensions.iter().map(CString::as_c_str).collect();
    let required = negotiate(&installed_extensions, &required);
    if let Some(missing) = required.missing.first() {
        return Err(GpuError::ExtensionNotSupported(
            missing.to_string_lossy().into_owned(),
        ));
    }

    let mut optional: Vec<&CStr> = config
        .optional_extensions
        .iter()
        .map(CString::as_c_str)
        .collect();
    if config.enable_validation {
        optional.push(ash::ext::debug_utils::NAME);
    }
    #[cfg(target_os = "macos")]
    optional.push(ash::khr::portability_enumeration::NAME);

    let optional = negotiate(&installed_extensions, &optional);
    for name in &optional.missing {
        tracing::warn!("Instance extension {:?} not available, disabling", name);
    }

    let installed_layers: HashSet<String> = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .filter_map(|n| n.to_str().ok().map(String::from))
        .collect();

    let wanted_layers: Vec<&CStr> = if config.enable_validation {
        vec![VALIDATION_LAYER]
    } else {
        vec![]
    };
    let layers = negotiate(&installed_layers, &wanted_layers);
    for layer in &layers.missing {
        tracing::warn!("Validation layer {:?} not available", layer);
    }

    let extension_names: Vec<*const c_char> = required
        .enabled
        .iter()
        .chain(optional.enabled.iter())
        .map(|ext| ext.as_ptr())
        .collect();
    let layer_names: Vec<*const c_char> = layers.enabled.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = if optional.is_enabled(ash::khr::portability_enumeration::NAME) {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(CreatedInstance {
        instance,
        debug_utils: optional.is_enabled(ash::ext::debug_utils::NAME),
        validation: !layers.enabled.is_empty(),
    })
}

/// Select a physical device.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    selection: DeviceSelection,
) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    let scores: Vec<i32> = devices
        .iter()
        .map(|&device| score_physical_device(instance, device))
        .collect();

    let index = pick_device(&scores, selection)?;
    Ok(devices[index])
}

/// Resolve a selection against per-device scores.
///
/// A fixed index out of range, or no device with a positive score, is
/// [`GpuError::NoSuitableDevice`].
pub fn pick_device(scores: &[i32], selection: DeviceSelection) -> Result<usize> {
    match selection {
        DeviceSelection::Index(index) if index < scores.len() => Ok(index),
        DeviceSelection::Index(index) => {
            tracing::error!(
                "Physical device index {index} out of range ({} devices)",
                scores.len()
            );
            Err(GpuError::NoSuitableDevice)
        }
        DeviceSelection::Best => scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| score > 0)
            .max_by_key(|(_, &score)| score)
            .map(|(index, _)| index)
            .ok_or(GpuError::NoSuitableDevice),
    }
}

/// Score a physical device for selection.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i32 {
    let properties = instance.get_physical_device_properties(device);

    let api_version = properties.api_version;
    if vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 2 {
        return -1;
    }

    let mut score = 1;

    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 50,
        _ => {}
    }

    // +1 per GB of VRAM
    let memory = instance.get_physical_device_memory_properties(device);
    let vram_mb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size / (1024 * 1024))
        .sum();
    score += (vram_mb / 1024) as i32;

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn negotiation_intersects_and_reports_missing() {
        let have = installed(&["VK_KHR_surface", "VK_EXT_debug_utils"]);
        let wanted = [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_EXT_debug_utils"];

        let result = negotiate(&have, &wanted);
        assert_eq!(result.enabled, vec![c"VK_KHR_surface", c"VK_EXT_debug_utils"]);
        assert_eq!(result.missing, vec![c"VK_KHR_xlib_surface"]);
        assert!(result.is_enabled(c"VK_EXT_debug_utils"));
    }

    #[test]
    fn negotiation_drops_duplicates() {
        let have = installed(&["VK_KHR_surface"]);
        let result = negotiate(&have, &[c"VK_KHR_surface", c"VK_KHR_surface"]);
        assert_eq!(result.enabled.len(), 1);
    }

    #[test]
    fn fixed_index_out_of_range_is_fatal() {
        assert_eq!(pick_device(&[10, 20], DeviceSelection::Index(1)).unwrap(), 1);
        let err = pick_device(&[10, 20], DeviceSelection::Index(2)).unwrap_err();
        assert!(matches!(err, GpuError::NoSuitableDevice));
    }

    #[test]
    fn best_skips_unusable_devices() {
        assert_eq!(pick_device(&[-1, 5, 1001], DeviceSelection::Best).unwrap(), 2);
        assert!(pick_device(&[-1, -1], DeviceSelection::Best).is_err());
        assert!(pick_device(&[], DeviceSelection::Best).is_err());
    }
}
