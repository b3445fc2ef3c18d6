//! Validation messenger and debug labels.
//!
//! Both are optional: they exist only when `VK_EXT_debug_utils` was enabled
//! on the instance. [`DebugLabels`] methods are no-ops otherwise.

use crate::error::Result;
use ash::vk;
use std::ffi::{CStr, CString};

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: Vulkan guarantees p_callback_data and its message are valid for the call
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "other",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "ashlar_gpu::vulkan", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "ashlar_gpu::vulkan", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::debug!(target: "ashlar_gpu::vulkan", "[{kind}] {message}");
        }
        _ => {
            tracing::trace!(target: "ashlar_gpu::vulkan", "[{kind}] {message}");
        }
    }

    vk::FALSE
}

/// Routes validation layer output into `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils`.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let messenger = loader.create_debug_utils_messenger(&create_info, None)?;
        Ok(Self { loader, messenger })
    }

    /// Remove the messenger.
    ///
    /// # Safety
    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Command buffer labels and object names.
pub struct DebugLabels {
    loader: Option<ash::ext::debug_utils::Device>,
}

impl DebugLabels {
    /// Load the device-level entry points when the capability is on.
    pub fn new(instance: &ash::Instance, device: &ash::Device, enabled: bool) -> Self {
        Self {
            loader: enabled.then(|| ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.loader.is_some()
    }

    /// Open a named region in a command buffer.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn begin(&self, cmd: vk::CommandBuffer, name: &str, color: [f32; 4]) {
        let Some(loader) = &self.loader else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color);
        loader.cmd_begin_debug_utils_label(cmd, &label);
    }

    /// Close the innermost region.
    ///
    /// # Safety
    /// The command buffer must be recording with an open label.
    pub unsafe fn end(&self, cmd: vk::CommandBuffer) {
        if let Some(loader) = &self.loader {
            loader.cmd_end_debug_utils_label(cmd);
        }
    }

    /// Attach a name to a Vulkan object for validation messages and captures.
    ///
    /// # Safety
    /// The handle must belong to this device.
    pub unsafe fn name_object<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(loader) = &self.loader else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = loader.set_debug_utils_object_name(&info) {
            tracing::warn!("Failed to name object {name:?}: {e}");
        }
    }
}
