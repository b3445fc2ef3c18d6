//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The logical device was lost. Nothing created from it can be trusted afterwards.
    #[error("Device lost")]
    DeviceLost,

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// The format cannot be used the way it was requested.
    #[error("Unsupported format {format:?}: {reason}")]
    UnsupportedFormat {
        format: vk::Format,
        reason: &'static str,
    },

    /// The layout transition pair is not in the barrier table.
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// The surface cannot hold the fixed number of swapchain images.
    #[error("Swapchain needs {wanted} images but the surface supports {min}..={max}")]
    SwapchainImageCount { wanted: u32, min: u32, max: u32 },

    /// Host access was attempted on memory that is not host visible.
    #[error("Buffer memory is not host visible")]
    NotHostVisible,

    /// A requested extent has a zero dimension.
    #[error("Invalid size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// Attachment or target count outside the accepted range.
    #[error("Invalid buffer count {count} (expected 1..={max})")]
    InvalidBufferCount { count: u32, max: u32 },

    /// A pass would sample from the same buffer it renders into.
    #[error("Pass samples image view {0:?} which is also being written")]
    FeedbackHazard(vk::ImageView),

    /// A copy or write does not fit into its destination.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether the error belongs to the unrecoverable class.
    ///
    /// Callers at the application boundary exit when this returns true.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost
                | Self::NoSuitableDevice
                | Self::ExtensionNotSupported(_)
                | Self::SwapchainImageCount { .. }
                | Self::UnsupportedLayoutTransition { .. }
                | Self::Vulkan(vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Map a submit/wait result, logging device loss.
pub(crate) fn check_device_lost(result: vk::Result, what: &str) -> GpuError {
    if result == vk::Result::ERROR_DEVICE_LOST {
        tracing::error!("Device lost during {what}");
        GpuError::DeviceLost
    } else {
        GpuError::Vulkan(result)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_is_fatal() {
        assert!(GpuError::DeviceLost.is_fatal());
        assert!(check_device_lost(vk::Result::ERROR_DEVICE_LOST, "submit").is_fatal());
        assert!(!GpuError::NotHostVisible.is_fatal());
        assert!(!GpuError::InvalidSize {
            width: 0,
            height: 4
        }
        .is_fatal());
    }

    #[test]
    fn other_results_pass_through() {
        let err = check_device_lost(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "submit");
        assert!(matches!(
            err,
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));
    }
}
