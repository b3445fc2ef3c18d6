//! Per-frame context for rendering.

use ash::vk;
use ashlar_gpu::FrameSlot;

/// Context for the current frame being rendered.
pub struct FrameContext {
    /// Command buffer for recording rendering commands.
    pub command_buffer: vk::CommandBuffer,
    /// Frame slot; index per-frame resources with it.
    pub slot: FrameSlot,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Swapchain extent.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
}
