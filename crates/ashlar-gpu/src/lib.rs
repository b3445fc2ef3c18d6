//! Vulkan rendering layer for Ashlar.
//!
//! This crate provides:
//! - Instance and device creation with capability detection
//! - Memory allocation via gpu-allocator
//! - Command submission and per-frame command rings
//! - Image, buffer and texture resources
//! - Frame buffers with attachments, MSAA resolve and ping-pong buffering
//! - Compute buffers
//! - Swapchain handling and frame pacing

pub mod attachment;
pub mod buffer;
pub mod capabilities;
pub mod capture;
pub mod command;
pub mod compute;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod features;
pub mod frame;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod mipmap;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod timestamp;

pub use attachment::{AttachmentKind, FrameBufferAttachment};
pub use buffer::BufferObject;
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use capture::{capture_attachment, CapturedImage};
pub use command::CommandRing;
pub use compute::{ComputeBuffer, ComputeBufferDesc};
pub use context::{GpuContext, GpuContextBuilder, QueueKind};
pub use descriptors::{
    write_combined_image_sampler, write_storage_buffer, write_storage_image, write_uniform_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use frame::{ActiveFrame, FramePacer, FrameSlot, PerFrame, PresentOutcome, PresentationBackend, IMAGE_COUNT};
pub use framebuffer::{FrameBuffer, FrameBufferDesc, LogicalFrameBuffer};
pub use image::{ImageDesc, ImageObject};
pub use instance::DeviceSelection;
pub use memory::{GpuAllocator, MemoryUsage};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig, PipelineTarget};
pub use shader::ShaderModule;
pub use surface::{SurfaceCapabilities, SurfaceContext, SurfaceProvider};
pub use swapchain::{Presenter, Swapchain, SwapchainConfig};
pub use timestamp::{GpuTimer, ScopeTiming};
