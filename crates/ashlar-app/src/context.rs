//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use ashlar_gpu::{FramePacer, GpuContext, Presenter, Swapchain, SwapchainConfig};
use winit::window::Window;

use crate::window::WindowSurface;

/// Application context shared across all app methods.
pub struct AppContext {
    pub(crate) pacer: FramePacer<Presenter>,
    /// GPU context with device and queues.
    pub gpu: Arc<GpuContext>,
    surface: WindowSurface,
    /// Total frames rendered.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    pub(crate) fn new(gpu: Arc<GpuContext>, surface: WindowSurface, config: SwapchainConfig) -> anyhow::Result<Self> {
        let presenter = Presenter::new(&gpu, &surface, config)?;
        let extent = presenter.swapchain().extent();
        tracing::info!("Swapchain created: {}x{}", extent.width, extent.height);

        Ok(Self {
            pacer: FramePacer::new(presenter),
            gpu,
            surface,
            frame_count: 0,
            last_frame_time: Instant::now(),
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        self.surface.window()
    }

    pub(crate) fn surface(&self) -> &WindowSurface {
        &self.surface
    }

    pub fn swapchain(&self) -> &Swapchain {
        self.pacer.backend().swapchain()
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain().extent()
    }

    pub fn width(&self) -> u32 {
        self.extent().width
    }

    pub fn height(&self) -> u32 {
        self.extent().height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }
}
