//! winit windows as Vulkan surfaces.

use ash::vk;
use ashlar_gpu::surface::{create_window_surface, required_surface_extensions};
use ashlar_gpu::SurfaceProvider;
use std::ffi::CString;
use std::sync::Arc;
use winit::window::Window;

/// A winit window that the swapchain presents to.
#[derive(Clone)]
pub struct WindowSurface {
    window: Arc<Window>,
}

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl SurfaceProvider for WindowSurface {
    fn required_instance_extensions(&self) -> ashlar_gpu::Result<Vec<CString>> {
        required_surface_extensions(self.window.as_ref())
    }

    unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> ashlar_gpu::Result<vk::SurfaceKHR> {
        // SAFETY: the window is kept alive by the Arc for as long as the surface
        unsafe { create_window_surface(entry, instance, self.window.as_ref()) }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        self.window.is_minimized().unwrap_or(false) || width == 0 || height == 0
    }
}
