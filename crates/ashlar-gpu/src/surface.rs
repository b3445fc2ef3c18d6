//! Surface management for windowed rendering.
//!
//! The window system stays behind [`SurfaceProvider`]: it names the instance
//! extensions it needs, creates the surface, and reports its pixel size.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{select_present_mode, select_surface_format};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

/// A window that Vulkan can present to.
pub trait SurfaceProvider {
    /// Instance extensions needed to create the surface.
    fn required_instance_extensions(&self) -> Result<Vec<CString>>;

    /// Create the surface.
    ///
    /// # Safety
    /// The instance must have been created with
    /// [`required_instance_extensions`](Self::required_instance_extensions) enabled.
    unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;

    /// Framebuffer size in pixels.
    fn framebuffer_size(&self) -> (u32, u32);

    /// A minimized window has nothing to present to.
    fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width == 0 || height == 0
    }
}

/// Instance extensions required by the platform of `display`.
pub fn required_surface_extensions<D: HasDisplayHandle + ?Sized>(display: &D) -> Result<Vec<CString>> {
    let handle = display
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let names = ash_window::enumerate_required_extensions(handle.as_raw())
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;
    Ok(names
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) }.to_owned())
        .collect())
}

/// Create a surface for any raw window handle.
///
/// # Safety
/// The window must outlive the surface.
pub unsafe fn create_window_surface<W>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &W,
) -> Result<vk::SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle + ?Sized,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

    ash_window::create_surface(entry, instance, display.as_raw(), window_handle.as_raw(), None)
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
}

/// Surface context for windowed rendering.
pub struct SurfaceContext {
    ctx: Arc<GpuContext>,
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl SurfaceContext {
    /// Create the surface and check the graphics queue can present to it.
    pub fn new(ctx: &Arc<GpuContext>, provider: &dyn SurfaceProvider) -> Result<Self> {
        let surface = unsafe { provider.create_surface(ctx.entry(), ctx.instance())? };
        let loader = ash::khr::surface::Instance::new(ctx.entry(), ctx.instance());
        let context = Self {
            ctx: Arc::clone(ctx),
            surface,
            loader,
        };

        let supported = unsafe {
            context.loader.get_physical_device_surface_support(
                ctx.physical_device(),
                ctx.graphics_queue_family(),
                surface,
            )?
        };
        if !supported {
            return Err(GpuError::SurfaceCreation(
                "graphics queue family cannot present to this surface".to_string(),
            ));
        }
        Ok(context)
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Query surface capabilities.
    pub fn capabilities(&self) -> Result<SurfaceCapabilities> {
        let physical_device = self.ctx.physical_device();
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for SurfaceContext {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Get the recommended surface format.
    pub fn recommended_format(&self) -> Result<vk::SurfaceFormatKHR> {
        select_surface_format(&self.formats)
    }

    /// Get the recommended present mode.
    pub fn recommended_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, vsync)
    }
}
