//! `AshlarApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Ashlar applications.
///
/// The runner owns the window, the GPU context and the swapchain. Each frame
/// it calls [`update`](Self::update), then [`render`](Self::render) outside
/// any render pass, then [`draw_to_swapchain`](Self::draw_to_swapchain)
/// inside the swapchain's render pass, and presents.
pub trait AshlarApp: Sized {
    /// Initialize the application.
    ///
    /// Called once, after the GPU context and window have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// # Arguments
    /// * `ctx` - Application context with GPU and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record offscreen work: frame-buffer passes, compute dispatches.
    ///
    /// The command buffer is recording and outside any render pass.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Draw into the swapchain image. The swapchain render pass is active and
    /// has already been cleared.
    ///
    /// Default implementation draws nothing.
    #[allow(unused_variables)]
    fn draw_to_swapchain(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a new swapchain extent.
    ///
    /// The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown. The GPU is idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
