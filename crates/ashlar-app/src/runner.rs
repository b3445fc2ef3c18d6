//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ashlar_gpu::{DeviceSelection, GpuContextBuilder, GpuError, SurfaceProvider, SwapchainConfig};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::AshlarApp;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::frame::FrameContext;
use crate::logging::init_logging;
use crate::window::WindowSurface;

/// Whether an error must end the application.
pub fn is_fatal(error: &anyhow::Error) -> bool {
    error.downcast_ref::<GpuError>().is_some_and(GpuError::is_fatal)
}

/// Run an application with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and runs the
/// event loop until the window closes. Fatal GPU errors end the loop and are
/// returned.
pub fn run_app<A: AshlarApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging(config.log_file.as_deref())?;
    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        exit_error: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.exit_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// winit handler owning the application state.
struct AppRunner<A: AshlarApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    exit_error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: AshlarApp> {
    app: A,
    ctx: AppContext,
    target_frame_time: Option<Duration>,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: AshlarApp + 'static> AppRunner<A> {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("Fatal error: {e:#}");
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        self.exit_error = Some(e);
        event_loop.exit();
    }

    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let surface = WindowSurface::new(window);

        let device = self
            .config
            .device_index
            .map_or(DeviceSelection::Best, DeviceSelection::Index);
        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .device(device)
            .surface_extensions(surface.required_instance_extensions()?)
            .build()?;
        info!("GPU: {}", gpu.capabilities().summary());

        let swapchain_config = SwapchainConfig {
            vsync: self.config.vsync,
            ..SwapchainConfig::default()
        };
        let mut ctx = AppContext::new(gpu, surface, swapchain_config)?;
        let app = A::init(&mut ctx)?;

        Ok(AppState {
            app,
            ctx,
            target_frame_time: self.config.target_frame_time(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }
}

impl<A: AshlarApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");
        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };
        if state.app.on_event(&event) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
                return;
            }
            WindowEvent::RedrawRequested => state.render_frame(),
            WindowEvent::Resized(size) => state.handle_resize(size.width, size.height),
            _ => Ok(()),
        };

        if let Err(e) = result {
            if is_fatal(&e) {
                self.fail(event_loop, e);
            } else {
                error!("Frame error: {e:#}");
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window().request_redraw();
        }
    }
}

impl<A: AshlarApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        if self.ctx.surface().is_minimized() {
            // Nothing to present to; avoid spinning
            thread::sleep(Duration::from_millis(10));
            return Ok(());
        }

        let frame_start = Instant::now();
        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }

        self.app.update(&self.ctx, dt);

        let resizes = self.ctx.pacer.resize_count();
        let Some(active) = self.ctx.pacer.begin_frame()? else {
            // Out of date; the swapchain was recreated and this frame is skipped
            return self.notify_resize(resizes);
        };

        let presenter = self.ctx.pacer.backend();
        let mut frame = FrameContext {
            command_buffer: presenter.command_buffer(active.slot),
            slot: active.slot,
            image_index: active.image_index,
            extent: presenter.swapchain().extent(),
            dt,
            frame_number: self.ctx.frame_count,
        };

        // The fence of this slot is already reset, so the frame is submitted
        // even when the app fails; app errors are reported afterwards.
        let rendered = self.app.render(&self.ctx, &mut frame);
        let drawn = unsafe {
            self.ctx
                .swapchain()
                .begin_render_pass(frame.command_buffer, frame.image_index)
                .map_err(anyhow::Error::from)
                .and_then(|()| {
                    let drawn = if rendered.is_ok() {
                        self.app.draw_to_swapchain(&self.ctx, &mut frame)
                    } else {
                        Ok(())
                    };
                    self.ctx.gpu.device().cmd_end_render_pass(frame.command_buffer);
                    drawn
                })
        };

        self.ctx.pacer.end_frame(active)?;
        self.ctx.frame_count += 1;
        self.notify_resize(resizes)?;
        rendered?;
        drawn?;

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }

    /// Tell the app when the pacer recreated the swapchain since `resizes_before`.
    fn notify_resize(&mut self, resizes_before: u64) -> anyhow::Result<()> {
        if self.ctx.pacer.resize_count() == resizes_before {
            return Ok(());
        }
        let extent = self.ctx.extent();
        self.app.on_resize(&mut self.ctx, extent.width, extent.height)
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        let resizes = self.ctx.pacer.resize_count();
        self.ctx.pacer.backend_mut().set_desired_extent(width, height);
        self.ctx.pacer.resize()?;
        self.notify_resize(resizes)?;

        info!("Resized to {width}x{height}");
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.ctx.frame_count > 0 {
            let avg_fps = self.fps_sum / self.ctx.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            warn!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_gpu_errors_end_the_app() {
        assert!(is_fatal(&anyhow::Error::new(GpuError::DeviceLost)));
        assert!(is_fatal(&anyhow::Error::new(GpuError::NoSuitableDevice)));
        assert!(!is_fatal(&anyhow::Error::new(GpuError::NotHostVisible)));
        assert!(!is_fatal(&anyhow::anyhow!("app specific failure")));
    }
}
