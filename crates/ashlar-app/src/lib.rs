//! Application framework for Ashlar.
//!
//! This crate handles the boilerplate around the GPU layer:
//! - Logging setup (console and optional file)
//! - Window creation and the window surface
//! - GPU context, swapchain and frame pacing
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use ashlar_app::{run_app, AppConfig, AppContext, AshlarApp, FrameContext};
//!
//! struct MyApp;
//!
//! impl AshlarApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext, _frame: &mut FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("example"))
//! }
//! ```

mod app;
mod config;
mod context;
mod frame;
mod logging;
mod runner;
mod window;

pub use app::AshlarApp;
pub use config::AppConfig;
pub use context::AppContext;
pub use frame::FrameContext;
pub use logging::{init_logging, DEFAULT_FILTER};
pub use runner::{is_fatal, run_app};
pub use window::WindowSurface;

// Re-export commonly used types for convenience
pub use ashlar_gpu::{GpuContext, GpuContextBuilder};
pub use winit::event::WindowEvent;
