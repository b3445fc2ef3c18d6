//! Ashlar feedback viewer
//!
//! Renders a moving spot into a ping-pong frame buffer that samples its own
//! previous result, then presents the latest buffer to the window.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p ashlar-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--decay <F>`: Fraction of the previous frame kept each frame (default: 0.96)
//! - `--msaa <N>`: Sample count for the offscreen pass (default: 1)
//! - `-o, --output <PATTERN>`: Screenshot path pattern (use `{}` for frame number)
//! - `-f, --frame <N>`: Capture this frame automatically
//! - `--log-file <PATH>`: Also write logs to a file
//! - `-h, --help`: Print help message
//!
//! Press F12 to capture the current frame.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod params;

use ashlar_app::{run_app, AppConfig};

use crate::app::Viewer;
use crate::params::ViewerParams;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let params = ViewerParams::from_args(std::env::args().skip(1));
    let mut config = AppConfig::new("Ashlar - Feedback Viewer").with_size(WIDTH, HEIGHT);
    if let Some(path) = params.log_file.clone() {
        config = config.with_log_file(path);
    }

    run_app::<Viewer>(config)
}

fn print_help() {
    eprintln!(
        "Ashlar feedback viewer

USAGE:
    cargo run -p ashlar-viewer -- [OPTIONS]

OPTIONS:
    --decay <F>             Fraction of the previous frame kept (default: 0.96)
    --msaa <N>              Offscreen sample count: 1, 2, 4 or 8 (default: 1)
    -o, --output <PATTERN>  Screenshot path pattern (use {{}} for frame number)
                            Default: ashlar_{{}}.png
    -f, --frame <N>         Capture frame N automatically
    --log-file <PATH>       Also write logs to PATH
    -h, --help              Print this help message

KEYS:
    F12                     Capture the current frame

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
