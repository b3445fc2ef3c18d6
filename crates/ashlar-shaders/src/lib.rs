//! Shader compilation for Ashlar.
//!
//! Built-in GLSL shaders are compiled to SPIR-V at build time with shaderc.
//! [`ShaderCompiler`] does the same at runtime, reporting [`Diagnostic`]s
//! through a callback and reflecting which uniforms the module uses.

pub mod compiler;
pub mod diagnostics;
pub mod error;
pub mod reflect;
pub mod stage;

pub use compiler::{CompileConfig, CompiledShader, ShaderCompiler};
pub use diagnostics::{Diagnostic, DiagnosticPhase, Severity};
pub use error::{Result, ShaderError};
pub use reflect::{descriptor_bindings, uniform_usage, DescriptorBinding, UniformUsage};
pub use stage::ShaderStage;

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static FULLSCREEN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/fullscreen_vert.spv"));
    pub static FEEDBACK_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/feedback_frag.spv"));
    pub static PRESENT_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/present_frag.spv"));
    pub static FILL_COMP: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/fill_comp.spv"));
}

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static FULLSCREEN_VERT: OnceLock<Vec<u32>> = OnceLock::new();
static FEEDBACK_FRAG: OnceLock<Vec<u32>> = OnceLock::new();
static PRESENT_FRAG: OnceLock<Vec<u32>> = OnceLock::new();
static FILL_COMP: OnceLock<Vec<u32>> = OnceLock::new();

/// Vertex shader emitting one triangle that covers the viewport, with UVs.
pub fn fullscreen_vertex_shader() -> &'static [u32] {
    FULLSCREEN_VERT.get_or_init(|| bytes_to_spirv(spirv_bytes::FULLSCREEN_VERT))
}

/// Fragment shader blending the previous frame (set 0, binding 0) with a moving spot.
///
/// Push constants: `time: f32`, `decay: f32`.
pub fn feedback_fragment_shader() -> &'static [u32] {
    FEEDBACK_FRAG.get_or_init(|| bytes_to_spirv(spirv_bytes::FEEDBACK_FRAG))
}

/// Fragment shader copying the texture at set 0, binding 0.
pub fn present_fragment_shader() -> &'static [u32] {
    PRESENT_FRAG.get_or_init(|| bytes_to_spirv(spirv_bytes::PRESENT_FRAG))
}

/// Compute shader storing one color into the `rgba32f` image at set 0, binding 0.
///
/// Local size 8x8. Push constants: `color: vec4`.
pub fn fill_compute_shader() -> &'static [u32] {
    FILL_COMP.get_or_init(|| bytes_to_spirv(spirv_bytes::FILL_COMP))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_shaders_load() {
        for shader in [
            fullscreen_vertex_shader(),
            feedback_fragment_shader(),
            present_fragment_shader(),
            fill_compute_shader(),
        ] {
            assert_eq!(shader[0], 0x0723_0203, "Invalid SPIR-V magic number");
            assert!(shader.len() > 20, "Shader too small");
        }
    }

    #[test]
    fn feedback_shader_binds_previous_frame() {
        let bindings = descriptor_bindings(feedback_fragment_shader(), "main").unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!((bindings[0].set, bindings[0].binding), (0, 0));
    }

    #[test]
    fn fill_shader_binds_one_storage_image() {
        let bindings = descriptor_bindings(fill_compute_shader(), "main").unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!((bindings[0].set, bindings[0].binding), (0, 0));
    }
}
