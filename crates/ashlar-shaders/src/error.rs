//! Shader error types.

use thiserror::Error;

use crate::diagnostics::DiagnosticPhase;

/// Shader compilation and reflection errors.
#[derive(Error, Debug)]
pub enum ShaderError {
    /// The file suffix does not name a shader stage.
    #[error("Unknown shader stage '{0}'")]
    UnknownStage(String),

    /// The native compiler could not be initialized.
    #[error("Shader compiler unavailable")]
    CompilerUnavailable,

    /// Compilation failed; details were delivered to the diagnostic callback.
    #[error("{name}: {phase} failed with {errors} error(s): {first}")]
    Compilation {
        name: String,
        phase: DiagnosticPhase,
        errors: usize,
        first: String,
    },

    /// The SPIR-V module could not be reflected.
    #[error("Reflection failed: {0}")]
    Reflection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ShaderError>;
