//! Runtime GLSL to SPIR-V compilation.

use crate::diagnostics::{parse_messages, Diagnostic, DiagnosticPhase, Severity};
use crate::error::{Result, ShaderError};
use crate::reflect::{uniform_usage, UniformUsage};
use crate::stage::ShaderStage;
use std::path::Path;

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub words: Vec<u32>,
    pub uniforms: UniformUsage,
}

/// Compiler options.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Optimize for performance. Optimized modules may drop unused uniforms.
    pub optimize: bool,
    pub debug_info: bool,
    /// `(name, value)` preprocessor definitions.
    pub defines: Vec<(String, Option<String>)>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            optimize: false,
            debug_info: cfg!(debug_assertions),
            defines: Vec::new(),
        }
    }
}

/// Wrapper around a shaderc compiler instance.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    config: CompileConfig,
}

impl ShaderCompiler {
    pub fn new(config: CompileConfig) -> Result<Self> {
        let compiler = shaderc::Compiler::new().ok_or(ShaderError::CompilerUnavailable)?;
        Ok(Self { compiler, config })
    }

    fn options(&self) -> Result<shaderc::CompileOptions<'_>> {
        let mut options = shaderc::CompileOptions::new().ok_or(ShaderError::CompilerUnavailable)?;
        options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);
        options.set_optimization_level(if self.config.optimize {
            shaderc::OptimizationLevel::Performance
        } else {
            shaderc::OptimizationLevel::Zero
        });
        if self.config.debug_info {
            options.set_generate_debug_info();
        }
        for (name, value) in &self.config.defines {
            options.add_macro_definition(name, value.as_deref());
        }
        Ok(options)
    }

    /// Compile GLSL `source`.
    ///
    /// Every diagnostic, warnings included, is passed to `on_diagnostic`.
    /// Failure returns [`ShaderError::Compilation`] naming the first error.
    pub fn compile(
        &self,
        source: &str,
        stage: ShaderStage,
        name: &str,
        entry_point: &str,
        on_diagnostic: &mut dyn FnMut(&Diagnostic),
    ) -> Result<CompiledShader> {
        let options = self.options()?;

        let preprocessed = self
            .compiler
            .preprocess(source, name, entry_point, Some(&options))
            .map_err(|e| report(DiagnosticPhase::Preprocess, name, &e, on_diagnostic))?;
        deliver_warnings(DiagnosticPhase::Preprocess, &preprocessed, on_diagnostic);

        let artifact = self
            .compiler
            .compile_into_spirv(&preprocessed.as_text(), stage.kind(), name, entry_point, Some(&options))
            .map_err(|e| report(DiagnosticPhase::Parse, name, &e, on_diagnostic))?;
        deliver_warnings(DiagnosticPhase::Parse, &artifact, on_diagnostic);

        let words = artifact.as_binary().to_vec();
        let uniforms = uniform_usage(&words)?;
        tracing::debug!("Compiled {name} ({stage}): {} words, {} uniforms", words.len(), uniforms.len());
        Ok(CompiledShader { stage, words, uniforms })
    }

    /// Compile a file, taking the stage from its extension.
    pub fn compile_file(&self, path: &Path, on_diagnostic: &mut dyn FnMut(&Diagnostic)) -> Result<CompiledShader> {
        let stage = ShaderStage::from_path(path)?;
        let source = std::fs::read_to_string(path)?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("shader");
        self.compile(&source, stage, name, "main", on_diagnostic)
    }
}

fn deliver_warnings(
    phase: DiagnosticPhase,
    artifact: &shaderc::CompilationArtifact,
    on_diagnostic: &mut dyn FnMut(&Diagnostic),
) {
    if artifact.get_num_warnings() == 0 {
        return;
    }
    for diagnostic in parse_messages(phase, &artifact.get_warning_messages()) {
        on_diagnostic(&diagnostic);
    }
}

fn report(
    phase: DiagnosticPhase,
    name: &str,
    error: &shaderc::Error,
    on_diagnostic: &mut dyn FnMut(&Diagnostic),
) -> ShaderError {
    let text = match error {
        shaderc::Error::CompilationError(_, text) => text.clone(),
        other => other.to_string(),
    };
    let diagnostics = parse_messages(phase, &text);
    for diagnostic in &diagnostics {
        on_diagnostic(diagnostic);
    }

    let errors: Vec<&Diagnostic> = diagnostics.iter().filter(|d| d.severity == Severity::Error).collect();
    let first = errors.first().map_or_else(|| text.trim().to_string(), |d| d.message.clone());
    let phase = errors.first().map_or(phase, |d| d.phase);
    tracing::warn!("Shader {name} failed during {phase}: {first}");
    ShaderError::Compilation {
        name: name.to_string(),
        phase,
        errors: errors.len().max(1),
        first,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r"#version 450
layout(set = 0, binding = 0) uniform sampler2D used_tex;
layout(set = 0, binding = 1) uniform sampler2D unused_tex;
layout(push_constant) uniform Params { float time; float decay; } params;
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 color;
void main() { color = texture(used_tex, uv) * params.decay; }
";

    fn compile(source: &str, stage: ShaderStage) -> (Result<CompiledShader>, Vec<Diagnostic>) {
        let compiler = ShaderCompiler::new(CompileConfig::default()).unwrap();
        let mut diagnostics = Vec::new();
        let result = compiler.compile(source, stage, "test.glsl", "main", &mut |d| diagnostics.push(d.clone()));
        (result, diagnostics)
    }

    #[test]
    fn compiles_and_reflects_uniforms() {
        let (result, diagnostics) = compile(FRAGMENT, ShaderStage::Fragment);
        let shader = result.unwrap();
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(shader.words[0], 0x0723_0203);
        assert_eq!(shader.uniforms.get("used_tex"), Some(&true));
        assert_eq!(shader.uniforms.get("unused_tex"), Some(&false));
        assert_eq!(shader.uniforms.get("params.decay"), Some(&true));
        assert_eq!(shader.uniforms.get("params.time"), Some(&false));
    }

    #[test]
    fn parse_errors_reach_the_callback() {
        let source = "#version 450\nvoid main() { undeclared_thing = 1.0; }\n";
        let (result, diagnostics) = compile(source, ShaderStage::Fragment);
        assert!(matches!(
            result,
            Err(ShaderError::Compilation { phase: DiagnosticPhase::Parse, .. })
        ));
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("undeclared_thing")));
    }

    #[test]
    fn preprocessor_errors_are_preprocess_phase() {
        let source = "#version 450\n#error stop here\nvoid main() {}\n";
        let (result, diagnostics) = compile(source, ShaderStage::Vertex);
        assert!(result.is_err());
        assert!(diagnostics.iter().all(|d| d.phase == DiagnosticPhase::Preprocess));
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn defines_reach_the_preprocessor() {
        let config = CompileConfig {
            defines: vec![("SCALE".to_string(), Some("2.0".to_string()))],
            ..CompileConfig::default()
        };
        let compiler = ShaderCompiler::new(config).unwrap();
        let source = "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(SCALE); }\n";
        let shader = compiler
            .compile(source, ShaderStage::Fragment, "defines.frag", "main", &mut |_| {})
            .unwrap();
        assert!(shader.uniforms.is_empty());
    }
}
