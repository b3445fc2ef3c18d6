//! Shader modules.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::io::Cursor;
use std::sync::Arc;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Check that `words` looks like a SPIR-V module: magic number plus a full header.
pub fn validate_spirv(words: &[u32]) -> Result<()> {
    match words.first() {
        Some(&SPIRV_MAGIC) if words.len() >= 5 => Ok(()),
        Some(&SPIRV_MAGIC) => Err(GpuError::ShaderModule("truncated SPIR-V header".to_string())),
        _ => Err(GpuError::ShaderModule("missing SPIR-V magic number".to_string())),
    }
}

/// Decode SPIR-V bytes into words, handling either endianness.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| GpuError::ShaderModule(e.to_string()))?;
    validate_spirv(&words)?;
    Ok(words)
}

/// Owned `vk::ShaderModule`, destroyed on drop.
pub struct ShaderModule {
    ctx: Arc<GpuContext>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    /// Create a module for `stage` from SPIR-V words.
    pub fn new(ctx: &Arc<GpuContext>, stage: vk::ShaderStageFlags, words: &[u32]) -> Result<Self> {
        validate_spirv(words)?;
        let info = vk::ShaderModuleCreateInfo::default().code(words);
        let module = unsafe {
            ctx.device()
                .create_shader_module(&info, None)
                .map_err(|e| GpuError::ShaderModule(format!("{stage:?}: {e}")))?
        };
        tracing::debug!("Created {stage:?} shader module ({} words)", words.len());
        Ok(Self {
            ctx: Arc::clone(ctx),
            module,
            stage,
        })
    }

    /// Create a module from a SPIR-V binary such as a `.spv` file.
    pub fn from_bytes(ctx: &Arc<GpuContext>, stage: vk::ShaderStageFlags, bytes: &[u8]) -> Result<Self> {
        Self::new(ctx, stage, &spirv_words(bytes)?)
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    /// Stage description with entry point `main`.
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(c"main")
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_checked() {
        assert!(validate_spirv(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]).is_ok());
        assert!(validate_spirv(&[SPIRV_MAGIC, 0x0001_0000]).is_err());
        assert!(validate_spirv(&[0xdead_beef, 0, 0, 0, 0]).is_err());
        assert!(validate_spirv(&[]).is_err());
    }

    #[test]
    fn bytes_decode_to_words() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(spirv_words(&bytes).unwrap(), words);
        assert!(spirv_words(&bytes[..7]).is_err());
    }
}
