//! Shader stages and their file suffixes.

use crate::error::{Result, ShaderError};
use std::fmt;
use std::path::Path;

/// Pipeline stage a GLSL source is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [Self; 6] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEvaluation,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
    ];

    /// Stage for a file suffix such as `vert` or `.frag`.
    pub fn from_suffix(suffix: &str) -> Result<Self> {
        match suffix.trim_start_matches('.') {
            "vert" => Ok(Self::Vertex),
            "tesc" => Ok(Self::TessControl),
            "tese" => Ok(Self::TessEvaluation),
            "geom" => Ok(Self::Geometry),
            "frag" => Ok(Self::Fragment),
            "comp" => Ok(Self::Compute),
            other => Err(ShaderError::UnknownStage(other.to_string())),
        }
    }

    /// Stage from a path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let suffix = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
        Self::from_suffix(suffix)
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::TessControl => "tesc",
            Self::TessEvaluation => "tese",
            Self::Geometry => "geom",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }

    pub(crate) fn kind(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::TessControl => shaderc::ShaderKind::TessControl,
            Self::TessEvaluation => shaderc::ShaderKind::TessEvaluation,
            Self::Geometry => shaderc::ShaderKind::Geometry,
            Self::Fragment => shaderc::ShaderKind::Fragment,
            Self::Compute => shaderc::ShaderKind::Compute,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_round_trip() {
        for stage in ShaderStage::ALL {
            assert_eq!(ShaderStage::from_suffix(stage.suffix()).unwrap(), stage);
        }
    }

    #[test]
    fn path_extension_selects_stage() {
        assert_eq!(ShaderStage::from_path(Path::new("shaders/blur.comp")).unwrap(), ShaderStage::Compute);
        assert_eq!(ShaderStage::from_suffix(".frag").unwrap(), ShaderStage::Fragment);
        assert!(matches!(
            ShaderStage::from_path(Path::new("shaders/blur.glsl")),
            Err(ShaderError::UnknownStage(s)) if s == "glsl"
        ));
        assert!(ShaderStage::from_path(Path::new("noext")).is_err());
    }
}
