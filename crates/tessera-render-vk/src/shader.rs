// SPDX-License-Identifier: CEPL-1.0
//! Runtime GLSL -> SPIR-V through shaderc.

use tessera_render::{RenderError, ShaderBytecode, ShaderCompiler, ShaderSource, ShaderStage};
use tracing::{debug, warn};

const CUBE_VS: &str = include_str!("../shaders/cube.vert");
const CUBE_FS: &str = include_str!("../shaders/cube.frag");

/// Target profile the cube shaders are compiled for.
pub const PROFILE: &str = "vulkan1.3";

pub fn cube_sources() -> [ShaderSource; 2] {
    let src = |name: &str, text: &str, stage| ShaderSource {
        name: name.into(),
        text: text.into(),
        stage,
        entry: "main".into(),
        profile: PROFILE.into(),
    };
    [
        src("cube.vert", CUBE_VS, ShaderStage::Vertex),
        src("cube.frag", CUBE_FS, ShaderStage::Fragment),
    ]
}

pub struct ShadercCompiler {
    compiler: shaderc::Compiler,
}

fn env_version(profile: &str) -> Option<shaderc::EnvVersion> {
    match profile {
        "vulkan1.0" => Some(shaderc::EnvVersion::Vulkan1_0),
        "vulkan1.1" => Some(shaderc::EnvVersion::Vulkan1_1),
        "vulkan1.2" => Some(shaderc::EnvVersion::Vulkan1_2),
        "vulkan1.3" => Some(shaderc::EnvVersion::Vulkan1_3),
        _ => None,
    }
}

impl ShadercCompiler {
    pub fn new() -> Result<Self, RenderError> {
        let compiler = shaderc::Compiler::new().map_err(|e| RenderError::ShaderCompilation {
            stage: "init",
            diagnostic: e.to_string(),
        })?;
        Ok(Self { compiler })
    }
}

impl ShaderCompiler for ShadercCompiler {
    fn compile(&self, source: &ShaderSource) -> Result<ShaderBytecode, RenderError> {
        let fail = |diagnostic: String| RenderError::ShaderCompilation {
            stage: source.stage.name(),
            diagnostic,
        };
        let env = env_version(&source.profile)
            .ok_or_else(|| fail(format!("unknown profile `{}`", source.profile)))?;
        let mut opts = shaderc::CompileOptions::new().map_err(|e| fail(e.to_string()))?;
        opts.set_target_env(shaderc::TargetEnv::Vulkan, env as u32);
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let kind = match source.stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        };
        let artifact = self
            .compiler
            .compile_into_spirv(&source.text, kind, &source.name, &source.entry, Some(&opts))
            .map_err(|e| fail(e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            warn!(shader = %source.name, "{}", artifact.get_warning_messages());
        }
        debug!(shader = %source.name, words = artifact.len(), "compiled shader");
        Ok(ShaderBytecode {
            stage: source.stage,
            entry: source.entry.clone(),
            words: artifact.as_binary().to_vec(),
        })
    }
}
