// SPDX-License-Identifier: CEPL-1.0
//! Pipeline description: vertex layout, fixed-function state and the shader
//! compilation seam. Backends turn a [`PipelineDesc`] into their own object.

use bytemuck::{Pod, Zeroable};
use tessera_core::RenderError;
use tessera_math::{gpu_matrix, Mat4};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub semantic: &'static str,
    pub location: u32,
    pub offset: u32,
    pub format: VertexFormat,
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub const ATTRIBUTES: [VertexAttribute; 3] = [
        VertexAttribute {
            semantic: "POSITION",
            location: 0,
            offset: 0,
            format: VertexFormat::Float32x3,
        },
        VertexAttribute {
            semantic: "NORMAL",
            location: 1,
            offset: 12,
            format: VertexFormat::Float32x3,
        },
        VertexAttribute {
            semantic: "TEXCOORD",
            location: 2,
            offset: 24,
            format: VertexFormat::Float32x2,
        },
    ];
}

/// Per-object constant payload. The matrix is stored row-major.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub wvp: [[f32; 4]; 4],
}

impl ObjectConstants {
    pub fn from_wvp(wvp: Mat4) -> Self {
        Self {
            wvp: gpu_matrix(wvp),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    TriangleList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillMode {
    Solid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterState {
    pub fill: FillMode,
    pub cull: CullMode,
    pub front_face: FrontFace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessOrEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: CompareOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShaderSource {
    /// File name used in diagnostics.
    pub name: String,
    pub text: String,
    pub stage: ShaderStage,
    pub entry: String,
    /// Target profile, e.g. `"vulkan1.3"`.
    pub profile: String,
}

#[derive(Clone, Debug)]
pub struct ShaderBytecode {
    pub stage: ShaderStage,
    pub entry: String,
    pub words: Vec<u32>,
}

impl ShaderBytecode {
    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }
}

/// Turns shader source into bytecode, or a diagnostic on failure.
pub trait ShaderCompiler {
    fn compile(&self, source: &ShaderSource) -> Result<ShaderBytecode, RenderError>;
}

#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub vertex: ShaderBytecode,
    pub fragment: ShaderBytecode,
    pub topology: Topology,
    pub raster: RasterState,
    pub depth: DepthState,
    pub opaque_blend: bool,
}

impl PipelineDesc {
    /// Solid, back-face culled, opaque, depth test+write with `LessOrEqual`.
    /// Clockwise triangles face the camera.
    pub fn new(vertex: ShaderBytecode, fragment: ShaderBytecode) -> Self {
        Self {
            vertex,
            fragment,
            topology: Topology::TriangleList,
            raster: RasterState {
                fill: FillMode::Solid,
                cull: CullMode::Back,
                front_face: FrontFace::Clockwise,
            },
            depth: DepthState {
                test: true,
                write: true,
                compare: CompareOp::LessOrEqual,
            },
            opaque_blend: true,
        }
    }

    pub fn vertex_stride(&self) -> u32 {
        Vertex::STRIDE
    }

    pub fn attributes(&self) -> &'static [VertexAttribute] {
        &Vertex::ATTRIBUTES
    }
}
