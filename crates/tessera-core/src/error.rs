// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use thiserror::Error;

/// Setup or frame stage a failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Instance,
    Surface,
    Adapter,
    Device,
    Swapchain,
    DescriptorHeap,
    Memory,
    Upload,
    Shader,
    Pipeline,
    Fence,
    CommandRecording,
    Submit,
    Present,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Instance => "instance",
            Stage::Surface => "surface",
            Stage::Adapter => "adapter",
            Stage::Device => "device",
            Stage::Swapchain => "swapchain",
            Stage::DescriptorHeap => "descriptor heap",
            Stage::Memory => "memory",
            Stage::Upload => "upload",
            Stage::Shader => "shader",
            Stage::Pipeline => "pipeline",
            Stage::Fence => "fence",
            Stage::CommandRecording => "command recording",
            Stage::Submit => "submit",
            Stage::Present => "present",
        };
        f.write_str(s)
    }
}

/// Minimum graphics API level an adapter must expose (major.minor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiLevel {
    pub major: u32,
    pub minor: u32,
}

impl ApiLevel {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no compatible hardware adapter (need api {required} with a presentable graphics queue)")]
    NoCompatibleAdapter { required: ApiLevel },

    #[error("{stage} creation failed: {reason}")]
    Creation { stage: Stage, reason: String },

    #[error("{stage} shader compilation failed:\n{diagnostic}")]
    ShaderCompilation {
        stage: &'static str,
        diagnostic: String,
    },

    #[error("device lost")]
    DeviceLost,

    #[error("present failed: {reason}")]
    PresentFailed { reason: String, recoverable: bool },

    #[error("command recording failed: {reason}")]
    CommandRecording { reason: String },

    #[error("frame slot {slot} is still in flight (target {target})")]
    SlotInFlight { slot: usize, target: u64 },
}

impl RenderError {
    pub fn creation(stage: Stage, reason: impl fmt::Display) -> Self {
        RenderError::Creation {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            RenderError::NoCompatibleAdapter { .. } => Stage::Adapter,
            RenderError::Creation { stage, .. } => *stage,
            RenderError::ShaderCompilation { .. } => Stage::Shader,
            RenderError::DeviceLost => Stage::Present,
            RenderError::PresentFailed { .. } => Stage::Present,
            RenderError::CommandRecording { .. } => Stage::CommandRecording,
            RenderError::SlotInFlight { .. } => Stage::Fence,
        }
    }

    /// Fatal errors end the process after best-effort cleanup. Recording
    /// failures are fatal too, but only take effect at the next tick.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::PresentFailed { recoverable, .. } => !recoverable,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_recoverable_present_failures_are_non_fatal() {
        let soft = RenderError::PresentFailed {
            reason: "out of date".into(),
            recoverable: true,
        };
        let hard = RenderError::PresentFailed {
            reason: "surface lost".into(),
            recoverable: false,
        };
        assert!(!soft.is_fatal());
        assert!(hard.is_fatal());
        assert!(RenderError::DeviceLost.is_fatal());
        assert!(RenderError::creation(Stage::Fence, "oom").is_fatal());
    }

    #[test]
    fn errors_name_their_stage() {
        let err = RenderError::creation(Stage::DescriptorHeap, "ERROR_OUT_OF_POOL_MEMORY");
        assert_eq!(err.stage(), Stage::DescriptorHeap);
        assert_eq!(
            err.to_string(),
            "descriptor heap creation failed: ERROR_OUT_OF_POOL_MEMORY"
        );
        let shader = RenderError::ShaderCompilation {
            stage: "vertex",
            diagnostic: "cube.vert:3: error".into(),
        };
        assert_eq!(shader.stage(), Stage::Shader);
        assert!(shader.to_string().contains("cube.vert:3"));
    }

    #[test]
    fn api_levels_order_by_major_then_minor() {
        assert!(ApiLevel::new(1, 3) > ApiLevel::new(1, 2));
        assert!(ApiLevel::new(2, 0) > ApiLevel::new(1, 3));
        assert_eq!(ApiLevel::new(1, 3).to_string(), "1.3");
    }
}
