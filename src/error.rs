use thiserror::Error;

use crate::backend::FramebufferStatus;
use crate::renderer::{FrameStage, FramebufferTarget, ShaderHandle};

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A render target failed its completeness check. The pipeline cannot be
    /// used after this; callers are expected to abort startup.
    #[error("{target:?} framebuffer incomplete: {status:?}")]
    IncompleteFramebuffer {
        target: FramebufferTarget,
        status: FramebufferStatus,
    },

    #[error("cannot use the mirror without a reflection callback; call enable_mirror() first")]
    MirrorNotEnabled,

    /// The target was lost to an earlier fatal error, such as a resize that
    /// failed its completeness check.
    #[error("{0:?} framebuffer is not allocated")]
    TargetUnavailable(FramebufferTarget),

    #[error("post-process input {slot} is the default framebuffer, which cannot be sampled")]
    DefaultTargetAsInput { slot: usize },

    #[error("shader {0:?} is not known to the graphics backend")]
    UnknownShader(ShaderHandle),

    #[error("{operation} is not allowed while the frame is {stage:?}")]
    StageOrder {
        operation: &'static str,
        stage: FrameStage,
    },

    #[error("shader {label} failed to compile: {message}")]
    ShaderCompilation {
        label: &'static str,
        message: String,
    },

    #[error("uniform block of {size} bytes exceeds the {limit} byte limit")]
    UniformBlockTooLarge { size: u64, limit: u64 },

    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable graphics adapter: {0}")]
    RequestAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

impl RenderError {
    /// Fatal errors leave the pipeline unusable; everything else rejects a
    /// single operation and the frame carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IncompleteFramebuffer { .. }
                | Self::CreateSurface(_)
                | Self::RequestAdapter(_)
                | Self::RequestDevice(_)
        )
    }
}
