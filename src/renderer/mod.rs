pub mod framebuffer;
pub mod handle;
pub mod primitives;
pub mod reflection;
pub mod registry;
pub mod renderable;
pub mod screen_quad;
pub mod sorted_renderer;
pub mod uniforms;
pub mod vertex;

pub use framebuffer::{FramebufferManager, FramebufferTarget};
pub use handle::{
    FramebufferHandle, GeometryHandle, Handle, RenderbufferHandle, ShaderHandle, TextureHandle,
    VertexBufferHandle,
};
pub use primitives::cube_mesh;
pub use reflection::{ReflectionToggle, ViewUniforms};
pub use registry::{Batch, BucketSnapshot, RenderRegistry, ShaderGroupSnapshot};
pub use renderable::{ModelView, Renderable, Transform};
pub use screen_quad::ScreenRect;
pub use sorted_renderer::{DrawStats, FrameStage, SortedRenderer, MAX_POST_PROCESS_INPUTS};
pub use uniforms::{UniformKind, UniformLayout, UniformValue};
pub use vertex::{QuadVertex, Vertex};
