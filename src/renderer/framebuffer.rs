// renderer/framebuffer.rs
use crate::backend::{
    ColorFormat, Extent, FramebufferAttachments, FramebufferStatus, GraphicsBackend, TextureDesc,
    WrapMode,
};
use crate::error::{RenderError, Result};

use super::{FramebufferHandle, RenderbufferHandle, TextureHandle};

/// Logical render targets. `Default` is the window surface and owns nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    Default,
    Scene,
    Effects,
    Result,
    Spare,
    Mirror,
}

impl FramebufferTarget {
    pub const ALL: [Self; 6] = [
        Self::Default,
        Self::Scene,
        Self::Effects,
        Self::Result,
        Self::Spare,
        Self::Mirror,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

enum DepthStencil {
    None,
    /// The renderbuffer Scene, Effects and Result share.
    Shared,
    Own,
}

struct ColorAttachment {
    label: &'static str,
    wrap: WrapMode,
}

struct TargetLayout {
    target: FramebufferTarget,
    label: &'static str,
    colors: &'static [ColorAttachment],
    depth_stencil: DepthStencil,
}

const fn color(label: &'static str) -> ColorAttachment {
    ColorAttachment {
        label,
        wrap: WrapMode::ClampToEdge,
    }
}

/// Attachment layout of every off-screen target. Color 0 is the target's
/// texture; the Scene target's color 1 is the specular and glow channel.
static LAYOUTS: [TargetLayout; 5] = [
    TargetLayout {
        target: FramebufferTarget::Scene,
        label: "SceneFramebuffer",
        colors: &[color("SceneColor"), color("SpecularAndGlow")],
        depth_stencil: DepthStencil::Shared,
    },
    TargetLayout {
        target: FramebufferTarget::Effects,
        label: "EffectsFramebuffer",
        colors: &[color("EffectsColor")],
        depth_stencil: DepthStencil::Shared,
    },
    TargetLayout {
        target: FramebufferTarget::Result,
        label: "ResultFramebuffer",
        colors: &[ColorAttachment {
            label: "ResultColor",
            wrap: WrapMode::MirroredRepeat,
        }],
        depth_stencil: DepthStencil::Shared,
    },
    TargetLayout {
        target: FramebufferTarget::Spare,
        label: "SpareFramebuffer",
        colors: &[color("SpareColor")],
        depth_stencil: DepthStencil::None,
    },
    TargetLayout {
        target: FramebufferTarget::Mirror,
        label: "MirrorFramebuffer",
        colors: &[color("MirrorColor")],
        depth_stencil: DepthStencil::Own,
    },
];

fn layout(target: FramebufferTarget) -> Option<&'static TargetLayout> {
    LAYOUTS.iter().find(|layout| layout.target == target)
}

pub struct FramebufferResource {
    pub framebuffer: FramebufferHandle,
    pub colors: Vec<TextureHandle>,
    own_depth_stencil: Option<RenderbufferHandle>,
}

/// Owns every off-screen target and its attachments.
///
/// Scene, Effects, Result and Spare exist from construction on. Mirror is
/// allocated on demand by [`FramebufferManager::allocate_mirror`] and kept
/// across resizes once allocated.
pub struct FramebufferManager {
    size: Extent,
    shared_depth_stencil: Option<RenderbufferHandle>,
    resources: [Option<FramebufferResource>; 6],
}

impl FramebufferManager {
    pub fn new(backend: &mut dyn GraphicsBackend, size: Extent) -> Result<Self> {
        let mut manager = Self {
            size: size.clamped(),
            shared_depth_stencil: None,
            resources: Default::default(),
        };
        manager.allocate_standard(backend)?;
        Ok(manager)
    }

    pub fn size(&self) -> Extent {
        self.size
    }

    pub fn is_allocated(&self, target: FramebufferTarget) -> bool {
        self.resources[target.index()].is_some()
    }

    /// Framebuffer to bind for `target`. `None` for Default and for targets
    /// not allocated.
    pub fn framebuffer(&self, target: FramebufferTarget) -> Option<FramebufferHandle> {
        self.resources[target.index()]
            .as_ref()
            .map(|resource| resource.framebuffer)
    }

    pub fn target_of(&self, framebuffer: FramebufferHandle) -> Option<FramebufferTarget> {
        FramebufferTarget::ALL
            .into_iter()
            .find(|&target| self.framebuffer(target) == Some(framebuffer))
    }

    /// Color attachment `attachment` of `target`.
    pub fn texture(&self, target: FramebufferTarget, attachment: usize) -> Option<TextureHandle> {
        self.resources[target.index()]
            .as_ref()
            .and_then(|resource| resource.colors.get(attachment).copied())
    }

    /// The specular and glow channel of the Scene target.
    pub fn glow(&self) -> Option<TextureHandle> {
        self.texture(FramebufferTarget::Scene, 1)
    }

    /// (Re)allocates the Mirror target at the current size.
    pub fn allocate_mirror(&mut self, backend: &mut dyn GraphicsBackend) -> Result<()> {
        self.release(backend, FramebufferTarget::Mirror);
        self.allocate(backend, FramebufferTarget::Mirror)
    }

    /// Recreates every allocated target at `size`.
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, size: Extent) -> Result<()> {
        let size = size.clamped();
        if size == self.size {
            return Ok(());
        }
        let mirror = self.is_allocated(FramebufferTarget::Mirror);
        self.release_all(backend);
        self.size = size;

        self.allocate_standard(backend)?;
        if mirror {
            self.allocate(backend, FramebufferTarget::Mirror)?;
        }
        log::info!("Render targets resized to {}x{}", size.width, size.height);
        Ok(())
    }

    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for target in FramebufferTarget::ALL {
            self.release(backend, target);
        }
        if let Some(depth) = self.shared_depth_stencil.take() {
            backend.destroy_renderbuffer(depth);
        }
    }

    fn allocate_standard(&mut self, backend: &mut dyn GraphicsBackend) -> Result<()> {
        self.shared_depth_stencil = Some(backend.create_renderbuffer(self.size));
        for target in [
            FramebufferTarget::Scene,
            FramebufferTarget::Effects,
            FramebufferTarget::Result,
            FramebufferTarget::Spare,
        ] {
            self.allocate(backend, target)?;
        }
        log::info!(
            "Render targets created at {}x{}",
            self.size.width,
            self.size.height
        );
        Ok(())
    }

    fn allocate(&mut self, backend: &mut dyn GraphicsBackend, target: FramebufferTarget) -> Result<()> {
        let Some(layout) = layout(target) else {
            return Ok(());
        };

        let colors: Vec<TextureHandle> = layout
            .colors
            .iter()
            .map(|attachment| {
                backend.create_texture(&TextureDesc {
                    label: attachment.label,
                    size: self.size,
                    format: ColorFormat::Rgba8Unorm,
                    wrap: attachment.wrap,
                })
            })
            .collect();

        let own_depth_stencil = match layout.depth_stencil {
            DepthStencil::Own => Some(backend.create_renderbuffer(self.size)),
            _ => None,
        };
        let depth_stencil = match layout.depth_stencil {
            DepthStencil::None => None,
            DepthStencil::Shared => self.shared_depth_stencil,
            DepthStencil::Own => own_depth_stencil,
        };

        let framebuffer = backend.create_framebuffer(
            layout.label,
            FramebufferAttachments {
                color: colors.clone(),
                depth_stencil,
            },
        );
        let resource = FramebufferResource {
            framebuffer,
            colors,
            own_depth_stencil,
        };

        // only complete targets are ever stored, so only they can be bound
        match backend.framebuffer_status(framebuffer) {
            FramebufferStatus::Complete => {
                self.resources[target.index()] = Some(resource);
                Ok(())
            }
            status => {
                log::error!("{} incomplete: {:?}", layout.label, status);
                destroy(backend, resource);
                Err(RenderError::IncompleteFramebuffer { target, status })
            }
        }
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend, target: FramebufferTarget) {
        if let Some(resource) = self.resources[target.index()].take() {
            destroy(backend, resource);
        }
    }
}

fn destroy(backend: &mut dyn GraphicsBackend, resource: FramebufferResource) {
    backend.destroy_framebuffer(resource.framebuffer);
    for texture in resource.colors {
        backend.destroy_texture(texture);
    }
    if let Some(depth) = resource.own_depth_stencil {
        backend.destroy_renderbuffer(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    const SIZE: Extent = Extent::new(16, 8);

    #[test]
    fn every_offscreen_target_has_a_layout() {
        for target in FramebufferTarget::ALL {
            assert_eq!(layout(target).is_some(), target != FramebufferTarget::Default);
        }
    }

    #[test]
    fn standard_targets_exist_after_construction() {
        let mut backend = HeadlessBackend::new(SIZE);
        let manager = FramebufferManager::new(&mut backend, SIZE).unwrap();

        assert!(manager.framebuffer(FramebufferTarget::Default).is_none());
        assert!(manager.framebuffer(FramebufferTarget::Mirror).is_none());
        for target in [
            FramebufferTarget::Scene,
            FramebufferTarget::Effects,
            FramebufferTarget::Result,
            FramebufferTarget::Spare,
        ] {
            assert!(manager.framebuffer(target).is_some(), "{target:?}");
        }
        assert!(manager.glow().is_some());
        assert_ne!(manager.glow(), manager.texture(FramebufferTarget::Scene, 0));
    }

    #[test]
    fn result_samples_with_mirrored_repeat() {
        let mut backend = HeadlessBackend::new(SIZE);
        let manager = FramebufferManager::new(&mut backend, SIZE).unwrap();
        let result = manager.texture(FramebufferTarget::Result, 0).unwrap();
        assert_eq!(
            backend.texture_data(result).unwrap().wrap,
            WrapMode::MirroredRepeat
        );
    }

    #[test]
    fn resize_recreates_attachments_at_new_size() {
        let mut backend = HeadlessBackend::new(SIZE);
        let mut manager = FramebufferManager::new(&mut backend, SIZE).unwrap();
        manager.allocate_mirror(&mut backend).unwrap();
        let live = backend.live_textures();

        let bigger = Extent::new(32, 32);
        manager.resize(&mut backend, bigger).unwrap();

        assert_eq!(backend.live_textures(), live);
        let mirror = manager.texture(FramebufferTarget::Mirror, 0).unwrap();
        assert_eq!(backend.texture_data(mirror).unwrap().size, bigger);
    }

    #[test]
    fn too_many_attachments_is_fatal() {
        let mut backend = HeadlessBackend::new(SIZE).with_max_color_attachments(1);
        let err = FramebufferManager::new(&mut backend, SIZE).err().unwrap();
        assert!(matches!(
            err,
            RenderError::IncompleteFramebuffer {
                target: FramebufferTarget::Scene,
                status: FramebufferStatus::TooManyColorAttachments,
            }
        ));
        assert!(err.is_fatal());
    }
}
