use super::uniforms::UniformValue;

/// Camera hook driven around the mirror pass: called with `true` before the
/// mirrored traversal and with `false` right after it.
pub trait ReflectionToggle: Send {
    fn set_reflected(&mut self, reflected: bool);
}

impl<F> ReflectionToggle for F
where
    F: FnMut(bool) + Send,
{
    fn set_reflected(&mut self, reflected: bool) {
        self(reflected)
    }
}

/// View-dependent uniforms (camera matrices and the like) pushed to every
/// model shader right after it is put in use, so a camera flipped by a
/// [`ReflectionToggle`] is picked up by the mirrored traversal.
pub trait ViewUniforms: Send + Sync {
    fn view_uniforms(&self) -> Vec<(&'static str, UniformValue)>;
}

/// Mirror availability and the per-frame switch.
#[derive(Default)]
pub struct Reflection {
    toggle: Option<Box<dyn ReflectionToggle>>,
    active: bool,
}

impl Reflection {
    /// Stores the toggle and turns mirroring on.
    pub fn enable(&mut self, toggle: Box<dyn ReflectionToggle>) {
        self.toggle = Some(toggle);
        self.active = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.toggle.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `false`, leaving the switch off, when asked to turn mirroring
    /// on before a toggle was stored.
    pub fn set_active(&mut self, active: bool) -> bool {
        if active && self.toggle.is_none() {
            return false;
        }
        self.active = active;
        true
    }

    /// Flips the camera into its reflected state for the lifetime of the
    /// returned guard. `None` when mirroring is off this frame.
    pub fn begin(&mut self) -> Option<MirrorGuard<'_>> {
        if !self.active {
            return None;
        }
        let toggle = self.toggle.as_mut()?;
        toggle.set_reflected(true);
        Some(MirrorGuard { toggle })
    }
}

/// Restores the unreflected camera on drop.
pub struct MirrorGuard<'a> {
    toggle: &'a mut Box<dyn ReflectionToggle>,
}

impl Drop for MirrorGuard<'_> {
    fn drop(&mut self) {
        self.toggle.set_reflected(false);
    }
}
