use std::fmt;
use std::marker::PhantomData;

/// Typed index into one of a backend's resource tables.
///
/// Handles are plain ids: they never own the resource and stay `Copy`, so a
/// renderable can hand the same geometry handle to any number of views.
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls so `T` does not need to implement anything itself.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T: ResourceKind> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", T::NAME, self.index)
    }
}

impl<T> Handle<T> {
    pub const fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

pub trait ResourceKind {
    const NAME: &'static str;
}

macro_rules! resource_kinds {
    ($($kind:ident => $alias:ident),* $(,)?) => {
        $(
            pub enum $kind {}

            impl ResourceKind for $kind {
                const NAME: &'static str = stringify!($kind);
            }

            pub type $alias = Handle<$kind>;
        )*
    };
}

resource_kinds! {
    Shader => ShaderHandle,
    Texture => TextureHandle,
    Geometry => GeometryHandle,
    VertexBuffer => VertexBufferHandle,
    Framebuffer => FramebufferHandle,
    Renderbuffer => RenderbufferHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn handle_is_copy_and_compares_by_index() {
        let h1 = TextureHandle::new(5);
        let h2 = h1;
        assert_eq!(h1, h2);
        assert_ne!(h1, TextureHandle::new(6));
        assert_eq!(h1.index(), 5);
    }

    #[test]
    fn handles_hash_by_index() {
        let set: HashSet<ShaderHandle> =
            [ShaderHandle::new(1), ShaderHandle::new(1), ShaderHandle::new(2)]
                .into_iter()
                .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn debug_names_the_resource_kind() {
        assert_eq!(format!("{:?}", GeometryHandle::new(3)), "Geometry#3");
    }
}
