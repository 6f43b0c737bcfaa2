// renderer/uniforms.rs
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Names of the uniforms the pipeline itself pushes.
pub mod names {
    pub const MODEL_MATRIX: &str = "modelMatrix";
    pub const IS_REFLECTION: &str = "isReflection";
    pub const TIME: &str = "time";
    pub const INVERSE_TEXTURE_SIZE: &str = "inverseTextureSize";
    pub const FXAA: &str = "fxaa";
    pub const REFLECT: &str = "reflect";
    pub const REFLECTIVENESS: &str = "reflectiveness";
    pub const STRENGTH: &str = "strength";
    pub const PLAYER_COLOR: &str = "playerColor";
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn bool(value: bool) -> Self {
        Self::Int(value as i32)
    }

    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Int(_) => UniformKind::Int,
            Self::Float(_) => UniformKind::Float,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Mat4(_) => UniformKind::Mat4,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Int(v) => Some(v != 0),
            _ => None,
        }
    }

    /// Bytes as laid out in a WGSL uniform block.
    pub fn write_bytes(&self, out: &mut [u8]) {
        match self {
            Self::Int(v) => out[..4].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Float(v) => out[..4].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Vec2(v) => out[..8].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Vec3(v) => out[..12].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Vec4(v) => out[..16].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Mat4(m) => out[..64].copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }
}

/// Booleans travel as `Int` because WGSL uniform blocks cannot hold `bool`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    const fn size(self) -> u64 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }

    const fn align(self) -> u64 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformField {
    pub name: String,
    pub kind: UniformKind,
    pub offset: u64,
}

/// Offsets of a shader's uniform block, following WGSL host-shareable
/// layout rules. Fields are laid out in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: u64,
}

impl UniformLayout {
    pub fn new<'a>(fields: impl IntoIterator<Item = (&'a str, UniformKind)>) -> Self {
        let mut offset = 0u64;
        let mut laid_out = Vec::new();
        for (name, kind) in fields {
            offset = offset.next_multiple_of(kind.align());
            laid_out.push(UniformField {
                name: name.to_owned(),
                kind,
                offset,
            });
            offset += kind.size();
        }

        Self {
            fields: laid_out,
            size: offset.next_multiple_of(16),
        }
    }

    /// Fields every model shader receives from the primary and mirror passes.
    pub fn model_defaults() -> Vec<(&'static str, UniformKind)> {
        vec![
            (names::MODEL_MATRIX, UniformKind::Mat4),
            (names::IS_REFLECTION, UniformKind::Int),
            (names::TIME, UniformKind::Float),
        ]
    }

    /// Fields every combine / post-process shader receives.
    pub fn screen_defaults() -> Vec<(&'static str, UniformKind)> {
        vec![
            (names::INVERSE_TEXTURE_SIZE, UniformKind::Vec2),
            (names::FXAA, UniformKind::Int),
            (names::REFLECT, UniformKind::Int),
            (names::REFLECTIVENESS, UniformKind::Float),
            (names::STRENGTH, UniformKind::Float),
        ]
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }
}
