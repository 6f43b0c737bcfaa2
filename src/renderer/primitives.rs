use super::vertex::{v, Vertex};

/// Unit cube centered on the origin, 24 vertices so every face gets its own
/// normal and UVs. Triangles wind counter-clockwise seen from outside.
pub fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u axis, v axis) per face; u x v == normal keeps the winding CCW.
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u_axis, v_axis) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let pos = [0, 1, 2].map(|i| normal[i] * 0.5 + u_axis[i] * su + v_axis[i] * sv);
            vertices.push(v(pos, normal, [su + 0.5, 0.5 - sv]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Square in the XZ plane facing +Y, `size` units across.
pub fn plane_mesh(size: f32) -> (Vec<Vertex>, Vec<u32>) {
    let h = size * 0.5;
    let up = [0.0, 1.0, 0.0];
    let vertices = vec![
        v([-h, 0.0, h], up, [0.0, 1.0]),
        v([h, 0.0, h], up, [1.0, 1.0]),
        v([h, 0.0, -h], up, [1.0, 0.0]),
        v([-h, 0.0, -h], up, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube_mesh();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);

        for tri in indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(vertices[tri[i] as usize].pos));
            let face_normal = (b - a).cross(c - a).normalize();
            let normal = Vec3::from(vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(normal) > 0.99);
        }
    }

    #[test]
    fn plane_faces_up() {
        let (vertices, indices) = plane_mesh(2.0);
        let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(vertices[indices[i] as usize].pos));
        assert!((b - a).cross(c - a).y > 0.0);
    }
}
