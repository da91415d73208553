//! Indexed triangle geometry shared by the parsers and the glTF writer.

use std::collections::HashMap;

use super::Model3dError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub positions: Vec<[f32; 3]>,
    /// Per-vertex normals. `None` until parsed or computed.
    pub normals: Option<Vec<[f32; 3]>>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Largest half-extent over the three axes.
    pub fn half_extent(&self) -> f32 {
        (0..3)
            .map(|axis| (self.max[axis] - self.min[axis]) * 0.5)
            .fold(0.0, f32::max)
    }
}

impl TriangleMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Reject geometry that cannot be written as a valid primitive.
    pub fn check(&self) -> Result<(), Model3dError> {
        if self.positions.is_empty() || self.indices.is_empty() {
            return Err(Model3dError::EmptyMesh);
        }
        if self.indices.len() % 3 != 0 {
            return Err(Model3dError::InvalidGeometry(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.positions.len())
        {
            return Err(Model3dError::InvalidGeometry(format!(
                "index {} out of range for {} vertices",
                index,
                self.positions.len()
            )));
        }
        if self.positions.iter().flatten().any(|c| !c.is_finite()) {
            return Err(Model3dError::InvalidGeometry(
                "non-finite vertex position".to_string(),
            ));
        }
        if let Some(normals) = &self.normals {
            if normals.len() != self.positions.len() {
                return Err(Model3dError::InvalidGeometry(format!(
                    "{} normals for {} vertices",
                    normals.len(),
                    self.positions.len()
                )));
            }
        }
        Ok(())
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let first = *self.positions.first()?;
        let mut bounds = Bounds {
            min: first,
            max: first,
        };
        for p in &self.positions[1..] {
            for axis in 0..3 {
                bounds.min[axis] = bounds.min[axis].min(p[axis]);
                bounds.max[axis] = bounds.max[axis].max(p[axis]);
            }
        }
        Some(bounds)
    }

    /// Fill in area-weighted smooth normals when the source had none.
    pub fn ensure_normals(&mut self) {
        if self.normals.is_some() {
            return;
        }
        let mut normals = vec![[0.0f32; 3]; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let face = face_normal(self.positions[a], self.positions[b], self.positions[c]);
            for &v in &[a, b, c] {
                for axis in 0..3 {
                    normals[v][axis] += face[axis];
                }
            }
        }
        for n in &mut normals {
            *n = normalize(*n).unwrap_or([0.0, 0.0, 1.0]);
        }
        self.normals = Some(normals);
    }

    /// Merge vertices whose position and normal are bit-identical and drop
    /// triangles that collapse onto fewer than three distinct vertices.
    pub fn weld(&self) -> TriangleMesh {
        let mut remap: HashMap<[u32; 6], u32> = HashMap::with_capacity(self.positions.len());
        let mut positions = Vec::new();
        let mut normals = self.normals.as_ref().map(|_| Vec::new());
        let mut lookup = Vec::with_capacity(self.positions.len());

        for (i, p) in self.positions.iter().enumerate() {
            let n = self.normals.as_ref().map(|n| n[i]).unwrap_or([0.0; 3]);
            let key = [
                p[0].to_bits(),
                p[1].to_bits(),
                p[2].to_bits(),
                n[0].to_bits(),
                n[1].to_bits(),
                n[2].to_bits(),
            ];
            let index = *remap.entry(key).or_insert_with(|| {
                positions.push(*p);
                if let Some(out) = normals.as_mut() {
                    out.push(n);
                }
                (positions.len() - 1) as u32
            });
            lookup.push(index);
        }

        let mut indices = Vec::with_capacity(self.indices.len());
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (
                lookup[tri[0] as usize],
                lookup[tri[1] as usize],
                lookup[tri[2] as usize],
            );
            if a != b && b != c && a != c {
                indices.extend_from_slice(&[a, b, c]);
            }
        }

        TriangleMesh {
            positions,
            normals,
            indices,
        }
    }
}

/// Unnormalized face normal (length is twice the triangle area).
pub(crate) fn face_normal(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

pub(crate) fn normalize(v: [f32; 3]) -> Option<[f32; 3]> {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > f32::EPSILON && len.is_finite() {
        Some([v[0] / len, v[1] / len, v[2] / len])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriangleMesh {
        TriangleMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [2.0, 4.0, 0.0],
                [0.0, 0.0, 0.0],
                [2.0, 4.0, 0.0],
                [0.0, 4.0, 0.0],
            ],
            normals: None,
            indices: vec![0, 1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn test_bounds() {
        let bounds = quad().bounds().unwrap();
        assert_eq!(bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [2.0, 4.0, 0.0]);
        assert_eq!(bounds.center(), [1.0, 2.0, 0.0]);
        assert_eq!(bounds.half_extent(), 2.0);
    }

    #[test]
    fn test_computed_normals_face_up() {
        let mut mesh = quad();
        mesh.ensure_normals();
        for n in mesh.normals.unwrap() {
            assert!((n[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_weld_merges_duplicates() {
        let mut mesh = quad();
        mesh.ensure_normals();
        let welded = mesh.weld();
        assert_eq!(welded.vertex_count(), 4);
        assert_eq!(welded.triangle_count(), 2);
        assert!(welded.check().is_ok());
    }

    #[test]
    fn test_weld_drops_degenerate_triangles() {
        let mesh = TriangleMesh {
            positions: vec![[0.0; 3], [0.0; 3], [1.0, 0.0, 0.0]],
            normals: None,
            indices: vec![0, 1, 2],
        };
        assert_eq!(mesh.weld().triangle_count(), 0);
    }

    #[test]
    fn test_check_rejects_bad_index() {
        let mesh = TriangleMesh {
            positions: vec![[0.0; 3]; 3],
            normals: None,
            indices: vec![0, 1, 3],
        };
        assert!(matches!(mesh.check(), Err(Model3dError::InvalidGeometry(_))));
        assert!(matches!(
            TriangleMesh::default().check(),
            Err(Model3dError::EmptyMesh)
        ));
    }
}
