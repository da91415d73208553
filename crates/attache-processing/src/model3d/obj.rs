//! Wavefront OBJ reader.
//!
//! Only geometry is read: `v`, `vn` and `f`. Polygons are fan-triangulated,
//! negative indices count back from the most recent vertex. Texture
//! coordinates, groups and materials are ignored.

use std::collections::HashMap;

use super::mesh::TriangleMesh;
use super::Model3dError;

fn err(line: usize, message: impl std::fmt::Display) -> Model3dError {
    Model3dError::parse("OBJ", format!("line {}: {}", line, message))
}

pub fn parse(data: &[u8]) -> Result<TriangleMesh, Model3dError> {
    let text = String::from_utf8_lossy(data);

    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();

    let mut mesh = TriangleMesh::default();
    let mut out_normals: Vec<[f32; 3]> = Vec::new();
    let mut all_have_normals = true;
    let mut vertex_map: HashMap<(usize, Option<usize>), u32> = HashMap::new();
    let mut face: Vec<u32> = Vec::with_capacity(4);

    for (number, raw) in text.lines().enumerate() {
        let line_no = number + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            continue;
        };

        match keyword {
            "v" => positions.push(read_vec3(&mut parts, line_no)?),
            "vn" => normals.push(read_vec3(&mut parts, line_no)?),
            "f" => {
                face.clear();
                for corner in parts {
                    let mut refs = corner.split('/');
                    let position = resolve(refs.next(), positions.len(), line_no)?
                        .ok_or_else(|| err(line_no, "face corner without a vertex index"))?;
                    let _texcoord = refs.next();
                    let normal = resolve(refs.next(), normals.len(), line_no)?;
                    if normal.is_none() {
                        all_have_normals = false;
                    }

                    let index = *vertex_map.entry((position, normal)).or_insert_with(|| {
                        mesh.positions.push(positions[position]);
                        out_normals.push(normal.map(|n| normals[n]).unwrap_or([0.0; 3]));
                        (mesh.positions.len() - 1) as u32
                    });
                    face.push(index);
                }
                if face.len() < 3 {
                    return Err(err(line_no, format!("face with {} vertices", face.len())));
                }
                for i in 1..face.len() - 1 {
                    mesh.indices
                        .extend_from_slice(&[face[0], face[i], face[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if all_have_normals && !mesh.positions.is_empty() {
        mesh.normals = Some(out_normals);
    }
    Ok(mesh)
}

fn read_vec3<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<[f32; 3], Model3dError> {
    let mut out = [0f32; 3];
    for slot in &mut out {
        let token = parts
            .next()
            .ok_or_else(|| err(line, "expected three coordinates"))?;
        *slot = token
            .parse()
            .map_err(|_| err(line, format!("invalid number '{}'", token)))?;
    }
    Ok(out)
}

/// 1-based or negative OBJ index into a zero-based slot. Empty means absent.
fn resolve(token: Option<&str>, len: usize, line: usize) -> Result<Option<usize>, Model3dError> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(None),
    };
    let value: i64 = token
        .parse()
        .map_err(|_| err(line, format!("invalid index '{}'", token)))?;
    let resolved = match value {
        0 => return Err(err(line, "index 0 is not valid")),
        v if v > 0 => v - 1,
        v => len as i64 + v,
    };
    if resolved < 0 || resolved as usize >= len {
        return Err(err(
            line,
            format!("index {} out of range ({} defined)", value, len),
        ));
    }
    Ok(Some(resolved as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_is_fan_triangulated() {
        let obj = "# quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = parse(obj.as_bytes()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(mesh.normals.is_none());
    }

    #[test]
    fn test_negative_indices() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = parse(obj.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.positions[2], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_normals_split_shared_positions() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\n\
                   vn 0 0 1\nvn 1 0 0\n\
                   f 1//1 2//1 3//1\nf 1//2 3//2 4//2\n";
        let mesh = parse(obj.as_bytes()).unwrap();
        // vertex 1 and 3 appear with two different normals
        assert_eq!(mesh.vertex_count(), 6);
        let normals = mesh.normals.unwrap();
        assert_eq!(normals[0], [0.0, 0.0, 1.0]);
        assert_eq!(normals[3], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_texcoord_forms_accepted() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 3/1/1\n";
        let mesh = parse(obj.as_bytes()).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert!(mesh.normals.is_some());
    }

    #[test]
    fn test_out_of_range_index() {
        let obj = "v 0 0 0\nv 1 0 0\nf 1 2 3\n";
        let err = parse(obj.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_index_near_u32_max_rejected() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4294967295\n";
        let err = parse(obj.as_bytes()).unwrap_err();
        assert!(matches!(err, Model3dError::Parse { .. }));
        let err: attache_core::ProcessingError = err.into();
        assert_eq!(err.class(), attache_core::ErrorClass::Permanent);
    }

    #[test]
    fn test_extreme_negative_index_rejected() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 -9223372036854775808\n";
        assert!(parse(obj.as_bytes()).is_err());
    }

    #[test]
    fn test_truncated_vertex_line() {
        let err = parse(b"v 0 0 0\nv 1 0").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_zero_index_rejected() {
        assert!(parse(b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n").is_err());
    }
}
