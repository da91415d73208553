//! STL reader (ascii and binary).

use super::mesh::{face_normal, normalize, TriangleMesh};
use super::Model3dError;

const HEADER_LEN: usize = 80;
const TRIANGLE_LEN: usize = 50;

pub fn parse(data: &[u8]) -> Result<TriangleMesh, Model3dError> {
    if is_binary(data) {
        parse_binary(data)
    } else {
        let text = std::str::from_utf8(data)
            .map_err(|_| Model3dError::parse("STL", "not valid ascii and size does not match binary layout"))?;
        parse_ascii(text)
    }
}

/// Binary files declare their triangle count; the size must agree with it.
/// Exporters routinely start binary headers with "solid", so the keyword alone
/// does not mean ascii.
fn is_binary(data: &[u8]) -> bool {
    if data.len() < HEADER_LEN + 4 {
        return false;
    }
    let count = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
    count
        .checked_mul(TRIANGLE_LEN)
        .and_then(|n| n.checked_add(HEADER_LEN + 4))
        .map_or(false, |expected| expected == data.len())
}

fn parse_binary(data: &[u8]) -> Result<TriangleMesh, Model3dError> {
    let count = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
    let mut builder = FacetBuilder::with_capacity(count);

    for record in data[HEADER_LEN + 4..].chunks_exact(TRIANGLE_LEN) {
        let mut floats = [0f32; 12];
        for (i, f) in floats.iter_mut().enumerate() {
            let at = i * 4;
            *f = f32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]);
        }
        builder.push_facet(
            [floats[0], floats[1], floats[2]],
            &[
                [floats[3], floats[4], floats[5]],
                [floats[6], floats[7], floats[8]],
                [floats[9], floats[10], floats[11]],
            ],
        );
    }

    Ok(builder.finish())
}

fn parse_ascii(text: &str) -> Result<TriangleMesh, Model3dError> {
    let mut tokens = text.split_whitespace();
    match tokens.next() {
        Some(t) if t.eq_ignore_ascii_case("solid") => {}
        _ => return Err(Model3dError::parse("STL", "missing 'solid' keyword")),
    }

    let mut builder = FacetBuilder::with_capacity(0);
    let mut normal = [0.0f32; 3];
    let mut vertices: Vec<[f32; 3]> = Vec::with_capacity(3);
    let mut in_facet = false;

    while let Some(token) = tokens.next() {
        match token.to_ascii_lowercase().as_str() {
            "facet" => {
                if in_facet {
                    return Err(Model3dError::parse("STL", "nested facet"));
                }
                in_facet = true;
                vertices.clear();
                normal = [0.0; 3];
                if tokens.next().map(|t| t.eq_ignore_ascii_case("normal")) == Some(true) {
                    normal = read_vec3(&mut tokens)?;
                }
            }
            "vertex" => {
                if !in_facet {
                    return Err(Model3dError::parse("STL", "vertex outside facet"));
                }
                vertices.push(read_vec3(&mut tokens)?);
            }
            "endfacet" => {
                if vertices.len() < 3 {
                    return Err(Model3dError::parse(
                        "STL",
                        format!("facet with {} vertices", vertices.len()),
                    ));
                }
                builder.push_facet(normal, &vertices);
                in_facet = false;
            }
            // outer loop / endloop / endsolid <name> / solid names
            _ => {}
        }
    }

    if in_facet {
        return Err(Model3dError::parse("STL", "unterminated facet"));
    }
    Ok(builder.finish())
}

fn read_vec3<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<[f32; 3], Model3dError> {
    let mut out = [0f32; 3];
    for slot in &mut out {
        let token = tokens
            .next()
            .ok_or_else(|| Model3dError::parse("STL", "unexpected end of file"))?;
        *slot = token
            .parse()
            .map_err(|_| Model3dError::parse("STL", format!("invalid number '{}'", token)))?;
    }
    Ok(out)
}

/// STL stores unshared vertices with a facet normal; every facet contributes
/// its own corners so creases stay sharp.
struct FacetBuilder {
    mesh: TriangleMesh,
    normals: Vec<[f32; 3]>,
}

impl FacetBuilder {
    fn with_capacity(triangles: usize) -> Self {
        Self {
            mesh: TriangleMesh {
                positions: Vec::with_capacity(triangles * 3),
                normals: None,
                indices: Vec::with_capacity(triangles * 3),
            },
            normals: Vec::with_capacity(triangles * 3),
        }
    }

    fn push_facet(&mut self, declared: [f32; 3], vertices: &[[f32; 3]]) {
        let normal = normalize(declared)
            .or_else(|| normalize(face_normal(vertices[0], vertices[1], vertices[2])))
            .unwrap_or([0.0, 0.0, 1.0]);
        let base = self.mesh.positions.len() as u32;
        for v in vertices {
            self.mesh.positions.push(*v);
            self.normals.push(normal);
        }
        for i in 1..vertices.len() as u32 - 1 {
            self.mesh.indices.extend_from_slice(&[base, base + i, base + i + 1]);
        }
    }

    fn finish(mut self) -> TriangleMesh {
        self.mesh.normals = Some(self.normals);
        self.mesh
    }
}
