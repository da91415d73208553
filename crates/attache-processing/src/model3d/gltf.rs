//! glTF 2.0 scene description and the scratch-file bundle it points into.
//!
//! A [`SceneBundle`] is a document whose buffers are external `.bin` files in
//! one scratch directory. [`convert`] writes the plain float layout;
//! [`quantize`] reads it back and writes a `KHR_mesh_quantization` variant
//! next to it. Both are turned into GLB by [`super::glb::pack`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::mesh::TriangleMesh;
use super::Model3dError;

pub const GLTF_VERSION: &str = "2.0";
pub const GENERATOR: &str = concat!("attache ", env!("CARGO_PKG_VERSION"));
pub const KHR_MESH_QUANTIZATION: &str = "KHR_mesh_quantization";

pub const BYTE: u32 = 5120;
pub const UNSIGNED_BYTE: u32 = 5121;
pub const SHORT: u32 = 5122;
pub const UNSIGNED_SHORT: u32 = 5123;
pub const UNSIGNED_INT: u32 = 5125;
pub const FLOAT: u32 = 5126;

pub const ARRAY_BUFFER: u32 = 34962;
pub const ELEMENT_ARRAY_BUFFER: u32 = 34963;

pub const MODE_TRIANGLES: u32 = 4;

/// Byte size of one component, `None` for unknown component types.
pub fn component_size(component_type: u32) -> Option<usize> {
    match component_type {
        BYTE | UNSIGNED_BYTE => Some(1),
        SHORT | UNSIGNED_SHORT => Some(2),
        UNSIGNED_INT | FLOAT => Some(4),
        _ => None,
    }
}

/// Components per element, `None` for unknown accessor types.
pub fn component_count(accessor_type: &str) -> Option<usize> {
    match accessor_type {
        "SCALAR" => Some(1),
        "VEC2" => Some(2),
        "VEC3" => Some(3),
        "VEC4" | "MAT2" => Some(4),
        "MAT3" => Some(9),
        "MAT4" => Some(16),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub asset: Asset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<Mesh>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessors: Vec<Accessor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffer_views: Vec<BufferView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Buffer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_required: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f32; 3]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Primitive {
    pub attributes: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_view: Option<usize>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub byte_offset: usize,
    pub component_type: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub normalized: bool,
    pub count: usize,
    #[serde(rename = "type")]
    pub accessor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub byte_offset: usize,
    pub byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_stride: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    pub byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// glTF document plus the directory its buffer URIs resolve against.
#[derive(Debug, Clone)]
pub struct SceneBundle {
    pub document: Document,
    pub dir: PathBuf,
    pub quantized: bool,
}

impl SceneBundle {
    /// Read the bytes of buffer `index` from the bundle directory.
    pub fn read_buffer(&self, index: usize) -> Result<Vec<u8>, Model3dError> {
        let buffer = self
            .document
            .buffers
            .get(index)
            .ok_or_else(|| Model3dError::Bundle(format!("buffer {} not declared", index)))?;
        let uri = buffer
            .uri
            .as_deref()
            .ok_or_else(|| Model3dError::Bundle(format!("buffer {} has no uri", index)))?;
        if uri.is_empty() || uri.contains('/') || uri.contains('\\') || uri.contains("..") {
            return Err(Model3dError::Bundle(format!("buffer uri '{}' escapes bundle", uri)));
        }
        let data = fs::read(self.dir.join(uri))?;
        if data.len() < buffer.byte_length {
            return Err(Model3dError::Bundle(format!(
                "buffer {} is {} bytes, declared {}",
                index,
                data.len(),
                buffer.byte_length
            )));
        }
        Ok(data)
    }

    fn primitive(&self) -> Result<&Primitive, Model3dError> {
        self.document
            .meshes
            .first()
            .and_then(|m| m.primitives.first())
            .ok_or_else(|| Model3dError::Bundle("no mesh primitive".to_string()))
    }

    /// Raw element bytes of an accessor, stride removed.
    fn accessor_elements(&self, index: usize) -> Result<(Accessor, Vec<Vec<u8>>), Model3dError> {
        let accessor = self
            .document
            .accessors
            .get(index)
            .cloned()
            .ok_or_else(|| Model3dError::Bundle(format!("accessor {} not declared", index)))?;
        let view_index = accessor
            .buffer_view
            .ok_or_else(|| Model3dError::Bundle(format!("accessor {} is sparse", index)))?;
        let view = self
            .document
            .buffer_views
            .get(view_index)
            .ok_or_else(|| Model3dError::Bundle(format!("bufferView {} not declared", view_index)))?;
        let element_size = component_size(accessor.component_type)
            .zip(component_count(&accessor.accessor_type))
            .map(|(size, count)| size * count)
            .ok_or_else(|| Model3dError::Bundle(format!("accessor {} has unknown layout", index)))?;
        let stride = view.byte_stride.unwrap_or(element_size);
        let data = self.read_buffer(view.buffer)?;

        let mut elements = Vec::with_capacity(accessor.count);
        for i in 0..accessor.count {
            let start = view.byte_offset + accessor.byte_offset + i * stride;
            let bytes = data.get(start..start + element_size).ok_or_else(|| {
                Model3dError::Bundle(format!("accessor {} reads past its buffer", index))
            })?;
            elements.push(bytes.to_vec());
        }
        Ok((accessor, elements))
    }

    fn read_vec3_f32(&self, index: usize) -> Result<Vec<[f32; 3]>, Model3dError> {
        let (accessor, elements) = self.accessor_elements(index)?;
        if accessor.component_type != FLOAT || accessor.accessor_type != "VEC3" {
            return Err(Model3dError::Bundle(format!(
                "accessor {} is not float VEC3",
                index
            )));
        }
        Ok(elements
            .iter()
            .map(|e| {
                let f = |at: usize| f32::from_le_bytes([e[at], e[at + 1], e[at + 2], e[at + 3]]);
                [f(0), f(4), f(8)]
            })
            .collect())
    }

    fn read_indices(&self, index: usize) -> Result<Vec<u32>, Model3dError> {
        let (accessor, elements) = self.accessor_elements(index)?;
        elements
            .iter()
            .map(|e| match accessor.component_type {
                UNSIGNED_BYTE => Ok(e[0] as u32),
                UNSIGNED_SHORT => Ok(u16::from_le_bytes([e[0], e[1]]) as u32),
                UNSIGNED_INT => Ok(u32::from_le_bytes([e[0], e[1], e[2], e[3]])),
                other => Err(Model3dError::Bundle(format!(
                    "index component type {} not supported",
                    other
                ))),
            })
            .collect()
    }

    /// Read the float geometry of the first primitive back into a mesh.
    pub fn read_geometry(&self) -> Result<TriangleMesh, Model3dError> {
        if self.quantized {
            return Err(Model3dError::Bundle(
                "quantized bundles cannot be read back".to_string(),
            ));
        }
        let primitive = self.primitive()?;
        let position = *primitive
            .attributes
            .get("POSITION")
            .ok_or_else(|| Model3dError::Bundle("primitive has no POSITION".to_string()))?;
        let positions = self.read_vec3_f32(position)?;
        let normals = match primitive.attributes.get("NORMAL") {
            Some(&normal) => Some(self.read_vec3_f32(normal)?),
            None => None,
        };
        let indices = match primitive.indices {
            Some(indices) => self.read_indices(indices)?,
            None => (0..positions.len() as u32).collect(),
        };
        Ok(TriangleMesh {
            positions,
            normals,
            indices,
        })
    }
}

/// Accumulates buffers, views and accessors for one primitive.
struct DocumentBuilder<'a> {
    dir: &'a Path,
    document: Document,
    attributes: BTreeMap<String, usize>,
}

impl<'a> DocumentBuilder<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            document: Document {
                asset: Asset {
                    version: GLTF_VERSION.to_string(),
                    generator: Some(GENERATOR.to_string()),
                    min_version: None,
                },
                ..Document::default()
            },
            attributes: BTreeMap::new(),
        }
    }

    /// Write `data` as its own external buffer with a single view over it.
    fn push_buffer(
        &mut self,
        file_name: &str,
        data: &[u8],
        stride: Option<usize>,
        target: u32,
    ) -> Result<usize, Model3dError> {
        fs::write(self.dir.join(file_name), data)?;
        let buffer = self.document.buffers.len();
        self.document.buffers.push(Buffer {
            byte_length: data.len(),
            uri: Some(file_name.to_string()),
        });
        self.document.buffer_views.push(BufferView {
            buffer,
            byte_offset: 0,
            byte_length: data.len(),
            byte_stride: stride,
            target: Some(target),
        });
        Ok(self.document.buffer_views.len() - 1)
    }

    fn push_accessor(&mut self, accessor: Accessor) -> usize {
        self.document.accessors.push(accessor);
        self.document.accessors.len() - 1
    }

    fn push_indices(&mut self, indices: &[u32], vertex_count: usize) -> Result<usize, Model3dError> {
        let (bytes, component_type) = if vertex_count <= u16::MAX as usize {
            let bytes: Vec<u8> = indices
                .iter()
                .flat_map(|&i| (i as u16).to_le_bytes())
                .collect();
            (bytes, UNSIGNED_SHORT)
        } else {
            let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
            (bytes, UNSIGNED_INT)
        };
        let view = self.push_buffer("indices.bin", &bytes, None, ELEMENT_ARRAY_BUFFER)?;
        Ok(self.push_accessor(Accessor {
            buffer_view: Some(view),
            component_type,
            count: indices.len(),
            accessor_type: "SCALAR".to_string(),
            ..Accessor::default()
        }))
    }

    fn finish(mut self, indices: usize, node: Node) -> Document {
        self.document.meshes.push(Mesh {
            primitives: vec![Primitive {
                attributes: self.attributes,
                indices: Some(indices),
                mode: Some(MODE_TRIANGLES),
            }],
        });
        self.document.nodes.push(Node {
            mesh: Some(0),
            ..node
        });
        self.document.scenes.push(Scene { nodes: vec![0] });
        self.document.scene = Some(0);
        self.document
    }
}

/// Write `mesh` as float positions and normals with external buffers in `dir`.
pub fn convert(mesh: &TriangleMesh, dir: &Path) -> Result<SceneBundle, Model3dError> {
    mesh.check()?;
    let bounds = mesh.bounds().ok_or(Model3dError::EmptyMesh)?;
    let mut builder = DocumentBuilder::new(dir);

    let bytes: Vec<u8> = mesh
        .positions
        .iter()
        .flatten()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    let view = builder.push_buffer("positions.bin", &bytes, None, ARRAY_BUFFER)?;
    let position = builder.push_accessor(Accessor {
        buffer_view: Some(view),
        component_type: FLOAT,
        count: mesh.vertex_count(),
        accessor_type: "VEC3".to_string(),
        min: Some(bounds.min.iter().map(|&v| v as f64).collect()),
        max: Some(bounds.max.iter().map(|&v| v as f64).collect()),
        ..Accessor::default()
    });
    builder.attributes.insert("POSITION".to_string(), position);

    if let Some(normals) = &mesh.normals {
        let bytes: Vec<u8> = normals
            .iter()
            .flatten()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        let view = builder.push_buffer("normals.bin", &bytes, None, ARRAY_BUFFER)?;
        let normal = builder.push_accessor(Accessor {
            buffer_view: Some(view),
            component_type: FLOAT,
            count: normals.len(),
            accessor_type: "VEC3".to_string(),
            ..Accessor::default()
        });
        builder.attributes.insert("NORMAL".to_string(), normal);
    }

    let indices = builder.push_indices(&mesh.indices, mesh.vertex_count())?;
    let document = builder.finish(indices, Node::default());

    Ok(SceneBundle {
        document,
        dir: dir.to_path_buf(),
        quantized: false,
    })
}

const POSITION_STRIDE: usize = 8;
const NORMAL_STRIDE: usize = 4;

/// Weld and quantize the geometry of `source` into a new bundle in `dir`.
///
/// Positions become normalized i16 relative to the bounding box; the node's
/// translation and uniform scale undo that mapping. Normals become normalized
/// i8. Both attribute views are padded to 4-byte strides.
pub fn quantize(source: &SceneBundle, dir: &Path) -> Result<SceneBundle, Model3dError> {
    let mesh = source.read_geometry()?.weld();
    mesh.check()?;
    let bounds = mesh.bounds().ok_or(Model3dError::EmptyMesh)?;
    let center = bounds.center();
    let extent = match bounds.half_extent() {
        e if e > f32::EPSILON => e,
        _ => 1.0,
    };

    let mut builder = DocumentBuilder::new(dir);

    let mut bytes = Vec::with_capacity(mesh.vertex_count() * POSITION_STRIDE);
    let mut min = [i16::MAX; 3];
    let mut max = [i16::MIN; 3];
    for p in &mesh.positions {
        for axis in 0..3 {
            let q = quantize_snorm16((p[axis] - center[axis]) / extent);
            min[axis] = min[axis].min(q);
            max[axis] = max[axis].max(q);
            bytes.extend_from_slice(&q.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
    }
    let view = builder.push_buffer("positions.bin", &bytes, Some(POSITION_STRIDE), ARRAY_BUFFER)?;
    let position = builder.push_accessor(Accessor {
        buffer_view: Some(view),
        component_type: SHORT,
        normalized: true,
        count: mesh.vertex_count(),
        accessor_type: "VEC3".to_string(),
        min: Some(min.iter().map(|&v| v as f64).collect()),
        max: Some(max.iter().map(|&v| v as f64).collect()),
        ..Accessor::default()
    });
    builder.attributes.insert("POSITION".to_string(), position);

    if let Some(normals) = &mesh.normals {
        let mut bytes = Vec::with_capacity(normals.len() * NORMAL_STRIDE);
        for n in normals {
            for c in n {
                bytes.push(quantize_snorm8(*c) as u8);
            }
            bytes.push(0);
        }
        let view = builder.push_buffer("normals.bin", &bytes, Some(NORMAL_STRIDE), ARRAY_BUFFER)?;
        let normal = builder.push_accessor(Accessor {
            buffer_view: Some(view),
            component_type: BYTE,
            normalized: true,
            count: normals.len(),
            accessor_type: "VEC3".to_string(),
            ..Accessor::default()
        });
        builder.attributes.insert("NORMAL".to_string(), normal);
    }

    let indices = builder.push_indices(&mesh.indices, mesh.vertex_count())?;
    let mut document = builder.finish(
        indices,
        Node {
            mesh: None,
            translation: Some(center),
            scale: Some([extent; 3]),
        },
    );
    document.extensions_used.push(KHR_MESH_QUANTIZATION.to_string());
    document
        .extensions_required
        .push(KHR_MESH_QUANTIZATION.to_string());

    tracing::debug!(
        vertices_before = source
            .document
            .accessors
            .first()
            .map(|a| a.count)
            .unwrap_or_default(),
        vertices_after = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        "Quantized mesh geometry"
    );

    Ok(SceneBundle {
        document,
        dir: dir.to_path_buf(),
        quantized: true,
    })
}

fn quantize_snorm16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn quantize_snorm8(v: f32) -> i8 {
    (v.clamp(-1.0, 1.0) * i8::MAX as f32).round() as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tetrahedron() -> TriangleMesh {
        let mut mesh = TriangleMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [4.0, 0.0, 0.0],
                [0.0, 2.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            normals: None,
            indices: vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3],
        };
        mesh.ensure_normals();
        mesh
    }

    #[test]
    fn test_convert_writes_external_buffers() {
        let dir = tempdir().unwrap();
        let bundle = convert(&tetrahedron(), dir.path()).unwrap();

        let doc = &bundle.document;
        assert_eq!(doc.asset.version, "2.0");
        assert_eq!(doc.buffers.len(), 3);
        assert!(dir.path().join("positions.bin").exists());
        assert_eq!(doc.accessors[0].min, Some(vec![0.0, 0.0, 0.0]));
        assert_eq!(doc.accessors[0].max, Some(vec![4.0, 2.0, 1.0]));
        assert_eq!(doc.accessors[2].component_type, UNSIGNED_SHORT);
        assert!(doc.extensions_used.is_empty());
    }

    #[test]
    fn test_read_geometry_round_trips_convert() {
        let dir = tempdir().unwrap();
        let mesh = tetrahedron();
        let bundle = convert(&mesh, dir.path()).unwrap();
        assert_eq!(bundle.read_geometry().unwrap(), mesh);
    }

    #[test]
    fn test_quantize_dequantizes_within_tolerance() {
        let base = tempdir().unwrap();
        let out = tempdir().unwrap();
        let mesh = tetrahedron();
        let bundle = quantize(&convert(&mesh, base.path()).unwrap(), out.path()).unwrap();

        let doc = &bundle.document;
        assert!(bundle.quantized);
        assert_eq!(doc.extensions_required, vec![KHR_MESH_QUANTIZATION.to_string()]);
        assert_eq!(doc.accessors[0].component_type, SHORT);
        assert!(doc.accessors[0].normalized);
        assert_eq!(doc.buffer_views[0].byte_stride, Some(8));
        assert_eq!(doc.buffer_views[1].byte_stride, Some(4));

        let node = &doc.nodes[0];
        let translation = node.translation.unwrap();
        let scale = node.scale.unwrap();
        assert_eq!(translation, [2.0, 1.0, 0.5]);
        assert_eq!(scale, [2.0; 3]);

        let data = fs::read(out.path().join("positions.bin")).unwrap();
        for (i, original) in mesh.positions.iter().enumerate() {
            for axis in 0..3 {
                let at = i * 8 + axis * 2;
                let q = i16::from_le_bytes([data[at], data[at + 1]]);
                let restored = q as f32 / i16::MAX as f32 * scale[axis] + translation[axis];
                assert!((restored - original[axis]).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_quantized_bundle_not_readable_as_float() {
        let base = tempdir().unwrap();
        let out = tempdir().unwrap();
        let bundle = quantize(&convert(&tetrahedron(), base.path()).unwrap(), out.path()).unwrap();
        assert!(bundle.read_geometry().is_err());
    }

    #[test]
    fn test_buffer_uri_cannot_escape() {
        let dir = tempdir().unwrap();
        let mut bundle = convert(&tetrahedron(), dir.path()).unwrap();
        bundle.document.buffers[0].uri = Some("../positions.bin".to_string());
        assert!(matches!(bundle.read_buffer(0), Err(Model3dError::Bundle(_))));
    }
}
