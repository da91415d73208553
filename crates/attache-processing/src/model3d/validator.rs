//! Structural GLB validation.
//!
//! The validator is injected into [`super::Model3dProcessor`] so hosts can
//! replace the built-in structural checks with a stricter implementation.

use std::collections::HashSet;
use std::fmt;

use super::glb;
use super::gltf::{
    component_count, component_size, Accessor, Document, BYTE, FLOAT, KHR_MESH_QUANTIZATION,
    MODE_TRIANGLES, SHORT, UNSIGNED_BYTE, UNSIGNED_INT, UNSIGNED_SHORT,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )?;
        if let Some(first) = self.errors.first() {
            write!(f, ": {}", first)?;
        }
        Ok(())
    }
}

/// Checks a packed binary container before it is persisted.
pub trait ContainerValidator: Send + Sync {
    fn validate(&self, container: &[u8]) -> ValidationReport;
}

/// Framing, index and bounds checks over a GLB without decoding any images
/// or materials.
#[derive(Debug, Clone)]
pub struct StructuralValidator {
    supported_extensions: HashSet<String>,
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::with_supported_extensions([KHR_MESH_QUANTIZATION])
    }
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator that accepts only the given entries of `extensionsRequired`.
    pub fn with_supported_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported_extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }
}

impl ContainerValidator for StructuralValidator {
    fn validate(&self, container: &[u8]) -> ValidationReport {
        let mut report = ValidationReport::default();

        let chunks = match glb::split(container) {
            Ok(chunks) => chunks,
            Err(e) => {
                report.error(e);
                return report;
            }
        };
        let document: Document = match serde_json::from_slice(chunks.json) {
            Ok(document) => document,
            Err(e) => {
                report.error(format!("JSON chunk is not a glTF document: {}", e));
                return report;
            }
        };
        let bin = chunks.bin.unwrap_or(&[]);

        DocumentCheck {
            document: &document,
            bin,
            supported_extensions: &self.supported_extensions,
            report: &mut report,
        }
        .run();

        report
    }
}

struct DocumentCheck<'a> {
    document: &'a Document,
    bin: &'a [u8],
    supported_extensions: &'a HashSet<String>,
    report: &'a mut ValidationReport,
}

impl<'a> DocumentCheck<'a> {
    fn run(mut self) {
        self.check_asset();
        self.check_extensions();
        self.check_buffers();
        self.check_buffer_views();
        let accessor_ok: Vec<bool> = (0..self.document.accessors.len())
            .map(|i| self.check_accessor(i))
            .collect();
        self.check_meshes(&accessor_ok);
        self.check_nodes_and_scenes();
    }

    fn check_asset(&mut self) {
        let document = self.document;
        let version = &document.asset.version;
        if !version.starts_with("2.") {
            self.report
                .error(format!("asset.version '{}' is not 2.x", version));
        }
    }

    fn quantized(&self) -> bool {
        self.document
            .extensions_used
            .iter()
            .any(|e| e == KHR_MESH_QUANTIZATION)
    }

    fn check_extensions(&mut self) {
        let document = self.document;
        for required in &document.extensions_required {
            if !document.extensions_used.contains(required) {
                self.report.error(format!(
                    "extension '{}' is required but not listed as used",
                    required
                ));
            }
            if !self.supported_extensions.contains(required) {
                self.report
                    .error(format!("required extension '{}' is not supported", required));
            }
        }
        for used in &document.extensions_used {
            if !self.supported_extensions.contains(used)
                && !document.extensions_required.contains(used)
            {
                self.report
                    .warn(format!("extension '{}' is used but not recognized", used));
            }
        }
    }

    fn check_buffers(&mut self) {
        let document = self.document;
        let buffers = &document.buffers;
        for (i, buffer) in buffers.iter().enumerate() {
            if let Some(uri) = &buffer.uri {
                self.report.error(format!(
                    "buffer {} references external uri '{}' in a self-contained container",
                    i, uri
                ));
            }
        }
        match buffers.first() {
            Some(first) if first.uri.is_none() => {
                if first.byte_length > self.bin.len() {
                    self.report.error(format!(
                        "buffer 0 declares {} bytes but the BIN chunk holds {}",
                        first.byte_length,
                        self.bin.len()
                    ));
                }
                if self.bin.len() > first.byte_length + 3 {
                    self.report.warn(format!(
                        "BIN chunk carries {} bytes beyond buffer 0",
                        self.bin.len() - first.byte_length
                    ));
                }
            }
            None if !self.bin.is_empty() => {
                self.report.warn("BIN chunk present without a buffer");
            }
            _ => {}
        }
    }

    fn buffer_len(&self, index: usize) -> Option<usize> {
        self.document.buffers.get(index).map(|b| {
            if index == 0 && b.uri.is_none() {
                b.byte_length.min(self.bin.len())
            } else {
                b.byte_length
            }
        })
    }

    fn check_buffer_views(&mut self) {
        let document = self.document;
        for (i, view) in document.buffer_views.iter().enumerate() {
            let Some(len) = self.buffer_len(view.buffer) else {
                self.report
                    .error(format!("bufferView {} references missing buffer {}", i, view.buffer));
                continue;
            };
            if view.byte_length == 0 {
                self.report.error(format!("bufferView {} is empty", i));
            }
            if view.byte_offset + view.byte_length > len {
                self.report.error(format!(
                    "bufferView {} [{}..{}] exceeds buffer {} of {} bytes",
                    i,
                    view.byte_offset,
                    view.byte_offset + view.byte_length,
                    view.buffer,
                    len
                ));
            }
            if let Some(stride) = view.byte_stride {
                if !(4..=252).contains(&stride) || stride % 4 != 0 {
                    self.report
                        .error(format!("bufferView {} has invalid byteStride {}", i, stride));
                }
            }
        }
    }

    /// Returns whether the accessor's data can be read safely.
    fn check_accessor(&mut self, index: usize) -> bool {
        let document = self.document;
        let accessor = &document.accessors[index];
        let (Some(size), Some(components)) = (
            component_size(accessor.component_type),
            component_count(&accessor.accessor_type),
        ) else {
            self.report.error(format!(
                "accessor {} has invalid componentType {} or type '{}'",
                index, accessor.component_type, accessor.accessor_type
            ));
            return false;
        };
        if accessor.count == 0 {
            self.report.error(format!("accessor {} has count 0", index));
            return false;
        }
        if accessor.normalized
            && !matches!(
                accessor.component_type,
                BYTE | UNSIGNED_BYTE | SHORT | UNSIGNED_SHORT
            )
        {
            self.report.error(format!(
                "accessor {} is normalized with componentType {}",
                index, accessor.component_type
            ));
        }
        for (name, values) in [("min", &accessor.min), ("max", &accessor.max)] {
            if let Some(values) = values {
                if values.len() != components {
                    self.report.error(format!(
                        "accessor {} {} has {} values, expected {}",
                        index,
                        name,
                        values.len(),
                        components
                    ));
                }
            }
        }

        let Some(view_index) = accessor.buffer_view else {
            self.report
                .warn(format!("accessor {} has no bufferView and reads as zeros", index));
            return false;
        };
        let Some(view) = document.buffer_views.get(view_index) else {
            self.report.error(format!(
                "accessor {} references missing bufferView {}",
                index, view_index
            ));
            return false;
        };
        if accessor.byte_offset % size != 0 || (view.byte_offset + accessor.byte_offset) % size != 0
        {
            self.report
                .error(format!("accessor {} is not aligned to its component size", index));
            return false;
        }
        let element = size * components;
        let stride = view.byte_stride.unwrap_or(element);
        if stride < element {
            self.report.error(format!(
                "accessor {} elements ({} bytes) do not fit bufferView stride {}",
                index, element, stride
            ));
            return false;
        }
        let needed = accessor.byte_offset + stride * (accessor.count - 1) + element;
        if needed > view.byte_length {
            self.report.error(format!(
                "accessor {} needs {} bytes but bufferView {} has {}",
                index, needed, view_index, view.byte_length
            ));
            return false;
        }
        match self.buffer_len(view.buffer) {
            Some(len) if view.byte_offset + view.byte_length <= len => true,
            _ => false,
        }
    }

    /// Component values of an accessor that passed [`Self::check_accessor`] and
    /// lives in the BIN chunk.
    fn read_components(&self, accessor: &Accessor) -> Option<Vec<f64>> {
        let view = self.document.buffer_views.get(accessor.buffer_view?)?;
        if view.buffer != 0 || self.document.buffers.first()?.uri.is_some() {
            return None;
        }
        let size = component_size(accessor.component_type)?;
        let components = component_count(&accessor.accessor_type)?;
        let stride = view.byte_stride.unwrap_or(size * components);
        let mut out = Vec::with_capacity(accessor.count * components);
        for i in 0..accessor.count {
            let base = view.byte_offset + accessor.byte_offset + i * stride;
            for c in 0..components {
                let at = base + c * size;
                let b = self.bin.get(at..at + size)?;
                out.push(match accessor.component_type {
                    BYTE => b[0] as i8 as f64,
                    UNSIGNED_BYTE => b[0] as f64,
                    SHORT => i16::from_le_bytes([b[0], b[1]]) as f64,
                    UNSIGNED_SHORT => u16::from_le_bytes([b[0], b[1]]) as f64,
                    UNSIGNED_INT => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
                    FLOAT => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
                    _ => return None,
                });
            }
        }
        Some(out)
    }

    fn check_position(&mut self, mesh: usize, index: usize) {
        let document = self.document;
        let accessor = &document.accessors[index];
        if accessor.accessor_type != "VEC3" {
            self.report
                .error(format!("mesh {} POSITION accessor {} is not VEC3", mesh, index));
        }
        if !self.quantized() && accessor.component_type != FLOAT {
            self.report.error(format!(
                "mesh {} POSITION accessor {} must be FLOAT without {}",
                mesh, index, KHR_MESH_QUANTIZATION
            ));
        }
        let (Some(min), Some(max)) = (&accessor.min, &accessor.max) else {
            self.report
                .error(format!("POSITION accessor {} lacks min/max", index));
            return;
        };
        let Some(values) = self.read_components(accessor) else {
            return;
        };
        let mut actual_min = [f64::INFINITY; 3];
        let mut actual_max = [f64::NEG_INFINITY; 3];
        for v in values.chunks_exact(3) {
            for axis in 0..3 {
                actual_min[axis] = actual_min[axis].min(v[axis]);
                actual_max[axis] = actual_max[axis].max(v[axis]);
            }
        }
        let tolerance = |bound: f64| 1e-5 * bound.abs().max(1.0);
        for axis in 0..3usize.min(min.len()).min(max.len()) {
            if (actual_min[axis] - min[axis]).abs() > tolerance(min[axis])
                || (actual_max[axis] - max[axis]).abs() > tolerance(max[axis])
            {
                self.report.error(format!(
                    "POSITION accessor {} declared bounds do not match data on axis {}",
                    index, axis
                ));
                return;
            }
        }
    }

    fn check_meshes(&mut self, accessor_ok: &[bool]) {
        let document = self.document;
        let accessor_count = document.accessors.len();
        for (m, mesh) in document.meshes.iter().enumerate() {
            if mesh.primitives.is_empty() {
                self.report.error(format!("mesh {} has no primitives", m));
            }
            for (p, primitive) in mesh.primitives.iter().enumerate() {
                let mode = primitive.mode.unwrap_or(MODE_TRIANGLES);
                let mut vertex_count = None;

                for (semantic, &index) in &primitive.attributes {
                    if index >= accessor_count {
                        self.report.error(format!(
                            "mesh {} primitive {} attribute {} references missing accessor {}",
                            m, p, semantic, index
                        ));
                        continue;
                    }
                    let count = document.accessors[index].count;
                    match vertex_count {
                        None => vertex_count = Some(count),
                        Some(expected) if expected != count => self.report.error(format!(
                            "mesh {} primitive {} attribute {} has {} elements, expected {}",
                            m, p, semantic, count, expected
                        )),
                        _ => {}
                    }
                    if semantic == "POSITION" {
                        self.check_position(m, index);
                    }
                }
                if !primitive.attributes.contains_key("POSITION") {
                    self.report
                        .error(format!("mesh {} primitive {} has no POSITION", m, p));
                }

                let Some(indices) = primitive.indices else {
                    continue;
                };
                let Some(accessor) = document.accessors.get(indices) else {
                    self.report.error(format!(
                        "mesh {} primitive {} references missing index accessor {}",
                        m, p, indices
                    ));
                    continue;
                };
                if accessor.accessor_type != "SCALAR"
                    || !matches!(
                        accessor.component_type,
                        UNSIGNED_BYTE | UNSIGNED_SHORT | UNSIGNED_INT
                    )
                {
                    self.report.error(format!(
                        "index accessor {} must be an unsigned SCALAR",
                        indices
                    ));
                    continue;
                }
                if mode == MODE_TRIANGLES && accessor.count % 3 != 0 {
                    self.report.error(format!(
                        "index accessor {} count {} is not a multiple of 3",
                        indices, accessor.count
                    ));
                }
                if !accessor_ok.get(indices).copied().unwrap_or(false) {
                    continue;
                }
                if let (Some(limit), Some(values)) = (vertex_count, self.read_components(accessor))
                {
                    if let Some(bad) = values.iter().find(|&&v| v as usize >= limit) {
                        self.report.error(format!(
                            "index accessor {} value {} exceeds vertex count {}",
                            indices, bad, limit
                        ));
                    }
                }
            }
        }
    }

    fn check_nodes_and_scenes(&mut self) {
        let document = self.document;
        for (n, node) in document.nodes.iter().enumerate() {
            if let Some(mesh) = node.mesh {
                if mesh >= document.meshes.len() {
                    self.report
                        .error(format!("node {} references missing mesh {}", n, mesh));
                }
            }
            if let Some(scale) = node.scale {
                if scale.iter().any(|s| !s.is_finite()) {
                    self.report.error(format!("node {} has non-finite scale", n));
                }
            }
        }
        for (s, scene) in document.scenes.iter().enumerate() {
            for &node in &scene.nodes {
                if node >= document.nodes.len() {
                    self.report
                        .error(format!("scene {} references missing node {}", s, node));
                }
            }
        }
        if let Some(scene) = document.scene {
            if scene >= document.scenes.len() {
                self.report
                    .error(format!("default scene {} does not exist", scene));
            }
        }
        if document.meshes.is_empty() {
            self.report.warn("container has no meshes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model3d::glb::pack;
    use crate::model3d::gltf::{convert, quantize, SceneBundle};
    use crate::model3d::mesh::TriangleMesh;
    use tempfile::{tempdir, TempDir};

    fn cube() -> TriangleMesh {
        let positions = vec![
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ];
        let indices = vec![
            0, 2, 1, 0, 3, 2, 4, 5, 6, 4, 6, 7, 0, 1, 5, 0, 5, 4, 2, 3, 7, 2, 7, 6, 1, 2, 6, 1,
            6, 5, 0, 4, 7, 0, 7, 3,
        ];
        let mut mesh = TriangleMesh {
            positions,
            normals: None,
            indices,
        };
        mesh.ensure_normals();
        mesh
    }

    fn bundles() -> (TempDir, SceneBundle, SceneBundle) {
        let dir = tempdir().unwrap();
        let base_dir = dir.path().join("base");
        let quant_dir = dir.path().join("compressed");
        std::fs::create_dir_all(&base_dir).unwrap();
        std::fs::create_dir_all(&quant_dir).unwrap();
        let base = convert(&cube(), &base_dir).unwrap();
        let quantized = quantize(&base, &quant_dir).unwrap();
        (dir, base, quantized)
    }

    fn repack(bundle: &SceneBundle, edit: impl FnOnce(&mut Document)) -> Vec<u8> {
        let mut bundle = bundle.clone();
        edit(&mut bundle.document);
        pack(&bundle).unwrap()
    }

    #[test]
    fn test_valid_outputs_pass() {
        let (_dir, base, quantized) = bundles();
        let validator = StructuralValidator::default();

        let report = validator.validate(&pack(&base).unwrap());
        assert!(report.is_valid(), "{:?}", report.errors);

        let report = validator.validate(&pack(&quantized).unwrap());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_unsupported_required_extension() {
        let (_dir, base, quantized) = bundles();
        let validator = StructuralValidator::with_supported_extensions(Vec::<String>::new());

        let report = validator.validate(&pack(&quantized).unwrap());
        assert!(!report.is_valid());
        assert!(report.errors[0].contains(KHR_MESH_QUANTIZATION));

        assert!(validator.validate(&pack(&base).unwrap()).is_valid());
    }

    #[test]
    fn test_garbage_container() {
        let report = StructuralValidator::default().validate(b"not a glb at all");
        assert!(!report.is_valid());
    }

    #[test]
    fn test_index_out_of_range() {
        let (_dir, base, _) = bundles();
        let glb = repack(&base, |doc| {
            doc.accessors[0].count = 4;
            doc.accessors[1].count = 4;
            doc.accessors[0].min = Some(vec![-1.0, -1.0, -1.0]);
            doc.accessors[0].max = Some(vec![1.0, 1.0, -1.0]);
        });
        let report = StructuralValidator::default().validate(&glb);
        assert!(report.errors.iter().any(|e| e.contains("exceeds vertex count")));
    }

    #[test]
    fn test_bounds_mismatch() {
        let (_dir, base, _) = bundles();
        let glb = repack(&base, |doc| {
            doc.accessors[0].max = Some(vec![5.0, 1.0, 1.0]);
        });
        let report = StructuralValidator::default().validate(&glb);
        assert!(report.errors.iter().any(|e| e.contains("bounds")));
    }

    #[test]
    fn test_quantized_position_requires_extension() {
        let (_dir, _, quantized) = bundles();
        let glb = repack(&quantized, |doc| {
            doc.extensions_used.clear();
            doc.extensions_required.clear();
        });
        let report = StructuralValidator::default().validate(&glb);
        assert!(report.errors.iter().any(|e| e.contains("must be FLOAT")));
    }

    #[test]
    fn test_missing_mesh_reference() {
        let (_dir, base, _) = bundles();
        let glb = repack(&base, |doc| doc.nodes[0].mesh = Some(3));
        let report = StructuralValidator::default().validate(&glb);
        assert!(report.errors.iter().any(|e| e.contains("missing mesh")));
    }

    #[test]
    fn test_accessor_overrunning_view() {
        let (_dir, base, _) = bundles();
        let glb = repack(&base, |doc| doc.accessors[2].count = 3000);
        let report = StructuralValidator::default().validate(&glb);
        assert!(!report.is_valid());
    }
}
