//! 3D model processor - GLB preview generation

use std::sync::Arc;

use attache_core::models::{DerivedKind, JobCategory};
use attache_core::{Config, ProcessingError};
use bytes::Bytes;

use super::glb;
use super::gltf::{self, SceneBundle};
use super::validator::{ContainerValidator, StructuralValidator, ValidationReport};
use super::{parse_mesh, CONVERTIBLE_EXTENSIONS};
use crate::scratch::ScratchDir;
use crate::traits::{DerivedAsset, Processor, ProcessorOutput, SourceMetadata};

pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

#[derive(Debug, Clone, Copy)]
pub struct Model3dConfig {
    /// Sources larger than this are quantized before packing.
    pub compression_threshold_bytes: u64,
}

impl Default for Model3dConfig {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: 5 * 1024 * 1024,
        }
    }
}

impl From<&Config> for Model3dConfig {
    fn from(config: &Config) -> Self {
        Self {
            compression_threshold_bytes: config.model_compression_threshold_bytes,
        }
    }
}

pub struct Model3dProcessor {
    config: Model3dConfig,
    validator: Arc<dyn ContainerValidator>,
}

/// Packed container plus what is known about how it was produced.
struct Packed {
    data: Vec<u8>,
    compressed: bool,
    warnings: Vec<String>,
}

impl Model3dProcessor {
    pub fn new(config: Model3dConfig) -> Self {
        Self {
            config,
            validator: Arc::new(StructuralValidator::default()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ContainerValidator>) -> Self {
        self.validator = validator;
        self
    }

    fn should_compress(&self, source_len: usize) -> bool {
        source_len as u64 > self.config.compression_threshold_bytes
    }

    /// Pack the base bundle, or its quantized variant when the source is large.
    /// A quantized container that fails validation is replaced by the plain
    /// one, which is accepted whatever its own report says.
    fn build(
        &self,
        base: &SceneBundle,
        scratch: &ScratchDir,
        compress: bool,
    ) -> Result<Packed, ProcessingError> {
        if compress {
            let compressed = gltf::quantize(base, &scratch.subdir("compressed")?)?;
            let data = glb::pack(&compressed)?;
            let report = self.validator.validate(&data);
            if report.is_valid() {
                return Ok(Packed {
                    data,
                    compressed: true,
                    warnings: report.warnings,
                });
            }

            tracing::warn!(
                report = %report,
                "Compressed container failed validation, falling back to uncompressed"
            );
            let mut warnings = prefixed("compressed output rejected", &report);
            let data = glb::pack(base)?;
            let fallback = self.validator.validate(&data);
            warnings.extend(prefixed("validation", &fallback));
            return Ok(Packed {
                data,
                compressed: false,
                warnings,
            });
        }

        let data = glb::pack(base)?;
        let report = self.validator.validate(&data);
        if !report.is_valid() {
            tracing::warn!(
                report = %report,
                "Container failed validation with no fallback available, accepting as-is"
            );
        }
        Ok(Packed {
            data,
            compressed: false,
            warnings: prefixed("validation", &report),
        })
    }
}

fn prefixed(label: &str, report: &ValidationReport) -> Vec<String> {
    report
        .errors
        .iter()
        .map(|e| format!("{}: {}", label, e))
        .chain(report.warnings.iter().cloned())
        .collect()
}

impl Processor for Model3dProcessor {
    fn category(&self) -> JobCategory {
        JobCategory::Model3d
    }

    fn skip_reason(&self, metadata: &SourceMetadata) -> Option<String> {
        match metadata.extension.as_deref() {
            Some(ext) if CONVERTIBLE_EXTENSIONS.contains(&ext) => None,
            Some(ext) => Some(format!("no converter for .{} models", ext)),
            None => Some("model file has no extension".to_string()),
        }
    }

    fn process(
        &self,
        source: &[u8],
        metadata: &SourceMetadata,
    ) -> Result<ProcessorOutput, ProcessingError> {
        if let Some(reason) = self.skip_reason(metadata) {
            return Ok(ProcessorOutput::NoOp { reason });
        }
        let extension = metadata.extension.as_deref().unwrap_or_default();
        let start = std::time::Instant::now();

        let scratch = ScratchDir::new(metadata.job_id)?;

        let mut mesh = parse_mesh(extension, source)?;
        mesh.ensure_normals();
        let base = gltf::convert(&mesh, &scratch.subdir("base")?)?;

        let compress = self.should_compress(source.len());
        let packed = self.build(&base, &scratch, compress)?;

        tracing::info!(
            job_id = %metadata.job_id,
            format = extension,
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            source_bytes = source.len(),
            glb_bytes = packed.data.len(),
            compression_attempted = compress,
            compressed = packed.compressed,
            warnings = packed.warnings.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Converted model to GLB"
        );

        Ok(ProcessorOutput::Derived(DerivedAsset {
            kind: DerivedKind::Render,
            data: Bytes::from(packed.data),
            suggested_name: format!("{}.glb", metadata.stem()),
            content_type: GLB_CONTENT_TYPE.to_string(),
            compressed: packed.compressed,
            warnings: packed.warnings,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model3d::glb::split;
    use crate::model3d::gltf::{Document, KHR_MESH_QUANTIZATION};
    use attache_core::models::JobPayload;
    use attache_core::ErrorClass;
    use std::fmt::Write;
    use uuid::Uuid;

    fn metadata(filename: &str) -> SourceMetadata {
        SourceMetadata::from_payload(
            Uuid::new_v4(),
            JobCategory::Model3d,
            &JobPayload {
                message_id: "m".to_string(),
                room_id: "r".to_string(),
                source_locator: format!("uploads/{}", filename),
                original_filename: filename.to_string(),
                mime_type: "application/octet-stream".to_string(),
            },
        )
    }

    /// Triangulated grid of `n`×`n` quads as OBJ text.
    fn grid_obj(n: usize) -> String {
        let mut obj = String::from("# grid\n");
        for y in 0..=n {
            for x in 0..=n {
                let z = ((x * y) % 7) as f32 * 0.1;
                writeln!(obj, "v {} {} {}", x, y, z).unwrap();
            }
        }
        let row = n + 1;
        for y in 0..n {
            for x in 0..n {
                let a = y * row + x + 1;
                writeln!(obj, "f {} {} {} {}", a, a + 1, a + row + 1, a + row).unwrap();
            }
        }
        obj
    }

    fn document(glb: &[u8]) -> Document {
        serde_json::from_slice(split(glb).unwrap().json).unwrap()
    }

    fn derived(output: ProcessorOutput) -> DerivedAsset {
        match output {
            ProcessorOutput::Derived(asset) => asset,
            ProcessorOutput::NoOp { reason } => panic!("unexpected no-op: {}", reason),
        }
    }

    struct RejectAll;

    impl ContainerValidator for RejectAll {
        fn validate(&self, _container: &[u8]) -> ValidationReport {
            ValidationReport {
                errors: vec!["rejected".to_string()],
                warnings: Vec::new(),
            }
        }
    }

    #[test]
    fn test_unconvertible_extension_is_noop() {
        let processor = Model3dProcessor::new(Model3dConfig::default());
        let meta = metadata("part.dxd");
        assert!(processor.skip_reason(&meta).is_some());
        let output = processor.process(b"whatever", &meta).unwrap();
        assert!(matches!(output, ProcessorOutput::NoOp { .. }));
    }

    #[test]
    fn test_small_obj_is_not_compressed() {
        let processor = Model3dProcessor::new(Model3dConfig::default());
        let asset = derived(
            processor
                .process(grid_obj(4).as_bytes(), &metadata("grid.obj"))
                .unwrap(),
        );

        assert_eq!(asset.kind, DerivedKind::Render);
        assert_eq!(asset.suggested_name, "grid.glb");
        assert_eq!(asset.content_type, "model/gltf-binary");
        assert!(!asset.compressed);
        assert!(asset.warnings.is_empty(), "{:?}", asset.warnings);
        assert!(StructuralValidator::default().validate(&asset.data).is_valid());
        assert!(document(&asset.data).extensions_used.is_empty());
    }

    #[test]
    fn test_obj_above_threshold_is_quantized() {
        let source = grid_obj(30);
        let processor = Model3dProcessor::new(Model3dConfig {
            compression_threshold_bytes: (source.len() / 2) as u64,
        });
        let asset = derived(processor.process(source.as_bytes(), &metadata("big.obj")).unwrap());

        assert!(asset.compressed);
        let doc = document(&asset.data);
        assert_eq!(doc.extensions_required, vec![KHR_MESH_QUANTIZATION.to_string()]);
        assert!(StructuralValidator::default().validate(&asset.data).is_valid());
    }

    #[test]
    fn test_rejected_compression_falls_back_to_uncompressed() {
        let source = grid_obj(30);
        let processor = Model3dProcessor::new(Model3dConfig {
            compression_threshold_bytes: 0,
        })
        .with_validator(Arc::new(StructuralValidator::with_supported_extensions(
            Vec::<String>::new(),
        )));
        let asset = derived(processor.process(source.as_bytes(), &metadata("big.obj")).unwrap());

        assert!(!asset.compressed);
        assert!(asset
            .warnings
            .iter()
            .any(|w| w.starts_with("compressed output rejected")));
        let doc = document(&asset.data);
        assert!(doc.extensions_used.is_empty());
        assert_eq!(doc.accessors[0].component_type, gltf::FLOAT);
    }

    #[test]
    fn test_invalid_fallback_is_still_accepted() {
        let processor = Model3dProcessor::new(Model3dConfig {
            compression_threshold_bytes: 0,
        })
        .with_validator(Arc::new(RejectAll));
        let asset = derived(
            processor
                .process(grid_obj(2).as_bytes(), &metadata("grid.obj"))
                .unwrap(),
        );
        assert!(!asset.compressed);
        assert_eq!(asset.warnings.len(), 2);
    }

    #[test]
    fn test_invalid_uncompressed_accepted_with_warnings() {
        let processor =
            Model3dProcessor::new(Model3dConfig::default()).with_validator(Arc::new(RejectAll));
        let asset = derived(
            processor
                .process(grid_obj(2).as_bytes(), &metadata("grid.obj"))
                .unwrap(),
        );
        assert_eq!(asset.warnings, vec!["validation: rejected".to_string()]);
    }

    #[test]
    fn test_corrupt_source_is_permanent() {
        let processor = Model3dProcessor::new(Model3dConfig::default());
        let err = processor
            .process(b"v 0 0 0\nf 1 2 3\n", &metadata("broken.obj"))
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_malformed_sources_are_permanent() {
        let mut huge_ply = b"ply\nformat binary_little_endian 1.0\nelement vertex 1000000000000\n\
property float x\nproperty float y\nproperty float z\nend_header\n"
            .to_vec();
        huge_ply.extend_from_slice(&[0u8; 4]);

        let mut short_stl = vec![0u8; 80];
        short_stl.extend_from_slice(&2u32.to_le_bytes());
        short_stl.extend_from_slice(&[0u8; 60]);

        let processor = Model3dProcessor::new(Model3dConfig::default());
        for (name, data) in [
            ("huge.ply", huge_ply),
            ("short.stl", short_stl),
            ("far.obj", b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4294967295\n".to_vec()),
        ] {
            let err = processor.process(&data, &metadata(name)).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Permanent, "{}", name);
        }
    }

    #[test]
    fn test_stl_uses_stem_for_name() {
        let stl = "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\n\
                   vertex 0 1 0\nendloop\nendfacet\nendsolid t\n";
        let processor = Model3dProcessor::new(Model3dConfig::default());
        let asset = derived(processor.process(stl.as_bytes(), &metadata("Bracket.STL")).unwrap());
        assert_eq!(asset.suggested_name, "Bracket.glb");
    }
}
