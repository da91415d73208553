//! 3D model previews
//!
//! STL, OBJ and PLY meshes are converted into a self-contained GLB:
//! parse into a [`TriangleMesh`], write a glTF scene with external buffers
//! into scratch space, optionally quantize, pack and validate.

pub mod glb;
pub mod gltf;
pub mod mesh;
pub mod obj;
pub mod ply;
pub mod processor;
pub mod stl;
pub mod validator;

use attache_core::ProcessingError;
use thiserror::Error;

pub use mesh::{Bounds, TriangleMesh};
pub use processor::{Model3dConfig, Model3dProcessor};
pub use validator::{ContainerValidator, StructuralValidator, ValidationReport};

/// Model extensions with a converter. Anything else in the 3D category is a no-op.
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &["stl", "obj", "ply"];

#[derive(Error, Debug)]
pub enum Model3dError {
    #[error("{format} parse error: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("Mesh contains no triangles")]
    EmptyMesh,

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed scene bundle: {0}")]
    Bundle(String),

    #[error("Scratch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scene JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Model3dError {
    pub(crate) fn parse(format: &'static str, message: impl Into<String>) -> Self {
        Model3dError::Parse {
            format,
            message: message.into(),
        }
    }
}

impl From<Model3dError> for ProcessingError {
    /// Scratch-space I/O can succeed on another attempt; bad input never will.
    /// A malformed bundle is our own output failing its structure checks.
    fn from(err: Model3dError) -> Self {
        match err {
            Model3dError::Io(_) => ProcessingError::transient(err),
            Model3dError::Bundle(_) => ProcessingError::validation(err),
            _ => ProcessingError::permanent(err),
        }
    }
}

/// Parse source bytes by (lowercased) file extension.
pub fn parse_mesh(extension: &str, data: &[u8]) -> Result<TriangleMesh, Model3dError> {
    let mesh = match extension {
        "stl" => stl::parse(data)?,
        "obj" => obj::parse(data)?,
        "ply" => ply::parse(data)?,
        other => return Err(Model3dError::UnsupportedFormat(other.to_string())),
    };
    mesh.check()?;
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attache_core::ErrorClass;

    #[test]
    fn test_error_classification() {
        let err: ProcessingError = Model3dError::EmptyMesh.into();
        assert_eq!(err.class(), ErrorClass::Permanent);

        let err: ProcessingError =
            Model3dError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).into();
        assert_eq!(err.class(), ErrorClass::Transient);

        let err: ProcessingError = Model3dError::Bundle("accessor 0 not declared".into()).into();
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_mesh_rejects_unknown_format() {
        assert!(matches!(
            parse_mesh("step", b"ISO-10303-21;"),
            Err(Model3dError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_mesh_rejects_empty_obj() {
        assert!(matches!(
            parse_mesh("obj", b"# nothing here\n"),
            Err(Model3dError::EmptyMesh)
        ));
    }
}
