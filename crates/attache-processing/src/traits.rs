//! Core traits for media processing
//!
//! Every file category is served by one [`Processor`]. Processors are plain
//! synchronous functions over bytes; the worker loads the source, runs them on
//! the blocking pool and persists whatever they return.

use attache_core::models::{DerivedKind, JobCategory, JobPayload};
use attache_core::ProcessingError;
use bytes::Bytes;
use uuid::Uuid;

/// What a processor knows about the file besides its bytes.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub job_id: Uuid,
    pub category: JobCategory,
    pub original_filename: String,
    pub mime_type: String,
    /// Lowercased, without the dot.
    pub extension: Option<String>,
}

impl SourceMetadata {
    pub fn from_payload(job_id: Uuid, category: JobCategory, payload: &JobPayload) -> Self {
        Self {
            job_id,
            category,
            original_filename: payload.original_filename.clone(),
            mime_type: payload.mime_type.clone(),
            extension: payload.extension(),
        }
    }

    /// Original filename without its extension, for naming derived assets.
    pub fn stem(&self) -> &str {
        match self.original_filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.original_filename,
        }
    }
}

/// Bytes ready to be persisted as a derived asset.
#[derive(Debug, Clone)]
pub struct DerivedAsset {
    pub kind: DerivedKind,
    pub data: Bytes,
    pub suggested_name: String,
    pub content_type: String,
    pub compressed: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ProcessorOutput {
    Derived(DerivedAsset),
    /// Deliberately no derived asset; not an error.
    NoOp { reason: String },
}

/// Format-specific conversion from source bytes to a derived asset.
pub trait Processor: Send + Sync {
    /// Category this processor is registered under.
    fn category(&self) -> JobCategory;

    /// Checked before any bytes are loaded. `Some(reason)` ends the job as a no-op.
    fn skip_reason(&self, _metadata: &SourceMetadata) -> Option<String> {
        None
    }

    /// Convert the source. Runs on a blocking thread.
    fn process(
        &self,
        source: &[u8],
        metadata: &SourceMetadata,
    ) -> Result<ProcessorOutput, ProcessingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(filename: &str) -> SourceMetadata {
        SourceMetadata::from_payload(
            Uuid::new_v4(),
            JobCategory::Model3d,
            &JobPayload {
                message_id: "m".to_string(),
                room_id: "r".to_string(),
                source_locator: format!("uploads/{}", filename),
                original_filename: filename.to_string(),
                mime_type: "model/obj".to_string(),
            },
        )
    }

    #[test]
    fn stem_strips_last_extension() {
        assert_eq!(metadata("teapot.obj").stem(), "teapot");
        assert_eq!(metadata("archive.tar.gz").stem(), "archive.tar");
        assert_eq!(metadata("noext").stem(), "noext");
        assert_eq!(metadata(".hidden").stem(), ".hidden");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(metadata("Bracket.STL").extension.as_deref(), Some("stl"));
    }
}
