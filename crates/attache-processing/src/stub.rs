//! Extension points for categories without a derived asset yet.

use attache_core::models::JobCategory;
use attache_core::ProcessingError;

use crate::traits::{Processor, ProcessorOutput, SourceMetadata};

/// Registered for video, audio and document attachments. Ends every job as a
/// no-op before the source is loaded.
pub struct UnsupportedProcessor {
    category: JobCategory,
}

impl UnsupportedProcessor {
    pub fn new(category: JobCategory) -> Self {
        Self { category }
    }

    fn reason(&self) -> String {
        format!("no derived asset is produced for {} attachments", self.category)
    }
}

impl Processor for UnsupportedProcessor {
    fn category(&self) -> JobCategory {
        self.category
    }

    fn skip_reason(&self, _metadata: &SourceMetadata) -> Option<String> {
        Some(self.reason())
    }

    fn process(
        &self,
        _source: &[u8],
        _metadata: &SourceMetadata,
    ) -> Result<ProcessorOutput, ProcessingError> {
        Ok(ProcessorOutput::NoOp {
            reason: self.reason(),
        })
    }
}
