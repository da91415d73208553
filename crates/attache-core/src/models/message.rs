use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::job::{DerivedKind, JobResult};

/// Attachment processing state as shown to chat clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    /// Nothing to derive for this attachment.
    Skipped,
    Failed,
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Skipped => write!(f, "skipped"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Fields written onto the originating message record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageUpdate {
    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            processing_status: Some(status),
            ..Default::default()
        }
    }
}

impl From<&JobResult> for MessageUpdate {
    fn from(result: &JobResult) -> Self {
        match result {
            JobResult::Derived(derived) => {
                let mut update = MessageUpdate::status(ProcessingStatus::Completed);
                match derived.kind {
                    DerivedKind::Thumbnail => update.thumbnail_url = Some(derived.url.clone()),
                    DerivedKind::Render => update.render_url = Some(derived.url.clone()),
                }
                update
            }
            JobResult::NoOp { .. } => MessageUpdate::status(ProcessingStatus::Skipped),
            JobResult::Error(failure) => MessageUpdate {
                processing_status: Some(ProcessingStatus::Failed),
                error: Some(failure.message.clone()),
                ..Default::default()
            },
        }
    }
}

/// Realtime event published to the message's room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub message_id: String,
    #[serde(flatten)]
    pub fields: MessageUpdate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::models::{DerivedResult, JobFailure};

    #[test]
    fn thumbnail_result_sets_thumbnail_url() {
        let result = JobResult::Derived(DerivedResult {
            kind: DerivedKind::Thumbnail,
            locator: "derived/thumbnail/a.jpg".to_string(),
            url: "http://files/derived/thumbnail/a.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            compressed: false,
            warnings: vec![],
        });
        let update = MessageUpdate::from(&result);
        assert_eq!(update.processing_status, Some(ProcessingStatus::Completed));
        assert_eq!(
            update.thumbnail_url.as_deref(),
            Some("http://files/derived/thumbnail/a.jpg")
        );
        assert!(update.render_url.is_none());
        assert!(update.error.is_none());
    }

    #[test]
    fn noop_result_has_no_url_and_no_error() {
        let update = MessageUpdate::from(&JobResult::NoOp {
            reason: "unsupported".to_string(),
        });
        assert_eq!(update.processing_status, Some(ProcessingStatus::Skipped));
        assert!(update.render_url.is_none());
        assert!(update.error.is_none());
    }

    #[test]
    fn error_result_carries_message() {
        let update = MessageUpdate::from(&JobResult::Error(JobFailure {
            class: ErrorClass::Permanent,
            message: "corrupt mesh".to_string(),
            attempts: 1,
        }));
        assert_eq!(update.processing_status, Some(ProcessingStatus::Failed));
        assert_eq!(update.error.as_deref(), Some("corrupt mesh"));
    }

    #[test]
    fn room_event_flattens_fields() {
        let event = RoomEvent {
            message_id: "m1".to_string(),
            fields: MessageUpdate::status(ProcessingStatus::Skipped),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["messageId"], "m1");
        assert_eq!(value["processingStatus"], "skipped");
        assert!(value.get("renderUrl").is_none());
    }
}
