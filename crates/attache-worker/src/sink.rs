//! Result propagation back to chat messages.
//!
//! Workers never call the sink themselves. Status changes (a job starting,
//! a job reaching a terminal state) travel over an mpsc channel to a single [`ResultPublisher`] task, which writes the message
//! record first and then publishes the room event.

use anyhow::Result;
use async_trait::async_trait;
use attache_core::models::{Job, JobCategory, MessageUpdate, ProcessingStatus, RoomEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Message fields to write after a job started or reached Completed or Failed.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub category: JobCategory,
    pub message_id: String,
    pub room_id: String,
    pub update: MessageUpdate,
}

impl JobOutcome {
    pub fn started(job: &Job) -> Self {
        Self::new(job, MessageUpdate::status(ProcessingStatus::Processing))
    }

    /// `None` while the job has no result yet.
    pub fn finished(job: &Job) -> Option<Self> {
        job.result
            .as_ref()
            .map(|result| Self::new(job, MessageUpdate::from(result)))
    }

    fn new(job: &Job, update: MessageUpdate) -> Self {
        Self {
            job_id: job.id,
            category: job.category,
            message_id: job.payload.message_id.clone(),
            room_id: job.payload.room_id.clone(),
            update,
        }
    }
}

pub type OutcomeSender = mpsc::Sender<JobOutcome>;

/// Where processing results are written.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist fields onto the originating message.
    async fn update_message(&self, message_id: &str, update: &MessageUpdate) -> Result<()>;

    /// Notify the message's room. Best-effort; failures are logged and dropped.
    async fn publish(&self, room_id: &str, event: &RoomEvent) -> Result<()>;
}

/// Sink that only logs. Used when no chat backend is attached.
pub struct TracingResultSink;

#[async_trait]
impl ResultSink for TracingResultSink {
    async fn update_message(&self, message_id: &str, update: &MessageUpdate) -> Result<()> {
        tracing::info!(
            message_id,
            status = ?update.processing_status,
            thumbnail_url = ?update.thumbnail_url,
            render_url = ?update.render_url,
            error = ?update.error,
            "Message updated"
        );
        Ok(())
    }

    async fn publish(&self, room_id: &str, event: &RoomEvent) -> Result<()> {
        tracing::debug!(room_id, message_id = %event.message_id, "Room event published");
        Ok(())
    }
}

/// Sink that keeps every call in memory.
#[derive(Default, Clone)]
pub struct RecordingSink {
    updates: Arc<Mutex<Vec<(String, MessageUpdate)>>>,
    events: Arc<Mutex<Vec<(String, RoomEvent)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, MessageUpdate)> {
        self.updates.lock().clone()
    }

    pub fn events(&self) -> Vec<(String, RoomEvent)> {
        self.events.lock().clone()
    }

    /// Latest update written for `message_id`.
    pub fn update_for(&self, message_id: &str) -> Option<MessageUpdate> {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == message_id)
            .map(|(_, update)| update.clone())
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn update_message(&self, message_id: &str, update: &MessageUpdate) -> Result<()> {
        self.updates
            .lock()
            .push((message_id.to_string(), update.clone()));
        Ok(())
    }

    async fn publish(&self, room_id: &str, event: &RoomEvent) -> Result<()> {
        self.events.lock().push((room_id.to_string(), event.clone()));
        Ok(())
    }
}

/// Drains the outcome channel into a [`ResultSink`].
pub struct ResultPublisher {
    sink: Arc<dyn ResultSink>,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self { sink }
    }

    /// Run until every sender is dropped.
    pub async fn run(self, mut outcomes: mpsc::Receiver<JobOutcome>) {
        tracing::debug!("Result publisher started");
        while let Some(outcome) = outcomes.recv().await {
            self.deliver(&outcome).await;
        }
        tracing::debug!("Result publisher stopped");
    }

    async fn deliver(&self, outcome: &JobOutcome) {
        if let Err(e) = self
            .sink
            .update_message(&outcome.message_id, &outcome.update)
            .await
        {
            tracing::error!(
                job_id = %outcome.job_id,
                message_id = %outcome.message_id,
                error = %e,
                "Failed to update message with processing result"
            );
        }

        let event = RoomEvent {
            message_id: outcome.message_id.clone(),
            fields: outcome.update.clone(),
        };
        if let Err(e) = self.sink.publish(&outcome.room_id, &event).await {
            tracing::warn!(
                job_id = %outcome.job_id,
                room_id = %outcome.room_id,
                error = %e,
                "Room event not delivered"
            );
        }
    }
}
