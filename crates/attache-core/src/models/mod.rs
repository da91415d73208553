//! Data models for the pipeline
//!
//! `job` holds the queue's records and outcomes; `message` holds the shapes
//! written back to the chat message and published to its room.

mod job;
mod message;

pub use job::*;
pub use message::*;
