//! Shared setup for pipeline tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use attache_core::models::{JobCategory, JobPayload};
use attache_core::Config;
use attache_processing::ProcessorRegistry;
use attache_storage::MemoryStorage;
use attache_worker::{JobQueue, QueueConfig, RecordingSink, WorkerPool, WorkerPoolConfig};
use image::{ImageFormat, Rgb, RgbImage};
use uuid::Uuid;

/// Queue, storage and sink wired for one test, with fast retry timings.
pub struct TestPipeline {
    pub queue: Arc<JobQueue>,
    pub storage: MemoryStorage,
    pub sink: RecordingSink,
    pub registry: ProcessorRegistry,
    pub pool_config: WorkerPoolConfig,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_queue_config(test_queue_config())
    }

    pub fn with_queue_config(config: QueueConfig) -> Self {
        Self {
            queue: Arc::new(JobQueue::new(config)),
            storage: MemoryStorage::new(),
            sink: RecordingSink::new(),
            registry: ProcessorRegistry::with_defaults(&Config::default()),
            pool_config: WorkerPoolConfig {
                worker_count: 2,
                job_timeout: Duration::from_secs(10),
                maintenance_interval: Duration::from_millis(50),
                snapshot_path: None,
            },
        }
    }

    /// Store `data` as an upload and enqueue a job for it.
    pub fn submit(&self, category: JobCategory, filename: &str, data: Vec<u8>) -> (Uuid, String) {
        let locator = format!("uploads/room-1/{}", filename);
        self.storage.put(locator.clone(), data);
        let message_id = format!("msg-{}", Uuid::new_v4());
        let id = self.queue.enqueue(
            category,
            JobPayload {
                message_id: message_id.clone(),
                room_id: "room-1".to_string(),
                source_locator: locator,
                original_filename: filename.to_string(),
                mime_type: "application/octet-stream".to_string(),
            },
        );
        (id, message_id)
    }

    pub fn start(&self) -> WorkerPool {
        WorkerPool::start(
            self.queue.clone(),
            Arc::new(self.registry.clone()),
            Arc::new(self.storage.clone()),
            Arc::new(self.sink.clone()),
            self.pool_config.clone(),
        )
    }

    /// Start a pool, wait until the queue drains and shut down so every
    /// outcome has reached the sink.
    pub async fn run_to_idle(&self) {
        let pool = self.start();
        tokio::time::timeout(Duration::from_secs(20), pool.wait_idle())
            .await
            .expect("pipeline did not go idle");
        pool.shutdown().await;
    }
}

pub fn test_queue_config() -> QueueConfig {
    QueueConfig {
        max_attempts: 3,
        retry_base_delay: Duration::from_millis(20),
        retry_max_delay: Duration::from_millis(50),
        lease_duration: Duration::from_secs(30),
        ..QueueConfig::default()
    }
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 160, 30]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .expect("encode jpeg");
    buffer
}

/// Wavy `n`×`n` grid of quads as OBJ text.
pub fn grid_obj(n: usize) -> Vec<u8> {
    use std::fmt::Write;
    let mut obj = String::new();
    for y in 0..=n {
        for x in 0..=n {
            let z = ((x + y) % 5) as f32 * 0.25;
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
    obj.into_bytes()
}
