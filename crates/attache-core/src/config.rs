//! Configuration module
//!
//! Reads pipeline settings from the environment (after loading `.env` when
//! present). Every value has a default so a bare environment starts a working
//! local pipeline; `validate` rejects combinations that would stall it.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::DEFAULT_MAX_ATTEMPTS;
use crate::storage_types::StorageBackend;

// Common constants
const WORKER_COUNT: usize = 4;
const JOB_TIMEOUT_SECS: u64 = 120;
const RETRY_BASE_DELAY_MS: u64 = 1000;
const RETRY_MAX_DELAY_SECS: u64 = 60;
const LEASE_GRACE_SECS: u64 = 30;
const MAINTENANCE_INTERVAL_SECS: u64 = 30;
const COMPLETED_RETENTION_SECS: u64 = 24 * 60 * 60;
const FAILED_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
const THUMBNAIL_MAX_DIMENSION: u32 = 300;
const THUMBNAIL_JPEG_QUALITY: u8 = 80;
const MODEL_COMPRESSION_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    // Worker pool
    pub worker_count: usize,
    pub job_timeout_secs: u64,
    // Queue / retry policy
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_secs: u64,
    /// Added to the job timeout to form the lease duration.
    pub lease_grace_secs: u64,
    pub maintenance_interval_secs: u64,
    pub completed_retention_secs: u64,
    pub failed_retention_secs: u64,
    pub queue_snapshot_path: Option<PathBuf>,
    // Image thumbnails
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
    pub thumbnail_jpeg_quality: u8,
    // 3D models
    pub model_compression_threshold_bytes: u64,
    // Storage
    pub storage_backend: StorageBackend,
    pub local_storage_path: PathBuf,
    pub local_storage_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            worker_count: WORKER_COUNT,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_secs: RETRY_MAX_DELAY_SECS,
            lease_grace_secs: LEASE_GRACE_SECS,
            maintenance_interval_secs: MAINTENANCE_INTERVAL_SECS,
            completed_retention_secs: COMPLETED_RETENTION_SECS,
            failed_retention_secs: FAILED_RETENTION_SECS,
            queue_snapshot_path: None,
            thumbnail_max_width: THUMBNAIL_MAX_DIMENSION,
            thumbnail_max_height: THUMBNAIL_MAX_DIMENSION,
            thumbnail_jpeg_quality: THUMBNAIL_JPEG_QUALITY,
            model_compression_threshold_bytes: MODEL_COMPRESSION_THRESHOLD_BYTES,
            storage_backend: StorageBackend::Local,
            local_storage_path: PathBuf::from("./data"),
            local_storage_base_url: "http://localhost:4000/files".to_string(),
        }
    }
}

/// Parse `key` from the environment, keeping `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => defaults.storage_backend,
        };

        let config = Config {
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or(defaults.environment),
            worker_count: env_or("WORKER_COUNT", defaults.worker_count),
            job_timeout_secs: env_or("JOB_TIMEOUT_SECS", defaults.job_timeout_secs),
            max_attempts: env_or("MAX_ATTEMPTS", defaults.max_attempts),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_secs: env_or("RETRY_MAX_DELAY_SECS", defaults.retry_max_delay_secs),
            lease_grace_secs: env_or("LEASE_GRACE_SECS", defaults.lease_grace_secs),
            maintenance_interval_secs: env_or(
                "MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval_secs,
            ),
            completed_retention_secs: env_or(
                "COMPLETED_RETENTION_SECS",
                defaults.completed_retention_secs,
            ),
            failed_retention_secs: env_or("FAILED_RETENTION_SECS", defaults.failed_retention_secs),
            queue_snapshot_path: env::var("QUEUE_SNAPSHOT_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            thumbnail_max_width: env_or("THUMBNAIL_MAX_WIDTH", defaults.thumbnail_max_width),
            thumbnail_max_height: env_or("THUMBNAIL_MAX_HEIGHT", defaults.thumbnail_max_height),
            thumbnail_jpeg_quality: env_or(
                "THUMBNAIL_JPEG_QUALITY",
                defaults.thumbnail_jpeg_quality,
            ),
            model_compression_threshold_bytes: env_or(
                "MODEL_COMPRESSION_THRESHOLD_BYTES",
                defaults.model_compression_threshold_bytes,
            ),
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_storage_path),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or(defaults.local_storage_base_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.worker_count == 0 {
            return Err(anyhow::anyhow!("WORKER_COUNT must be at least 1"));
        }
        if self.job_timeout_secs == 0 {
            return Err(anyhow::anyhow!("JOB_TIMEOUT_SECS must be at least 1"));
        }
        if self.retry_base_delay_ms == 0 {
            return Err(anyhow::anyhow!("RETRY_BASE_DELAY_MS must be at least 1"));
        }
        if self.retry_max_delay_secs.saturating_mul(1000) < self.retry_base_delay_ms {
            return Err(anyhow::anyhow!(
                "RETRY_MAX_DELAY_SECS ({}s) must not be below RETRY_BASE_DELAY_MS ({}ms)",
                self.retry_max_delay_secs,
                self.retry_base_delay_ms
            ));
        }
        if self.failed_retention_secs < self.completed_retention_secs {
            return Err(anyhow::anyhow!(
                "FAILED_RETENTION_SECS must be at least COMPLETED_RETENTION_SECS"
            ));
        }
        if self.thumbnail_max_width == 0 || self.thumbnail_max_height == 0 {
            return Err(anyhow::anyhow!("Thumbnail dimensions must be non-zero"));
        }
        if !(1..=100).contains(&self.thumbnail_jpeg_quality) {
            return Err(anyhow::anyhow!("THUMBNAIL_JPEG_QUALITY must be within 1..=100"));
        }
        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }

    /// A lease outlives the job timeout by the grace period, so only a worker
    /// that stopped heartbeating loses its job.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs + self.lease_grace_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn failed_retention(&self) -> Duration {
        Duration::from_secs(self.failed_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_max_delay(), Duration::from_secs(60));
        assert_eq!(config.model_compression_threshold_bytes, 5 * 1024 * 1024);
        assert_eq!(config.lease_duration(), Duration::from_secs(150));
    }

    #[test]
    fn zero_workers_rejected() {
        let config = Config {
            worker_count: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cap_below_base_rejected() {
        let config = Config {
            retry_base_delay_ms: 5000,
            retry_max_delay_secs: 1,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn huge_max_delay_does_not_overflow() {
        let config = Config {
            retry_max_delay_secs: u64::MAX,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn failed_retention_must_outlast_completed() {
        let config = Config {
            completed_retention_secs: 100,
            failed_retention_secs: 10,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn jpeg_quality_bounds() {
        let config = Config {
            thumbnail_jpeg_quality: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn production_detection() {
        let config = Config {
            environment: "Prod".to_string(),
            ..Config::default()
        };
        assert!(config.is_production());
        assert!(!Config::default().is_production());
    }
}
