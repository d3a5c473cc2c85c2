use std::{path::PathBuf, time::Duration};

use anyhow::{Result, anyhow, ensure};
use chrono_tz::Tz;

/// Completed hours waiting for ffmpeg; a handful is plenty since one arrives per hour
pub const FILE_READY_QUEUE_CAPACITY: usize = 16;

/// Everything the capture pipeline needs once the station has been resolved
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub archive_dir: PathBuf,
    pub output_dir: PathBuf,
    pub timezone: Tz,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub bitrate: String,
    pub queue_capacity: usize,
}

impl CaptureConfig {
    /// # Errors
    /// Errors when the timezone is unknown or a numeric setting is zero
    pub fn new(
        archive_dir: PathBuf,
        output_dir: PathBuf,
        timezone: &str,
        poll_interval_secs: u64,
        request_timeout_secs: u64,
        bitrate: String,
        queue_capacity: usize,
    ) -> Result<Self> {
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid timezone `{timezone}`: {e}"))?;
        ensure!(poll_interval_secs > 0, "Poll interval must be at least 1 second");
        ensure!(request_timeout_secs > 0, "Request timeout must be at least 1 second");
        ensure!(queue_capacity > 0, "Queue capacity must be at least 1");

        Ok(Self {
            archive_dir,
            output_dir,
            timezone,
            poll_interval: Duration::from_secs(poll_interval_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            bitrate,
            queue_capacity,
        })
    }
}
