use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Timelike};
use chrono_tz::Tz;
use futures_util::StreamExt as _;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::mpsc};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{CaptureError, Result},
    playlist::Segment,
};

pub const ARCHIVE_EXTENSION: &str = "ts";

/// Something that can fetch the media bytes of a segment
pub trait SegmentDownloader {
    fn download_segment(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

impl SegmentDownloader for reqwest::Client {
    #[instrument(skip(self))]
    async fn download_segment(&self, url: &str) -> Result<Vec<u8>> {
        let download_error = |reason: String| CaptureError::Download {
            url: url.to_string(),
            reason,
        };

        let res = self
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        if !res.status().is_success() {
            return Err(download_error(format!("status {}", res.status())));
        }

        // The whole body is buffered so a dropped connection never leaves half a segment on disk
        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.map_err(|e| download_error(e.to_string()))?);
        }

        Ok(body)
    }
}

/// The archive hour a segment belongs to, as wall-clock time in the archive timezone.
///
/// Keys are compared on local time, so the repeated hour of a DST fall-back
/// lands in the same file instead of reopening one that was already handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourKey(NaiveDateTime);

impl HourKey {
    /// Truncates `timestamp` to the top of its hour, then moves it into `timezone`
    #[must_use]
    pub fn new(timestamp: &DateTime<FixedOffset>, timezone: Tz) -> Self {
        let into_hour = TimeDelta::seconds(i64::from(timestamp.minute() * 60 + timestamp.second()))
            + TimeDelta::nanoseconds(i64::from(timestamp.nanosecond()));
        let top_of_hour = *timestamp - into_hour;

        Self(top_of_hour.with_timezone(&timezone).naive_local())
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{ARCHIVE_EXTENSION}", self.0.format("%Y-%m-%d-%H"))
    }

    #[must_use]
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:00"))
    }
}

/// What happened to a grabbed segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grabbed {
    Appended(HourKey),
    /// Arrived after its hour was handed off to the transcoder
    Late(HourKey),
}

/// Downloads segments in queue order and appends them to per-hour archive files
pub struct SegmentGrabber<D> {
    downloader: D,
    archive_dir: PathBuf,
    timezone: Tz,
    current: Option<HourKey>,
    late_segments: u64,
    completed: mpsc::Sender<PathBuf>,
}

impl<D: SegmentDownloader> SegmentGrabber<D> {
    pub fn new(
        downloader: D,
        archive_dir: impl Into<PathBuf>,
        timezone: Tz,
        completed: mpsc::Sender<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            archive_dir: archive_dir.into(),
            timezone,
            current: None,
            late_segments: 0,
            completed,
        }
    }

    /// Hour currently being written to, if any
    #[must_use]
    pub const fn current_hour(&self) -> Option<HourKey> {
        self.current
    }

    /// Segments dropped so far because their hour was already complete
    #[must_use]
    pub const fn late_segments(&self) -> u64 {
        self.late_segments
    }

    /// Appends one segment to its hour file.
    ///
    /// When the segment opens a new hour, the previous hour file is handed to
    /// the completion queue before anything is written to the new one. A
    /// segment that belongs to an hour that was already handed off is dropped.
    ///
    /// # Errors
    /// Errors when the segment cannot be downloaded or written; the segment is lost
    pub async fn grab(&mut self, segment: Segment) -> Result<Grabbed> {
        let hour = HourKey::new(&segment.timestamp, self.timezone);

        match self.current {
            Some(current) if hour < current => {
                self.late_segments += 1;
                warn!(
                    "Segment {} belongs to already completed hour {hour}, dropping it ({} late so far)",
                    segment.timestamp, self.late_segments
                );
                return Ok(Grabbed::Late(hour));
            }
            Some(current) if hour > current => self.complete(current).await,
            _ => {}
        }
        self.current = Some(hour);

        debug!("Grabbing segment {} ({})", segment.timestamp, segment.url);
        let body = self.downloader.download_segment(&segment.url).await?;
        self.append(hour, &body).await?;

        Ok(Grabbed::Appended(hour))
    }

    async fn complete(&self, hour: HourKey) {
        let path = hour.path_in(&self.archive_dir);
        info!("Hour {hour} is complete: {path:?}");
        if self.completed.send(path).await.is_err() {
            warn!("Completion queue closed, hour {hour} will not be transcoded");
        }
    }

    async fn append(&self, hour: HourKey, body: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.archive_dir).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(hour.path_in(&self.archive_dir))
            .await?;
        file.write_all(body).await?;
        file.flush().await?;

        Ok(())
    }

    /// Grabs segments until the queue is closed and drained
    pub async fn run(mut self, mut segments: mpsc::Receiver<Segment>) {
        while let Some(segment) = segments.recv().await {
            if let Err(e) = self.grab(segment).await {
                warn!("{e}");
            }
        }

        if self.late_segments > 0 {
            info!(
                "{} segments were dropped for arriving after their hour was complete",
                self.late_segments
            );
        }
        if let Some(hour) = self.current {
            info!(
                "Segment queue closed; hour {hour} is unfinished and stays at {:?}",
                hour.path_in(&self.archive_dir)
            );
        }
    }
}
