use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::{CaptureConfig, FILE_READY_QUEUE_CAPACITY},
    grabber::{SegmentDownloader, SegmentGrabber},
    poller::{PlaylistFetcher, StreamPoller},
    transcoder::{HourTranscoder, Tagger, Transcoder},
};

/// Captures one station: poller, grabber and transcoder wired together by two queues
pub struct Recorder<H, T> {
    http: H,
    tool: T,
    config: CaptureConfig,
    stream_url: String,
    artist: String,
}

impl<H, T> Recorder<H, T>
where
    H: PlaylistFetcher + SegmentDownloader + Clone + Send + Sync + 'static,
    T: Transcoder + Tagger + Send + Sync + 'static,
{
    pub fn new(
        http: H,
        tool: T,
        config: CaptureConfig,
        stream_url: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tool,
            config,
            stream_url: stream_url.into(),
            artist: artist.into(),
        }
    }

    /// Records until `ct` is cancelled.
    ///
    /// Cancellation only stops polling. Segments already queued are still
    /// downloaded and completed hours are still transcoded before this returns.
    ///
    /// # Errors
    /// Errors if the grabber or transcoder task panicked
    pub async fn record(self, ct: CancellationToken) -> Result<()> {
        let (segment_tx, segment_rx) = mpsc::channel(self.config.queue_capacity);
        let (ready_tx, ready_rx) = mpsc::channel(FILE_READY_QUEUE_CAPACITY);

        let grabber = SegmentGrabber::new(
            self.http.clone(),
            &self.config.archive_dir,
            self.config.timezone,
            ready_tx,
        );
        let transcoder = HourTranscoder::new(self.tool, &self.config.output_dir, self.artist);
        let grab_task = tokio::spawn(grabber.run(segment_rx));
        let transcode_task = tokio::spawn(transcoder.run(ready_rx));

        info!(
            "Archiving into {:?}, saving recordings into {:?}",
            self.config.archive_dir, self.config.output_dir
        );
        StreamPoller::new(self.http, self.stream_url, self.config.poll_interval)
            .run(segment_tx, ct)
            .await;

        grab_task.await.context("Segment grabber task failed")?;
        transcode_task.await.context("Hour transcoder task failed")?;

        info!("Recorder stopped");
        Ok(())
    }
}
