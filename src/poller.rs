use std::{future::Future, time::Duration};

use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{CaptureError, Result},
    playlist::{
        Segment, SegmentAssembler, added_lines, available_duration, next_poll_interval,
        snapshot_lines,
    },
};

/// Something that can hand out the current text of a media playlist
pub trait PlaylistFetcher {
    fn fetch_playlist(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

impl PlaylistFetcher for reqwest::Client {
    #[instrument(skip(self))]
    async fn fetch_playlist(&self, url: &str) -> Result<String> {
        let fetch_error = |reason: String| CaptureError::Fetch {
            url: url.to_string(),
            reason,
        };

        let res = self
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        if !res.status().is_success() {
            return Err(fetch_error(format!("status {}", res.status())));
        }

        res.text().await.map_err(|e| fetch_error(e.to_string()))
    }
}

/// Outcome of a single poll
#[derive(Debug)]
pub struct Poll {
    pub segments: Vec<Segment>,
    pub next_poll: Duration,
}

/// Repeatedly fetches the live playlist and extracts the segments published since the last fetch
pub struct StreamPoller<F> {
    fetcher: F,
    url: String,
    default_interval: Duration,
    previous: Vec<String>,
    assembler: SegmentAssembler,
}

impl<F: PlaylistFetcher> StreamPoller<F> {
    pub fn new(fetcher: F, url: impl Into<String>, default_interval: Duration) -> Self {
        Self {
            fetcher,
            url: url.into(),
            default_interval,
            previous: Vec::new(),
            assembler: SegmentAssembler::default(),
        }
    }

    /// Fetches the playlist once and returns the segments that are new since the previous call
    ///
    /// # Errors
    /// Errors when the playlist cannot be fetched; the previous snapshot is kept in that case
    pub async fn poll_once(&mut self) -> Result<Poll> {
        let text = self.fetcher.fetch_playlist(&self.url).await?;
        Ok(self.ingest(&text))
    }

    fn ingest(&mut self, text: &str) -> Poll {
        let current = snapshot_lines(text);
        let next_poll = next_poll_interval(available_duration(&current), self.default_interval);

        let new_lines = added_lines(&self.previous, &current);
        debug!("{} new playlist lines", new_lines.len());
        let segments = self.assembler.assemble(new_lines);

        self.previous = current;
        Poll {
            segments,
            next_poll,
        }
    }

    /// Polls until `ct` is cancelled, pushing every discovered segment onto `queue`.
    ///
    /// The queue is bounded; when it is full the poller waits for room rather than dropping segments.
    pub async fn run(mut self, queue: mpsc::Sender<Segment>, ct: CancellationToken) {
        info!("Polling playlist {}", self.url);

        loop {
            let polled = select! {
                () = ct.cancelled() => break,
                p = self.poll_once() => p,
            };

            let sleep_for = match polled {
                Ok(poll) => {
                    if !poll.segments.is_empty() {
                        info!("Discovered {} new segments", poll.segments.len());
                    }
                    for segment in poll.segments {
                        select! {
                            () = ct.cancelled() => return,
                            sent = queue.send(segment) => {
                                if sent.is_err() {
                                    warn!("Segment queue closed, stopping poller");
                                    return;
                                }
                            }
                        }
                    }
                    poll.next_poll
                }
                Err(e) => {
                    warn!("{e}");
                    self.default_interval
                }
            };

            debug!("Next poll in {sleep_for:?}");
            select! {
                () = ct.cancelled() => break,
                () = tokio::time::sleep(sleep_for) => {}
            }
        }

        info!("Stopped polling {}", self.url);
    }
}
