use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::NaiveDate;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use crate::error::{CaptureError, Result};

pub const OUTPUT_EXTENSION: &str = "mp3";

static ARCHIVE_FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})-(\d{2})\.ts$").unwrap());

/// Converts an archive file into the compressed output format
pub trait Transcoder {
    fn transcode(&self, input: &Path, output: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Writes metadata into an already transcoded file
pub trait Tagger {
    fn tag(&self, file: &Path, tags: &TrackTags) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub album: String,
    pub title: String,
    pub track: u32,
    pub artist: String,
}

/// Date and hour a finished archive file was captured in, read back from its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHour {
    pub date: NaiveDate,
    pub hour: u32,
}

impl CaptureHour {
    /// # Errors
    /// Errors when the file name is not `YYYY-MM-DD-HH.ts`
    pub fn from_path(path: &Path) -> Result<Self> {
        let parse_error = || CaptureError::Parse {
            what: "capture hour",
            value: path.display().to_string(),
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(parse_error)?;
        let captures = ARCHIVE_FILE_REGEX.captures(name).ok_or_else(parse_error)?;

        let date = NaiveDate::parse_from_str(&captures[1], "%Y-%m-%d").map_err(|_| parse_error())?;
        let hour = captures[2]
            .parse::<u32>()
            .ok()
            .filter(|h| *h < 24)
            .ok_or_else(parse_error)?;

        Ok(Self { date, hour })
    }

    #[must_use]
    pub fn tags(&self, artist: &str) -> TrackTags {
        TrackTags {
            album: self.date.format("%Y-%m-%d").to_string(),
            title: format!("{:02}:00", self.hour),
            track: self.hour,
            artist: artist.to_string(),
        }
    }

    /// `<output_dir>/<date>/<date>-<hour>.mp3`
    #[must_use]
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        let date = self.date.format("%Y-%m-%d");
        output_dir
            .join(date.to_string())
            .join(format!("{date}-{:02}.{OUTPUT_EXTENSION}", self.hour))
    }
}

/// Turns completed hour files into tagged, compressed recordings
pub struct HourTranscoder<T> {
    tool: T,
    output_dir: PathBuf,
    artist: String,
}

impl<T: Transcoder + Tagger> HourTranscoder<T> {
    pub fn new(tool: T, output_dir: impl Into<PathBuf>, artist: impl Into<String>) -> Self {
        Self {
            tool,
            output_dir: output_dir.into(),
            artist: artist.into(),
        }
    }

    /// Transcodes and tags `source`, deleting it once the tagged output is on disk
    ///
    /// # Errors
    /// Errors on any failing step; `source` is left untouched in that case
    #[instrument(skip(self))]
    pub async fn process(&self, source: &Path) -> Result<PathBuf> {
        let hour = CaptureHour::from_path(source)?;
        let output = hour.output_path(&self.output_dir);
        if let Some(date_dir) = output.parent() {
            tokio::fs::create_dir_all(date_dir).await?;
        }

        self.tool.transcode(source, &output).await?;
        self.tool.tag(&output, &hour.tags(&self.artist)).await?;

        if !tokio::fs::try_exists(&output).await? {
            return Err(CaptureError::Transcode {
                input: source.to_path_buf(),
                reason: format!("{} is missing after tagging", output.display()),
            });
        }
        tokio::fs::remove_file(source).await?;

        Ok(output)
    }

    /// Processes completed hours until the queue is closed and drained
    pub async fn run(self, mut files: mpsc::Receiver<PathBuf>) {
        while let Some(source) = files.recv().await {
            match self.process(&source).await {
                Ok(output) => info!("Saved {output:?}"),
                Err(e) => error!("{e}. Leaving {source:?} in place for manual recovery"),
            }
        }
    }
}
