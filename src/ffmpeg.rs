use std::{ffi::OsStr, io::ErrorKind, path::Path, process::Stdio};

use tracing::{debug, error, instrument};

use crate::{
    error::{CaptureError, Result},
    transcoder::{Tagger, TrackTags, Transcoder},
};

/// Checks if ffmpeg is installed / available in PATH
pub async fn is_installed() -> bool {
    debug!("Checking for ffmpeg installation");
    tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .stderr(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}

/// Transcodes archive hours into MP3 and tags them, both through the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    bitrate: String,
}

impl Ffmpeg {
    #[must_use]
    pub fn new(bitrate: impl Into<String>) -> Self {
        Self {
            bitrate: bitrate.into(),
        }
    }
}

/// Runs ffmpeg to completion, returning a readable reason on failure
async fn run<I, S>(args: I) -> Result<(), String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = match tokio::process::Command::new("ffmpeg")
        .args(["-y", "-nostdin", "-loglevel", "error"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err("`ffmpeg` is not installed or available in PATH!".to_string());
        }
        Err(e) => return Err(format!("Unable to spawn ffmpeg: {e}")),
    };

    let out = child
        .wait_with_output()
        .await
        .map_err(|e| format!("Waiting for ffmpeg: {e}"))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        error!("stderr: {}", stderr.trim());
        return Err(format!("ffmpeg exited with {}", out.status));
    }

    Ok(())
}

impl Transcoder for Ffmpeg {
    #[instrument(skip(self))]
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        run([
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-vn"),
            OsStr::new("-codec:a"),
            OsStr::new("libmp3lame"),
            OsStr::new("-b:a"),
            OsStr::new(&self.bitrate),
            output.as_os_str(),
        ])
        .await
        .map_err(|reason| CaptureError::Transcode {
            input: input.to_path_buf(),
            reason,
        })
    }
}

impl Tagger for Ffmpeg {
    /// ffmpeg cannot edit in place, so tags are written to a sibling file that then replaces `file`
    #[instrument(skip(self))]
    async fn tag(&self, file: &Path, tags: &TrackTags) -> Result<()> {
        let tag_error = |reason: String| CaptureError::Tag {
            file: file.to_path_buf(),
            reason,
        };
        let tagged = file.with_extension("tagged.mp3");

        let metadata = [
            format!("album={}", tags.album),
            format!("title={}", tags.title),
            format!("track={}", tags.track),
            format!("artist={}", tags.artist),
        ];
        let mut args = vec![
            OsStr::new("-i"),
            file.as_os_str(),
            OsStr::new("-map"),
            OsStr::new("0"),
            OsStr::new("-c"),
            OsStr::new("copy"),
            OsStr::new("-id3v2_version"),
            OsStr::new("3"),
        ];
        for entry in &metadata {
            args.extend([OsStr::new("-metadata"), OsStr::new(entry)]);
        }
        args.push(tagged.as_os_str());

        if let Err(reason) = run(args).await {
            tokio::fs::remove_file(&tagged).await.ok();
            return Err(tag_error(reason));
        }

        tokio::fs::rename(&tagged, file)
            .await
            .map_err(|e| tag_error(format!("Replacing with tagged file: {e}")))
    }
}
