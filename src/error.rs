use std::path::PathBuf;

/// Failures that can occur inside the capture pipeline.
///
/// None of these halt the pipeline by themselves; each stage logs and moves on
/// to its next iteration.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("fetching playlist {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("unable to parse {what} from `{value}`")]
    Parse { what: &'static str, value: String },

    #[error("downloading segment {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("transcoding {}: {reason}", .input.display())]
    Transcode { input: PathBuf, reason: String },

    #[error("tagging {}: {reason}", .file.display())]
    Tag { file: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
