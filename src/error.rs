#[cfg(feature = "tensorflow-engine")]
use tensorflow::Status;
use serde::Serialize;
use thiserror::Error;

use std::error::Error;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;

#[derive(Debug)]
pub struct LprError(LprErrorKind);

#[derive(Debug, Error)]
pub enum LprErrorKind {
    #[error("{0}")]
    Cli(String),
    #[error("error loading recognition engine: {0}")]
    EngineLoad(String),
    #[error("error opening webcam /dev/video{0}")]
    WebcamOpen(u32),
    #[error("{what} file not found: {}", .path.display())]
    FileNotFound { what: &'static str, path: PathBuf },
    #[error("unknown file type: {0}")]
    UnsupportedInput(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("{context}: {source}")]
    Io { context: String, #[source] source: IOError },
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("tensorflow: {0}")]
    Tensorflow(String),
}

impl LprError {
    pub fn kind(&self) -> &LprErrorKind {
        &self.0
    }

    /// Wraps an io error with what was being done, e.g. `"error deleting file: /a/b"`.
    pub fn io(context: impl Into<String>, source: IOError) -> Self {
        Self(LprErrorKind::Io { context: context.into(), source })
    }

    /// Fatal errors end the run with exit status 1; the rest are reported and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            LprErrorKind::Cli(_)
                | LprErrorKind::EngineLoad(_)
                | LprErrorKind::WebcamOpen(_)
                | LprErrorKind::UnsupportedInput(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind() {
            LprErrorKind::Cli(_) => "cli",
            LprErrorKind::EngineLoad(_) => "engine_load",
            LprErrorKind::WebcamOpen(_) => "webcam_open",
            LprErrorKind::FileNotFound { .. } => "file_not_found",
            LprErrorKind::UnsupportedInput(_) => "unsupported_input",
            LprErrorKind::Capture(_) => "capture",
            LprErrorKind::Io { .. } => "io",
            LprErrorKind::Image(_) => "image",
            LprErrorKind::Json(_) => "json",
            LprErrorKind::Tensorflow(_) => "tensorflow",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport { error: self.to_string(), kind: self.kind_name() }
    }
}

impl<T> From<T> for LprError
where T: Into<LprErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

impl From<IOError> for LprErrorKind {
    fn from(e: IOError) -> Self {
        Self::Io { context: "i/o error".to_string(), source: e }
    }
}

#[cfg(feature = "tensorflow-engine")]
impl From<Status> for LprErrorKind {
    fn from(e: Status) -> Self {
        Self::Tensorflow(e.to_string())
    }
}

impl fmt::Display for LprError {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.kind(), f)
    }
}

impl Error for LprError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.kind().source()
    }
}

/// The one error shape written to the error channel: `{"error": "...", "kind": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub kind: &'static str,
}
