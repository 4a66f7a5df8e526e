use std::path::PathBuf;

use thiserror::Error;

/// Rejected before any job starts. Nothing is created when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Distance threshold must be {min}-{max}. Got {got}.")]
    ThresholdOutOfRange { got: u32, min: u32, max: u32 },

    #[error("Invalid frame strategy '{0}'. Use first, last or timestamp=N")]
    InvalidFrameStrategy(String),

    #[error("Frame strategy '{0}' given more than once")]
    DuplicateFrameStrategy(String),

    #[error("Only one timestamp frame strategy may be given")]
    MultipleTimestamps,

    #[error("Failed to read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Retry attempts must be at least 1")]
    NoAttempts,
}

/// Various causes of failure when pulling a frame out of a video.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("ffmpeg/ffprobe not found. Make sure they are installed and on the PATH")]
    FfmpegNotFound,

    #[error("ffmpeg IO error: {0}")]
    Io(String),

    #[error("Internal ffmpeg failure: {0}")]
    FfmpegInternal(String),

    #[error("Failed to parse ffprobe output: {0}")]
    Probe(String),

    #[error("Video has no usable resolution")]
    InvalidResolution,

    #[error("Frame rate unavailable")]
    FpsUnavailable,

    #[error("No frame could be decoded")]
    NoFrame,

    #[error("Failed to decode frame: {0}")]
    Decode(String),
}

/// Failure to fingerprint one key. Logged and skipped by the scanner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("Failed to open image: {0}")]
    Image(String),

    #[error("Failed to sample frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Hashing panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeleteError {
    #[error("Failed to move to trash: {0}")]
    Trash(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("A background job is already running")]
    Busy,

    #[error("Background job panicked: {0}")]
    Panicked(String),

    #[error("Background job vanished without a result")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Cannot hash while a dedupe session is active")]
    SessionActive,
}

/// Turns a caught panic payload into something printable.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
