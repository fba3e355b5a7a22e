use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use image::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to open video device {device}: {message}")]
    DeviceUnavailable { device: String, message: String },

    #[error(
        "camera {device} stalled after {failures} consecutive read failures and {reopen_attempts} reopen attempt(s)"
    )]
    CameraStalled {
        device: String,
        failures: u32,
        reopen_attempts: u32,
    },

    #[error("input file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("device capability error: {0}")]
    Capability(String),

    #[error("unsupported pixel format '{0}' for selected device")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed processing frame data: {0}")]
    FrameProcessing(String),

    #[error("no face detected on {device}")]
    NoFaceDetected { device: String },

    #[error("missing {kind} model; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("face backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("embedding extraction failed: {0}")]
    Embedding(String),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("invalid profile name '{name}': {message}")]
    InvalidProfileName { name: String, message: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error(
        "profile '{name}' holds {expected}-dimensional samples; refusing a {found}-dimensional embedding"
    )]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("profile record '{key}' is corrupt: {message}")]
    CorruptRecord { key: String, message: String },

    #[error("profile store error: {0}")]
    Store(String),

    #[error("similarity threshold {0} outside (0, 1]")]
    InvalidThreshold(f32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("verification device is already claimed")]
    AlreadyClaimed,

    #[error("verification device is not claimed")]
    NotClaimed,

    #[error("a verification is already in progress")]
    AlreadyVerifying,

    #[error("verification worker failed: {0}")]
    WorkerPanicked(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::MissingInput { .. } => ExitCode::from(2),
            AppError::ImageDecode { .. } => ExitCode::from(2),
            AppError::UnsupportedFormat(_) => ExitCode::from(2),
            AppError::MissingModel { .. } => ExitCode::from(2),
            AppError::ModelLoad { .. } => ExitCode::from(2),
            AppError::BackendUnavailable(_) => ExitCode::from(2),
            AppError::InvalidProfileName { .. } => ExitCode::from(2),
            AppError::InvalidThreshold(_) => ExitCode::from(2),
            AppError::InvalidArgument(_) => ExitCode::from(2),
            AppError::ConfigRead { .. } => ExitCode::from(2),
            AppError::ConfigParse { .. } => ExitCode::from(2),
            AppError::Capability(_) => ExitCode::from(3),
            AppError::InvalidEmbedding(_) => ExitCode::from(3),
            AppError::DimensionMismatch { .. } => ExitCode::from(3),
            AppError::CorruptRecord { .. } => ExitCode::from(3),
            AppError::NoFaceDetected { .. } => ExitCode::from(3),
            AppError::ProfileNotFound { .. } => ExitCode::from(3),
            AppError::DeviceUnavailable { .. } => ExitCode::from(4),
            AppError::CameraStalled { .. } => ExitCode::from(4),
            AppError::AlreadyClaimed => ExitCode::from(5),
            AppError::NotClaimed => ExitCode::from(5),
            AppError::AlreadyVerifying => ExitCode::from(5),
            AppError::Cancelled => ExitCode::from(130),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        AppError::Store(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_precondition_errors_share_exit_code() {
        for err in [
            AppError::AlreadyClaimed,
            AppError::NotClaimed,
            AppError::AlreadyVerifying,
        ] {
            assert_eq!(err.exit_code(), ExitCode::from(5));
        }
    }

    #[test]
    fn stalled_camera_message_names_device() {
        let err = AppError::CameraStalled {
            device: "/dev/video2".into(),
            failures: 10,
            reopen_attempts: 3,
        };
        let message = err.human_message();
        assert!(message.contains("/dev/video2"));
        assert!(message.contains("3 reopen"));
        assert_eq!(err.exit_code(), ExitCode::from(4));
    }
}
