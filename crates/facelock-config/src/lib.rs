use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use facelock_core::capture::{CapturePolicy, DeviceLocator};
use facelock_core::faces::{MatchPolicy, ModelPathOverrides};
use facelock_core::{AppError, AppResult, VerificationRequest};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facelock/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facelock/config.toml";
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = facelock_core::DEFAULT_SIMILARITY_THRESHOLD;
pub const DEFAULT_WARMUP_SECS: f64 = 1.0;
pub const DEFAULT_CAPTURE_WINDOW_SECS: f64 = 2.0;
pub const DEFAULT_INTERVAL_MILLIS: u64 = 100;
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_PIXEL_FORMAT: &str = "YUYV";
pub const DEFAULT_STORE_PATH: &str = "/var/lib/facelock/profiles.redb";
pub const DEFAULT_JITTERS: u32 = 1;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub similarity_threshold: Option<f32>,
    pub warmup_secs: Option<f64>,
    pub capture_window_secs: Option<f64>,
    pub frame_interval_millis: Option<u64>,
    pub video_device: Option<String>,
    pub pixel_format: Option<String>,
    pub store_path: Option<PathBuf>,
    pub target_profile: Option<String>,
    pub allow_any: Option<bool>,
    pub jitters: Option<u32>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub similarity_threshold: f32,
    pub warmup: Duration,
    pub capture_window: Duration,
    pub frame_interval: Duration,
    pub video_device: String,
    pub pixel_format: String,
    pub store_path: PathBuf,
    pub target_profile: Option<String>,
    pub allow_any: bool,
    pub jitters: u32,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let home = env::var_os("HOME").map(PathBuf::from);
        Self::from_raw_with_home(raw, home.as_deref())
    }

    fn from_raw_with_home(raw: ConfigFile, home: Option<&Path>) -> Self {
        Self {
            similarity_threshold: resolve_threshold(raw.similarity_threshold),
            warmup: seconds(raw.warmup_secs, DEFAULT_WARMUP_SECS, "warmup_secs"),
            capture_window: seconds(
                raw.capture_window_secs,
                DEFAULT_CAPTURE_WINDOW_SECS,
                "capture_window_secs",
            ),
            frame_interval: Duration::from_millis(
                raw.frame_interval_millis.unwrap_or(DEFAULT_INTERVAL_MILLIS),
            ),
            video_device: raw
                .video_device
                .unwrap_or_else(|| DEFAULT_VIDEO_DEVICE.to_string()),
            pixel_format: raw
                .pixel_format
                .unwrap_or_else(|| DEFAULT_PIXEL_FORMAT.to_string()),
            store_path: expand_home(
                &raw.store_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
                home,
            ),
            target_profile: raw.target_profile.filter(|name| !name.trim().is_empty()),
            allow_any: raw.allow_any.unwrap_or(false),
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
            landmark_model: raw.landmark_model.map(|path| expand_home(&path, home)),
            encoder_model: raw.encoder_model.map(|path| expand_home(&path, home)),
        }
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy::new(self.warmup, self.capture_window, self.frame_interval)
    }

    pub fn device_locator(&self) -> DeviceLocator {
        DeviceLocator::parse(&self.video_device)
    }

    /// `AnyProfile` when `allow_any` is set or no target is configured.
    pub fn default_match_policy(&self) -> MatchPolicy {
        match (&self.target_profile, self.allow_any) {
            (Some(name), false) => MatchPolicy::Required(name.clone()),
            _ => MatchPolicy::AnyProfile,
        }
    }

    pub fn verification_request(&self, policy: MatchPolicy) -> AppResult<VerificationRequest> {
        VerificationRequest::new(
            policy,
            self.similarity_threshold,
            self.device_locator(),
            self.capture_policy(),
        )
    }

    pub fn model_overrides(&self) -> ModelPathOverrides {
        ModelPathOverrides {
            landmark: self.landmark_model.clone(),
            encoder: self.encoder_model.clone(),
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

fn resolve_threshold(raw: Option<f32>) -> f32 {
    match raw {
        Some(value) if value > 0.0 && value <= 1.0 => value,
        Some(value) => {
            warn!(
                value,
                default = DEFAULT_SIMILARITY_THRESHOLD,
                "similarity_threshold outside (0, 1]; using default"
            );
            DEFAULT_SIMILARITY_THRESHOLD
        }
        None => DEFAULT_SIMILARITY_THRESHOLD,
    }
}

fn seconds(raw: Option<f64>, default: f64, key: &str) -> Duration {
    let value = raw.unwrap_or(default);
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| {
        warn!(key, value, "invalid duration; using default");
        Duration::from_secs_f64(default)
    })
}

/// Replace a leading `~` with the home directory, when one is known.
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
            ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
        }
    }
}

pub fn default_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_paths())
}

/// First existing file wins; missing files are skipped.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig {
                    contents: parsed,
                    source: path.clone(),
                }));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    Ok(match load_from_paths(paths)? {
        Some(entry) => ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        },
        None => ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        },
    })
}
