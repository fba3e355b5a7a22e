use std::env;
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};

pub const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
pub const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

/// Model paths supplied explicitly by flags or configuration.
#[derive(Debug, Clone, Default)]
pub struct ModelPathOverrides {
    pub landmark: Option<PathBuf>,
    pub encoder: Option<PathBuf>,
}

pub trait ModelPathResolver {
    fn resolve(&self, overrides: &ModelPathOverrides) -> AppResult<FaceModelPaths>;
}

/// Explicit paths win, then `DLIB_LANDMARK_MODEL` / `DLIB_ENCODER_MODEL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvModelPathResolver;

impl ModelPathResolver for EnvModelPathResolver {
    fn resolve(&self, overrides: &ModelPathOverrides) -> AppResult<FaceModelPaths> {
        resolve_with(overrides, |key| env::var(key).ok())
    }
}

fn resolve_with(
    overrides: &ModelPathOverrides,
    lookup: impl Fn(&str) -> Option<String>,
) -> AppResult<FaceModelPaths> {
    let landmark = overrides
        .landmark
        .clone()
        .or_else(|| lookup(LANDMARK_ENV).map(PathBuf::from))
        .ok_or(AppError::MissingModel {
            kind: "landmark predictor",
            flag: "--landmark-model",
            env: LANDMARK_ENV,
        })?;

    let encoder = overrides
        .encoder
        .clone()
        .or_else(|| lookup(ENCODER_ENV).map(PathBuf::from))
        .ok_or(AppError::MissingModel {
            kind: "face encoding network",
            flag: "--encoder-model",
            env: ENCODER_ENV,
        })?;

    Ok(FaceModelPaths { landmark, encoder })
}
