use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::backend::{KvBackend, MemoryBackend, RedbBackend};
use super::record::{decode_record, encode_record};
use super::Embedding;
use crate::errors::{AppError, AppResult};

const MAX_PROFILE_NAME_LEN: usize = 64;

/// An enrolled identity and its samples in enrollment order.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub samples: Vec<Embedding>,
}

impl Profile {
    pub fn dimension(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }
}

/// Point-in-time copy of every profile, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSnapshot {
    profiles: Vec<Profile>,
}

impl ProfileSnapshot {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self { profiles }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub name: String,
    pub samples: usize,
    pub dimension: usize,
}

/// Enrolled profiles on top of a [`KvBackend`], one record per name.
#[derive(Clone)]
pub struct ProfileStore {
    backend: Arc<dyn KvBackend>,
}

impl ProfileStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        Ok(Self::with_backend(Arc::new(RedbBackend::open(path)?)))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Append one sample, creating the profile on first use.
    /// Returns the profile's sample count after the append.
    pub fn append(&self, name: &str, embedding: &[f32]) -> AppResult<usize> {
        validate_profile_name(name)?;
        if embedding.is_empty() {
            return Err(AppError::InvalidEmbedding("embedding is empty".into()));
        }
        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(AppError::InvalidEmbedding(
                "embedding contains non-finite values".into(),
            ));
        }

        let mut total = 0;
        self.backend.update(name, &mut |current| {
            let mut samples = match current {
                Some(bytes) => decode_record(name, bytes)?,
                None => Vec::new(),
            };
            if let Some(first) = samples.first() {
                if first.len() != embedding.len() {
                    return Err(AppError::DimensionMismatch {
                        name: name.to_string(),
                        expected: first.len(),
                        found: embedding.len(),
                    });
                }
            }
            samples.push(embedding.to_vec());
            total = samples.len();
            encode_record(name, &samples)
        })?;

        debug!(profile = name, samples = total, dimension = embedding.len(), "appended sample");
        Ok(total)
    }

    /// Consistent copy of every profile. Corrupt records fail the whole read.
    pub fn all(&self) -> AppResult<ProfileSnapshot> {
        let mut profiles = Vec::new();
        for (name, bytes) in self.backend.scan()? {
            let samples = decode_record(&name, &bytes)?;
            profiles.push(Profile { name, samples });
        }
        Ok(ProfileSnapshot::new(profiles))
    }

    pub fn get(&self, name: &str) -> AppResult<Option<Profile>> {
        validate_profile_name(name)?;
        match self.backend.get(name)? {
            Some(bytes) => Ok(Some(Profile {
                name: name.to_string(),
                samples: decode_record(name, &bytes)?,
            })),
            None => Ok(None),
        }
    }

    /// Returns whether the profile existed.
    pub fn remove(&self, name: &str) -> AppResult<bool> {
        validate_profile_name(name)?;
        let existed = self.backend.delete(name)?;
        if existed {
            info!(profile = name, "removed profile");
        }
        Ok(existed)
    }

    pub fn clear(&self) -> AppResult<()> {
        self.backend.clear()?;
        info!("cleared all profiles");
        Ok(())
    }

    pub fn count(&self) -> AppResult<usize> {
        Ok(self.backend.scan()?.len())
    }

    pub fn profiles(&self) -> AppResult<Vec<ProfileSummary>> {
        Ok(self
            .all()?
            .iter()
            .map(|profile| ProfileSummary {
                name: profile.name.clone(),
                samples: profile.samples.len(),
                dimension: profile.dimension(),
            })
            .collect())
    }
}

pub fn validate_profile_name(name: &str) -> AppResult<()> {
    let invalid = |message: &str| AppError::InvalidProfileName {
        name: name.to_string(),
        message: message.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("profile name cannot be empty"));
    }
    if name.len() > MAX_PROFILE_NAME_LEN {
        return Err(invalid("profile name is longer than 64 characters"));
    }
    if name == "." || name == ".." {
        return Err(invalid("'.' and '..' are reserved"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(invalid("use ASCII letters, numbers, '-', '_' or '.' only"));
    }
    Ok(())
}
