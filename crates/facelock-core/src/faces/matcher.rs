use serde::Serialize;
use tracing::debug;

use super::store::ProfileSnapshot;
use super::Embedding;
use crate::errors::{AppError, AppResult};

/// Which profiles a verification may accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPolicy {
    Required(String),
    AnyProfile,
}

impl MatchPolicy {
    /// `"any"` or an empty mode accepts every profile; anything else names one.
    pub fn from_mode(mode: &str) -> Self {
        match mode.trim() {
            "" | "any" => MatchPolicy::AnyProfile,
            name => MatchPolicy::Required(name.to_string()),
        }
    }

    pub fn admits(&self, name: &str) -> bool {
        match self {
            MatchPolicy::Required(required) => required == name,
            MatchPolicy::AnyProfile => true,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            MatchPolicy::Required(name) => Some(name),
            MatchPolicy::AnyProfile => None,
        }
    }
}

/// Highest-ranked profile for a set of query embeddings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub profile: String,
    /// Mean of all pairwise scores; used for ranking and thresholds.
    pub aggregate_score: f32,
    /// Best single pair; diagnostics only.
    pub best_pair_score: f32,
    pub pairs: usize,
}

/// Verdict of one verification after the threshold was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Set only when the aggregate score reached the threshold.
    pub profile: Option<String>,
    /// Best candidate regardless of the threshold.
    pub candidate: Option<String>,
    pub aggregate_score: f32,
    pub best_pair_score: f32,
    pub samples_considered: usize,
}

impl MatchResult {
    pub fn from_candidate(
        candidate: Option<MatchCandidate>,
        threshold: f32,
        samples_considered: usize,
    ) -> Self {
        match candidate {
            Some(candidate) => {
                let accepted = candidate.aggregate_score >= threshold;
                Self {
                    profile: accepted.then(|| candidate.profile.clone()),
                    candidate: Some(candidate.profile),
                    aggregate_score: candidate.aggregate_score,
                    best_pair_score: candidate.best_pair_score,
                    samples_considered,
                }
            }
            None => Self::unmatched(samples_considered),
        }
    }

    pub fn unmatched(samples_considered: usize) -> Self {
        Self {
            profile: None,
            candidate: None,
            aggregate_score: 0.0,
            best_pair_score: 0.0,
            samples_considered,
        }
    }

    pub fn is_match(&self) -> bool {
        self.profile.is_some()
    }
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f32 {
    let mut dot = 0.0_f64;
    let mut norm_lhs = 0.0_f64;
    let mut norm_rhs = 0.0_f64;
    for (l, r) in lhs.iter().zip(rhs.iter()) {
        let (l, r) = (f64::from(*l), f64::from(*r));
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }
    let denominator = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    (dot / denominator).clamp(-1.0, 1.0) as f32
}

/// Map cosine similarity from [-1, 1] onto [0, 1].
pub fn rescale_similarity(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Rank every admitted profile by the mean pairwise score against `queries`.
///
/// Profiles whose dimension differs from the queries are skipped. Ties keep
/// the profile that comes first in the snapshot. The threshold is not applied
/// here.
pub fn best_match(
    queries: &[Embedding],
    snapshot: &ProfileSnapshot,
    policy: &MatchPolicy,
) -> AppResult<Option<MatchCandidate>> {
    let dimension = match queries.first() {
        Some(first) if !first.is_empty() => first.len(),
        _ => {
            return Err(AppError::InvalidEmbedding(
                "no query embeddings to match".into(),
            ))
        }
    };
    if queries.iter().any(|query| query.len() != dimension) {
        return Err(AppError::InvalidEmbedding(
            "query embeddings have mixed dimensions".into(),
        ));
    }
    if queries
        .iter()
        .any(|query| query.iter().any(|value| !value.is_finite()))
    {
        return Err(AppError::InvalidEmbedding(
            "query embedding contains non-finite values".into(),
        ));
    }

    let mut best: Option<MatchCandidate> = None;
    for profile in snapshot.iter() {
        if !policy.admits(&profile.name) {
            continue;
        }
        if profile.samples.is_empty() || profile.dimension() != dimension {
            debug!(
                profile = %profile.name,
                expected = dimension,
                found = profile.dimension(),
                "skipping profile with mismatched dimension"
            );
            continue;
        }

        let mut sum = 0.0_f64;
        let mut max = f32::NEG_INFINITY;
        let mut pairs = 0usize;
        for query in queries {
            for sample in &profile.samples {
                let score = rescale_similarity(cosine_similarity(query, sample));
                sum += f64::from(score);
                max = max.max(score);
                pairs += 1;
            }
        }
        let aggregate = (sum / pairs as f64) as f32;
        if !aggregate.is_finite() {
            debug!(profile = %profile.name, "skipping profile with non-finite score");
            continue;
        }
        debug!(profile = %profile.name, score = aggregate, best_pair = max, pairs, "scored profile");

        let better = best
            .as_ref()
            .map_or(true, |current| aggregate > current.aggregate_score);
        if better {
            best = Some(MatchCandidate {
                profile: profile.name.clone(),
                aggregate_score: aggregate,
                best_pair_score: max,
                pairs,
            });
        }
    }
    Ok(best)
}
