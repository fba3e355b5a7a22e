use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::capture::{
    capture_faces, CaptureOutcome, CapturePolicy, CaptureStats, DeviceLocator,
};
use crate::errors::{AppError, AppResult};
use crate::faces::{best_match, Embedding, MatchPolicy, MatchResult};
use crate::pipeline::FacePipeline;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.90;

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub policy: MatchPolicy,
    pub threshold: f32,
    pub device: DeviceLocator,
    pub capture: CapturePolicy,
}

impl VerificationRequest {
    pub fn new(
        policy: MatchPolicy,
        threshold: f32,
        device: DeviceLocator,
        capture: CapturePolicy,
    ) -> AppResult<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AppError::InvalidThreshold(threshold));
        }
        Ok(Self {
            policy,
            threshold,
            device,
            capture,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// Embeddings were matched; `result.profile` says whether the threshold was met.
    Decided {
        result: MatchResult,
        stats: CaptureStats,
    },
    NoFace {
        stats: CaptureStats,
    },
    Cancelled,
}

/// Capture, embed and match once. Shared by [`verify_once`] and session workers.
pub fn run_verification(
    pipeline: &FacePipeline,
    request: &VerificationRequest,
    cancel: &CancellationToken,
) -> AppResult<VerificationOutcome> {
    let captured = match capture_faces(
        pipeline.source.as_ref(),
        &request.device,
        &request.capture,
        cancel,
        pipeline.detector.as_ref(),
    )? {
        CaptureOutcome::Captured(captured) => captured,
        CaptureOutcome::Cancelled => return Ok(VerificationOutcome::Cancelled),
    };
    let stats = captured.stats;
    if captured.faces.is_empty() {
        info!(device = %request.device, frames = stats.total_frames, "no usable frames captured");
        return Ok(VerificationOutcome::NoFace { stats });
    }

    let queries: Vec<Embedding> = captured
        .faces
        .iter()
        .filter_map(|face| pipeline.embedder.embed(face))
        .collect();
    debug!(faces = captured.faces.len(), embedded = queries.len(), "embedded captured faces");
    if queries.is_empty() {
        return Err(AppError::Embedding("embedding-failed".into()));
    }

    if cancel.is_cancelled() {
        return Ok(VerificationOutcome::Cancelled);
    }
    let snapshot = pipeline.store.all()?;
    let candidate = best_match(&queries, &snapshot, &request.policy)?;
    let result = MatchResult::from_candidate(candidate, request.threshold, queries.len());

    match (&result.profile, &result.candidate) {
        (Some(profile), _) => {
            info!(profile = %profile, score = result.aggregate_score, "verification matched")
        }
        (None, Some(candidate)) => warn!(
            profile = %candidate,
            score = result.aggregate_score,
            threshold = request.threshold,
            "best candidate below threshold"
        ),
        (None, None) => info!(profiles = snapshot.len(), "no enrolled profile qualified"),
    }

    Ok(VerificationOutcome::Decided { result, stats })
}

/// Blocking single verification without cancellation.
///
/// No face and no match both come back as an unmatched [`MatchResult`]; with
/// no face, `samples_considered` is zero.
pub fn verify_once(
    pipeline: &FacePipeline,
    request: &VerificationRequest,
) -> AppResult<MatchResult> {
    match run_verification(pipeline, request, &CancellationToken::new())? {
        VerificationOutcome::Decided { result, .. } => Ok(result),
        VerificationOutcome::NoFace { .. } => Ok(MatchResult::unmatched(0)),
        VerificationOutcome::Cancelled => Err(AppError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::capture::testing::*;
    use crate::faces::{FaceEmbedder, ProfileStore};

    fn pipeline(source: ScriptedSource, embedding: Embedding, store: ProfileStore) -> FacePipeline {
        FacePipeline::new(
            Arc::new(source),
            Arc::new(BrightFaceDetector),
            Arc::new(FixedEmbedder(embedding)),
            store,
        )
    }

    fn request(policy: MatchPolicy, threshold: f32) -> VerificationRequest {
        VerificationRequest::new(
            policy,
            threshold,
            DeviceLocator::Index(0),
            fast_policy(Duration::ZERO),
        )
        .unwrap()
    }

    #[test]
    fn threshold_must_be_in_unit_interval() {
        for bad in [0.0, -0.5, 1.01, f32::NAN] {
            let err = VerificationRequest::new(
                MatchPolicy::AnyProfile,
                bad,
                DeviceLocator::Index(0),
                CapturePolicy::default(),
            )
            .unwrap_err();
            assert!(matches!(err, AppError::InvalidThreshold(_)));
        }
    }

    #[test]
    fn verify_once_matches_enrolled_profile() {
        let store = ProfileStore::in_memory();
        store.append("alice", &[1.0, 0.0]).unwrap();
        let pipeline = pipeline(
            ScriptedSource::always(Script::Frame(200)),
            vec![1.0, 0.0],
            store,
        );

        let result = verify_once(&pipeline, &request(MatchPolicy::AnyProfile, 0.9)).unwrap();
        assert_eq!(result.profile.as_deref(), Some("alice"));
        assert!((result.aggregate_score - 1.0).abs() < 1e-6);
        assert_eq!(result.samples_considered, 1);
    }

    #[test]
    fn below_threshold_reports_candidate_without_match() {
        let store = ProfileStore::in_memory();
        store.append("alice", &[0.0, 1.0]).unwrap();
        let pipeline = pipeline(
            ScriptedSource::always(Script::Frame(200)),
            vec![1.0, 0.0],
            store,
        );

        let result = verify_once(&pipeline, &request(MatchPolicy::AnyProfile, 0.9)).unwrap();
        assert!(!result.is_match());
        assert_eq!(result.candidate.as_deref(), Some("alice"));
        assert!((result.aggregate_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_store_is_no_match_not_error() {
        let pipeline = pipeline(
            ScriptedSource::always(Script::Frame(200)),
            vec![1.0, 0.0],
            ProfileStore::in_memory(),
        );
        let outcome = run_verification(
            &pipeline,
            &request(MatchPolicy::AnyProfile, 0.9),
            &CancellationToken::new(),
        )
        .unwrap();
        match outcome {
            VerificationOutcome::Decided { result, .. } => assert!(result.candidate.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn failing_embedder_is_an_error() {
        struct NoEmbedding;
        impl FaceEmbedder for NoEmbedding {
            fn embed(&self, _face: &crate::capture::Frame) -> Option<Embedding> {
                None
            }
        }
        let pipeline = FacePipeline::new(
            Arc::new(ScriptedSource::always(Script::Frame(200))),
            Arc::new(BrightFaceDetector),
            Arc::new(NoEmbedding),
            ProfileStore::in_memory(),
        );
        let err = verify_once(&pipeline, &request(MatchPolicy::AnyProfile, 0.9)).unwrap_err();
        assert!(matches!(err, AppError::Embedding(_)));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let pipeline = pipeline(
            ScriptedSource::always(Script::Frame(200)),
            vec![1.0, 0.0],
            ProfileStore::in_memory(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_verification(
            &pipeline,
            &request(MatchPolicy::AnyProfile, 0.9),
            &cancel,
        )
        .unwrap();
        assert_eq!(outcome, VerificationOutcome::Cancelled);
    }
}
