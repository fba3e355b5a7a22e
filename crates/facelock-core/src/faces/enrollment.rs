use serde::Serialize;
use tracing::{debug, info};

use super::store::validate_profile_name;
use crate::cancel::CancellationToken;
use crate::capture::{capture_faces, CaptureOutcome, CapturePolicy, CaptureStats, DeviceLocator};
use crate::errors::{AppError, AppResult};
use crate::pipeline::FacePipeline;

#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub name: String,
    pub device: DeviceLocator,
    pub capture: CapturePolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentOutcome {
    pub name: String,
    pub added: usize,
    pub total_samples: usize,
    pub dimension: usize,
    pub stats: CaptureStats,
    #[serde(skip)]
    pub logs: Vec<String>,
}

/// Capture faces from the request's device and append one sample per face.
///
/// Faces the embedder rejects are skipped. Each append is its own atomic
/// write, so an error part way leaves the samples already appended in place.
pub fn enroll(
    pipeline: &FacePipeline,
    request: &EnrollmentRequest,
    cancel: &CancellationToken,
) -> AppResult<EnrollmentOutcome> {
    validate_profile_name(&request.name)?;

    let mut logs = Vec::new();
    logs.push(format!("Capturing from {}", request.device));

    let captured = match capture_faces(
        pipeline.source.as_ref(),
        &request.device,
        &request.capture,
        cancel,
        pipeline.detector.as_ref(),
    )? {
        CaptureOutcome::Captured(captured) => captured,
        CaptureOutcome::Cancelled => return Err(AppError::Cancelled),
    };
    logs.push(format!(
        "Read {} frame(s), {} with a detected face{}",
        captured.stats.total_frames,
        captured.stats.frames_with_face,
        if captured.stats.used_fallback {
            "; using a fallback frame"
        } else {
            ""
        }
    ));
    if captured.faces.is_empty() {
        return Err(AppError::NoFaceDetected {
            device: request.device.to_string(),
        });
    }

    let mut added = 0;
    let mut total_samples = 0;
    let mut dimension = 0;
    for (index, face) in captured.faces.iter().enumerate() {
        let Some(embedding) = pipeline.embedder.embed(face) else {
            debug!(profile = %request.name, face = index, "embedder rejected face");
            logs.push(format!("Skipped face #{index}: no embedding produced"));
            continue;
        };
        total_samples = pipeline.store.append(&request.name, &embedding)?;
        dimension = embedding.len();
        added += 1;
    }
    if added == 0 {
        return Err(AppError::Embedding("embedding-failed".into()));
    }

    logs.push(format!(
        "Enrolled {added} sample(s) for '{}' ({total_samples} total, dimension {dimension})",
        request.name
    ));
    info!(profile = %request.name, added, samples = total_samples, "enrollment finished");

    Ok(EnrollmentOutcome {
        name: request.name.clone(),
        added,
        total_samples,
        dimension,
        stats: captured.stats,
        logs,
    })
}
