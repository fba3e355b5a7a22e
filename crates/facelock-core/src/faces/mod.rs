pub mod backend;
#[cfg(feature = "dlib")]
pub mod dlib;
pub mod enrollment;
pub mod matcher;
pub mod models;
pub mod record;
pub mod store;

use crate::capture::Frame;

pub use backend::{KvBackend, MemoryBackend, RedbBackend};
#[cfg(feature = "dlib")]
pub use dlib::DlibFaceBackend;
pub use enrollment::{enroll, EnrollmentOutcome, EnrollmentRequest};
pub use matcher::{
    best_match, cosine_similarity, rescale_similarity, MatchCandidate, MatchPolicy, MatchResult,
};
pub use models::{EnvModelPathResolver, FaceModelPaths, ModelPathResolver, ModelPathOverrides};
pub use record::{decode_record, encode_record, RECORD_VERSION};
pub use store::{
    validate_profile_name, Profile, ProfileSnapshot, ProfileStore, ProfileSummary,
};

/// Face embedding as produced by a [`FaceEmbedder`]; expected to be unit length.
pub type Embedding = Vec<f32>;

/// Locates the most prominent face in a frame.
pub trait FaceDetector: Send + Sync {
    /// Returns the cropped face region, or `None` when no face is visible.
    fn detect_and_crop(&self, image: &Frame) -> Option<Frame>;
}

/// Turns a face crop into an embedding vector.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &Frame) -> Option<Embedding>;
}

/// Scale `values` to unit L2 norm. Returns `None` for zero or non-finite input.
pub fn l2_normalize(values: &mut [f32]) -> Option<()> {
    let norm = values
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return None;
    }
    for value in values.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
    Some(())
}
