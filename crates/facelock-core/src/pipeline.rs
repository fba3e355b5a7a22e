use std::sync::Arc;

use crate::capture::FrameSource;
use crate::faces::{FaceDetector, FaceEmbedder, ProfileStore};

/// Collaborators shared by enrollment, one-shot verification and sessions.
#[derive(Clone)]
pub struct FacePipeline {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn FaceDetector>,
    pub embedder: Arc<dyn FaceEmbedder>,
    pub store: ProfileStore,
}

impl FacePipeline {
    pub fn new(
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn FaceEmbedder>,
        store: ProfileStore,
    ) -> Self {
        Self {
            source,
            detector,
            embedder,
            store,
        }
    }
}
