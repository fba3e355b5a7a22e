use std::sync::Mutex;

use dlib_face_recognition::{
    FaceDetector as DlibDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait,
    ImageMatrix, LandmarkPredictor, LandmarkPredictorTrait, Rectangle,
};
use image::{imageops, DynamicImage};
use tracing::{debug, warn};

use super::models::FaceModelPaths;
use super::{l2_normalize, Embedding, FaceDetector, FaceEmbedder};
use crate::capture::Frame;
use crate::errors::{AppError, AppResult};

struct DlibModels {
    detector: DlibDetector,
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
}

/// HOG detector plus the ResNet face encoder shipped with dlib.
pub struct DlibFaceBackend {
    models: Mutex<DlibModels>,
    jitters: u32,
}

impl DlibFaceBackend {
    pub fn new(paths: &FaceModelPaths, jitters: u32) -> AppResult<Self> {
        debug!(path = %paths.landmark.display(), "loading landmark model");
        let predictor =
            LandmarkPredictor::open(&paths.landmark).map_err(|message| AppError::ModelLoad {
                path: paths.landmark.clone(),
                message,
            })?;
        debug!(path = %paths.encoder.display(), "loading encoder model");
        let encoder =
            FaceEncoderNetwork::open(&paths.encoder).map_err(|message| AppError::ModelLoad {
                path: paths.encoder.clone(),
                message,
            })?;

        Ok(Self {
            models: Mutex::new(DlibModels {
                detector: DlibDetector::new(),
                predictor,
                encoder,
            }),
            jitters,
        })
    }
}

fn to_matrix(frame: &Frame) -> ImageMatrix {
    let rgb = DynamicImage::ImageLuma8(frame.clone()).to_rgb8();
    ImageMatrix::from_image(&rgb)
}

fn area(rect: &Rectangle) -> i64 {
    (rect.right - rect.left).max(0) * (rect.bottom - rect.top).max(0)
}

impl FaceDetector for DlibFaceBackend {
    fn detect_and_crop(&self, image: &Frame) -> Option<Frame> {
        let models = match self.models.lock() {
            Ok(models) => models,
            Err(_) => {
                warn!("dlib model lock poisoned");
                return None;
            }
        };
        let matrix = to_matrix(image);
        let locations = models.detector.face_locations(&matrix);
        let rect = locations.iter().max_by_key(|rect| area(rect))?;

        let (width, height) = image.dimensions();
        let left = rect.left.clamp(0, i64::from(width)) as u32;
        let top = rect.top.clamp(0, i64::from(height)) as u32;
        let right = rect.right.clamp(0, i64::from(width)) as u32;
        let bottom = rect.bottom.clamp(0, i64::from(height)) as u32;
        if right <= left || bottom <= top {
            return None;
        }
        Some(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
    }
}

impl FaceEmbedder for DlibFaceBackend {
    fn embed(&self, face: &Frame) -> Option<Embedding> {
        let models = match self.models.lock() {
            Ok(models) => models,
            Err(_) => {
                warn!("dlib model lock poisoned");
                return None;
            }
        };
        let matrix = to_matrix(face);
        let (width, height) = face.dimensions();
        // Crops from the detector fill the frame, so fall back to the whole image.
        let rect = models
            .detector
            .face_locations(&matrix)
            .iter()
            .max_by_key(|rect| area(rect))
            .cloned()
            .unwrap_or(Rectangle {
                left: 0,
                top: 0,
                right: i64::from(width) - 1,
                bottom: i64::from(height) - 1,
            });

        let landmarks = vec![models.predictor.face_landmarks(&matrix, &rect)];
        let encodings = models
            .encoder
            .get_face_encodings(&matrix, &landmarks, self.jitters);
        let encoding = encodings.iter().next()?;

        let mut embedding: Embedding = encoding.as_ref().iter().map(|v| *v as f32).collect();
        l2_normalize(&mut embedding)?;
        Some(embedding)
    }
}
