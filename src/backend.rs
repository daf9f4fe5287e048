//! Seams to the external collaborators: capture device, face locator,
//! classifier, landmark predictor and the smile cascade.

use std::time::Duration;

use image::GrayImage;

use crate::error::{ClassifierError, Result};
use crate::models::{FaceRect, Point};

/// A frame plus its capture time on the session's monotonic clock.
#[derive(Debug, Clone)]
pub struct CapturedFrame<F> {
    pub elapsed: Duration,
    pub frame: F,
}

pub trait FrameSource {
    type Frame;

    /// `Ok(None)` at end of stream. Errors are fatal to the session.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame<Self::Frame>>>;
}

pub trait FaceLocator<F> {
    fn locate(&self, frame: &F) -> Vec<FaceRect>;
}

/// Raw classifier output for one face, probabilities in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutput {
    /// angry, disgust, fear, happy, sad, surprise, neutral
    SevenClass([f64; 7]),
    Binary {
        sad: f64,
        happy: f64,
        intensity: Option<f64>,
    },
}

pub trait EmotionClassifier<F> {
    fn classify(
        &self,
        frame: &F,
        face: &FaceRect,
    ) -> std::result::Result<ClassifierOutput, ClassifierError>;
}

/// Optional 68-point landmark predictor. `None` means unavailable for this face.
pub trait LandmarkProvider<F> {
    fn landmarks(&self, frame: &F, face: &FaceRect) -> Option<Vec<Point>>;
}

pub trait FaceCropper<F> {
    fn gray_face(
        &self,
        frame: &F,
        face: &FaceRect,
    ) -> std::result::Result<GrayImage, ClassifierError>;
}

pub trait SmileDetector<F> {
    fn count_smiles(&self, frame: &F, face: &FaceRect) -> usize;
}
