//! Per-face scoring strategies. Each pipeline turns collaborator output into
//! an [`EmotionSample`] the window aggregator can record.

use chrono::{DateTime, Utc};

use crate::backend::{
    ClassifierOutput, EmotionClassifier, FaceCropper, LandmarkProvider, SmileDetector,
};
use crate::error::ClassifierError;
use crate::features::{feature_score, FacialFeatureSet, MouthSignals};
use crate::models::{DisplayEmotion, Emotion, EmotionSample, FaceRect};
use crate::sadness::{classify_sadness_level, BandTable, FusionWeights, ScoreAdjustment};

pub trait Scorer<F> {
    /// Written to the `model_type` / `landmarks_used` log column.
    fn model_identifier(&self) -> String;

    fn score(
        &self,
        frame: &F,
        face: &FaceRect,
        timestamp: DateTime<Utc>,
    ) -> Result<EmotionSample, ClassifierError>;
}

impl<F, S: Scorer<F> + ?Sized> Scorer<F> for Box<S> {
    fn model_identifier(&self) -> String {
        (**self).model_identifier()
    }

    fn score(
        &self,
        frame: &F,
        face: &FaceRect,
        timestamp: DateTime<Utc>,
    ) -> Result<EmotionSample, ClassifierError> {
        (**self).score(frame, face, timestamp)
    }
}

/// Argmax over the 7 scores; ties go to the earlier label.
pub fn dominant_emotion(scores: &[f64; 7]) -> Emotion {
    let mut best = 0;
    for (index, score) in scores.iter().enumerate().skip(1) {
        if *score > scores[best] {
            best = index;
        }
    }
    Emotion::ALL[best]
}

fn to_percent(probability: f64) -> Result<f64, ClassifierError> {
    const SLACK: f64 = 1e-6;
    if !probability.is_finite() || !(-SLACK..=1.0 + SLACK).contains(&probability) {
        return Err(ClassifierError::Malformed(format!(
            "probability {probability} outside [0, 1]"
        )));
    }
    Ok(probability.clamp(0.0, 1.0) * 100.0)
}

/// FER-2013 CNN with score-adjusted sadness levels.
pub struct SevenClassScorer<C> {
    classifier: C,
    adjustment: ScoreAdjustment,
    bands: BandTable,
    model_type: String,
}

impl<C> SevenClassScorer<C> {
    pub fn new(classifier: C, bands: BandTable, model_type: impl Into<String>) -> Self {
        Self {
            classifier,
            adjustment: ScoreAdjustment::default(),
            bands,
            model_type: model_type.into(),
        }
    }
}

impl<F, C: EmotionClassifier<F>> Scorer<F> for SevenClassScorer<C> {
    fn model_identifier(&self) -> String {
        self.model_type.clone()
    }

    fn score(
        &self,
        frame: &F,
        face: &FaceRect,
        timestamp: DateTime<Utc>,
    ) -> Result<EmotionSample, ClassifierError> {
        let ClassifierOutput::SevenClass(probabilities) = self.classifier.classify(frame, face)?
        else {
            return Err(ClassifierError::UnexpectedOutput {
                expected: "7-class",
            });
        };

        let mut scores = [0.0; 7];
        for (score, probability) in scores.iter_mut().zip(probabilities) {
            *score = to_percent(probability)?;
        }

        let dominant = dominant_emotion(&scores);
        let label = dominant.display();
        let sadness = (label == DisplayEmotion::Sad).then(|| {
            classify_sadness_level(
                scores[4],
                scores[2],
                scores[6],
                &self.adjustment,
                &self.bands,
            )
        });

        let confidence = scores[Emotion::ALL
            .iter()
            .position(|emotion| *emotion == dominant)
            .unwrap_or(0)];

        Ok(EmotionSample {
            timestamp,
            label,
            raw_scores: Emotion::ALL
                .iter()
                .zip(scores)
                .map(|(emotion, score)| (emotion.as_str(), score))
                .collect(),
            confidence,
            sadness,
        })
    }
}

/// Binary happy/sad CNN whose intensity head is blended with landmark
/// geometry when landmarks are available.
pub struct LandmarkScorer<C, L> {
    classifier: C,
    landmarks: Option<L>,
    fusion: FusionWeights,
    bands: BandTable,
}

impl<C, L> LandmarkScorer<C, L> {
    pub fn new(classifier: C, landmarks: Option<L>, bands: BandTable) -> Self {
        Self {
            classifier,
            landmarks,
            fusion: FusionWeights::default(),
            bands,
        }
    }
}

impl<F, C, L> Scorer<F> for LandmarkScorer<C, L>
where
    C: EmotionClassifier<F>,
    L: LandmarkProvider<F>,
{
    fn model_identifier(&self) -> String {
        // matches the historical landmarks_used column
        if self.landmarks.is_some() {
            "True".to_string()
        } else {
            "False".to_string()
        }
    }

    fn score(
        &self,
        frame: &F,
        face: &FaceRect,
        timestamp: DateTime<Utc>,
    ) -> Result<EmotionSample, ClassifierError> {
        let ClassifierOutput::Binary {
            sad,
            happy,
            intensity,
        } = self.classifier.classify(frame, face)?
        else {
            return Err(ClassifierError::UnexpectedOutput { expected: "binary" });
        };

        let sad = to_percent(sad)?;
        let happy = to_percent(happy)?;
        let raw_scores = vec![("sad", sad), ("happy", happy)];

        if happy > sad {
            return Ok(EmotionSample {
                timestamp,
                label: DisplayEmotion::Happy,
                raw_scores,
                confidence: happy,
                sadness: None,
            });
        }

        let model_intensity = match intensity {
            Some(value) => to_percent(value)?,
            None => sad,
        };
        let features = self
            .landmarks
            .as_ref()
            .and_then(|provider| provider.landmarks(frame, face))
            .and_then(|points| FacialFeatureSet::from_landmarks(&points));
        let fused = self
            .fusion
            .fuse(model_intensity, features.as_ref().map(|f| feature_score(Some(f))));

        Ok(EmotionSample {
            timestamp,
            label: DisplayEmotion::Sad,
            raw_scores,
            confidence: sad,
            sadness: Some(self.bands.reading(fused)),
        })
    }
}

/// Smile cascade plus mouth brightness/edge rules. Falls back to sad when
/// nothing fires, on the assumption that a resting face reads neutral-to-sad.
pub fn mouth_shape_decision(smiles: usize, signals: &MouthSignals) -> (DisplayEmotion, f64) {
    let MouthSignals {
        brightness_diff,
        inverted_smile,
        edge_ratio,
    } = *signals;

    if smiles > 0 {
        (DisplayEmotion::Happy, (60.0 + smiles as f64 * 10.0).min(90.0))
    } else if brightness_diff > 5.0 {
        (DisplayEmotion::Happy, (50.0 + brightness_diff * 2.0).min(85.0))
    } else if inverted_smile > 8.0 {
        (DisplayEmotion::Sad, (55.0 + inverted_smile * 2.0).min(85.0))
    } else if edge_ratio > 1.5 {
        (DisplayEmotion::Sad, (50.0 + (edge_ratio - 1.0) * 15.0).min(80.0))
    } else if brightness_diff < -2.0 {
        (DisplayEmotion::Sad, (45.0 + brightness_diff.abs() * 3.0).min(75.0))
    } else {
        (DisplayEmotion::Sad, 35.0)
    }
}

pub struct HeuristicScorer<Cr, Sm> {
    cropper: Cr,
    smiles: Sm,
}

impl<Cr, Sm> HeuristicScorer<Cr, Sm> {
    pub fn new(cropper: Cr, smiles: Sm) -> Self {
        Self { cropper, smiles }
    }
}

impl<F, Cr, Sm> Scorer<F> for HeuristicScorer<Cr, Sm>
where
    Cr: FaceCropper<F>,
    Sm: SmileDetector<F>,
{
    fn model_identifier(&self) -> String {
        "Mouth Heuristic".to_string()
    }

    fn score(
        &self,
        frame: &F,
        face: &FaceRect,
        timestamp: DateTime<Utc>,
    ) -> Result<EmotionSample, ClassifierError> {
        let crop = self.cropper.gray_face(frame, face)?;
        let signals = MouthSignals::measure(&crop);
        let smiles = self.smiles.count_smiles(frame, face);
        let (label, confidence) = mouth_shape_decision(smiles, &signals);

        Ok(EmotionSample {
            timestamp,
            label,
            raw_scores: vec![(label.as_str(), confidence)],
            confidence,
            sadness: None,
        })
    }
}
