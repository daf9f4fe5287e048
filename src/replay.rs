//! Recorded sessions: one JSON object per line holding a frame's capture time
//! and what each external collaborator reported for it.
//!
//! ```text
//! {"t":0.0,"faces":[{"x":80,"y":40,"width":160,"height":160}],"emotion":[0.02,0.0,0.1,0.08,0.6,0.0,0.2]}
//! {"t":0.3,"faces":[...],"binary":{"sad":0.7,"happy":0.3,"intensity":0.55},"landmarks":[{"x":..,"y":..},...]}
//! {"t":0.6,"faces":[...],"face_image":"crops/0002.png","smiles":0}
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::GrayImage;
use serde::Deserialize;

use crate::backend::{
    CapturedFrame, ClassifierOutput, EmotionClassifier, FaceCropper, FaceLocator, FrameSource,
    LandmarkProvider, SmileDetector,
};
use crate::error::{ClassifierError, MonitorError, Result};
use crate::models::{FaceRect, Point};

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedBinary {
    pub sad: f64,
    pub happy: f64,
    #[serde(default)]
    pub intensity: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFrame {
    /// Seconds since capture started.
    pub t: f64,
    #[serde(default)]
    pub faces: Vec<FaceRect>,
    /// 7-class probabilities in FER-2013 order.
    #[serde(default)]
    pub emotion: Option<Vec<f64>>,
    #[serde(default)]
    pub binary: Option<RecordedBinary>,
    #[serde(default)]
    pub landmarks: Option<Vec<Point>>,
    /// Grayscale crop of the first face, relative to the recording's directory.
    #[serde(default)]
    pub face_image: Option<PathBuf>,
    #[serde(default)]
    pub smiles: usize,
}

pub struct Recording<R> {
    lines: Lines<R>,
    line: usize,
}

impl Recording<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> Recording<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> FrameSource for Recording<R> {
    type Frame = RecordedFrame;

    fn next_frame(&mut self) -> Result<Option<CapturedFrame<RecordedFrame>>> {
        for line in self.lines.by_ref() {
            self.line += 1;
            let line = line.map_err(|err| MonitorError::Capture(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }

            let frame: RecordedFrame = serde_json::from_str(&line).map_err(|source| {
                MonitorError::Recording {
                    line: self.line,
                    source,
                }
            })?;
            let elapsed = Duration::try_from_secs_f64(frame.t).map_err(|_| {
                MonitorError::Capture(format!(
                    "line {}: invalid capture time {}",
                    self.line, frame.t
                ))
            })?;
            return Ok(Some(CapturedFrame { elapsed, frame }));
        }
        Ok(None)
    }
}

/// Plays back the collaborator outputs stored in each [`RecordedFrame`].
#[derive(Debug, Clone)]
pub struct RecordedBackend {
    image_root: PathBuf,
}

impl RecordedBackend {
    pub fn new(image_root: impl Into<PathBuf>) -> Self {
        Self {
            image_root: image_root.into(),
        }
    }
}

impl FaceLocator<RecordedFrame> for RecordedBackend {
    fn locate(&self, frame: &RecordedFrame) -> Vec<FaceRect> {
        frame.faces.clone()
    }
}

impl EmotionClassifier<RecordedFrame> for RecordedBackend {
    fn classify(
        &self,
        frame: &RecordedFrame,
        _face: &FaceRect,
    ) -> std::result::Result<ClassifierOutput, ClassifierError> {
        if let Some(scores) = &frame.emotion {
            let scores: [f64; 7] = scores.as_slice().try_into().map_err(|_| {
                ClassifierError::Malformed(format!("expected 7 scores, got {}", scores.len()))
            })?;
            return Ok(ClassifierOutput::SevenClass(scores));
        }

        match &frame.binary {
            Some(binary) => Ok(ClassifierOutput::Binary {
                sad: binary.sad,
                happy: binary.happy,
                intensity: binary.intensity,
            }),
            None => Err(ClassifierError::NoPrediction),
        }
    }
}

impl LandmarkProvider<RecordedFrame> for RecordedBackend {
    fn landmarks(&self, frame: &RecordedFrame, _face: &FaceRect) -> Option<Vec<Point>> {
        frame.landmarks.clone()
    }
}

impl FaceCropper<RecordedFrame> for RecordedBackend {
    fn gray_face(
        &self,
        frame: &RecordedFrame,
        _face: &FaceRect,
    ) -> std::result::Result<GrayImage, ClassifierError> {
        let path = frame
            .face_image
            .as_ref()
            .ok_or(ClassifierError::MissingFaceCrop)?;
        Ok(image::open(self.image_root.join(path))?.to_luma8())
    }
}

impl SmileDetector<RecordedFrame> for RecordedBackend {
    fn count_smiles(&self, frame: &RecordedFrame, _face: &FaceRect) -> usize {
        frame.smiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FACE: FaceRect = FaceRect::new(0, 0, 48, 48);

    fn recording(text: &str) -> Recording<Cursor<Vec<u8>>> {
        Recording::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn reads_frames_and_skips_blank_lines() {
        let mut source = recording(
            "{\"t\":0.0,\"faces\":[{\"x\":1,\"y\":2,\"width\":48,\"height\":48}]}\n\n{\"t\":0.35}\n",
        );
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.elapsed, Duration::ZERO);
        assert_eq!(first.frame.faces, vec![FaceRect::new(1, 2, 48, 48)]);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.elapsed, Duration::from_millis(350));
        assert!(second.frame.faces.is_empty());

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn reports_bad_line_number() {
        let mut source = recording("{\"t\":0.0}\n{\"t\":\n");
        source.next_frame().unwrap();
        match source.next_frame() {
            Err(MonitorError::Recording { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn negative_time_is_a_capture_error() {
        let mut source = recording("{\"t\":-1.0}\n");
        assert!(matches!(source.next_frame(), Err(MonitorError::Capture(_))));
    }

    fn frame(json: &str) -> RecordedFrame {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn plays_back_classifier_output() {
        let backend = RecordedBackend::new(".");
        let seven = frame(r#"{"t":0,"emotion":[0.1,0,0.1,0.2,0.5,0,0.1]}"#);
        assert!(matches!(
            backend.classify(&seven, &FACE),
            Ok(ClassifierOutput::SevenClass(scores)) if scores[4] == 0.5
        ));

        let binary = frame(r#"{"t":0,"binary":{"sad":0.4,"happy":0.6}}"#);
        assert_eq!(
            backend.classify(&binary, &FACE).unwrap(),
            ClassifierOutput::Binary {
                sad: 0.4,
                happy: 0.6,
                intensity: None
            }
        );

        let short = frame(r#"{"t":0,"emotion":[0.5,0.5]}"#);
        assert!(matches!(
            backend.classify(&short, &FACE),
            Err(ClassifierError::Malformed(_))
        ));

        let empty = frame(r#"{"t":0}"#);
        assert!(matches!(
            backend.classify(&empty, &FACE),
            Err(ClassifierError::NoPrediction)
        ));
    }

    #[test]
    fn missing_crop_is_reported() {
        let backend = RecordedBackend::new(".");
        let bare = frame(r#"{"t":0,"smiles":2}"#);
        assert!(matches!(
            backend.gray_face(&bare, &FACE),
            Err(ClassifierError::MissingFaceCrop)
        ));
        assert_eq!(backend.count_smiles(&bare, &FACE), 2);
        assert!(backend.landmarks(&bare, &FACE).is_none());
    }

    #[test]
    fn loads_crop_from_disk() {
        let dir = std::env::temp_dir().join(format!("emotion-crops-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        GrayImage::from_pixel(12, 16, image::Luma([77]))
            .save(dir.join("face.png"))
            .unwrap();

        let backend = RecordedBackend::new(&dir);
        let with_crop = frame(r#"{"t":0,"face_image":"face.png"}"#);
        let crop = backend.gray_face(&with_crop, &FACE).unwrap();
        assert_eq!(crop.dimensions(), (12, 16));
        assert_eq!(crop.get_pixel(3, 3)[0], 77);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
