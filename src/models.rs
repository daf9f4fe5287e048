use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sadness::SadnessLevel;

/// FER-2013 label set, in the order the classifier emits its scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    /// Display taxonomy shown to the window aggregation.
    pub fn display(self) -> DisplayEmotion {
        match self {
            Emotion::Angry | Emotion::Disgust => DisplayEmotion::Angry,
            Emotion::Fear => DisplayEmotion::Fearful,
            Emotion::Happy => DisplayEmotion::Happy,
            Emotion::Sad => DisplayEmotion::Sad,
            Emotion::Surprise => DisplayEmotion::Surprised,
            Emotion::Neutral => DisplayEmotion::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayEmotion {
    Angry,
    Fearful,
    Happy,
    Sad,
    Surprised,
    Neutral,
}

impl DisplayEmotion {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayEmotion::Angry => "angry",
            DisplayEmotion::Fearful => "fearful",
            DisplayEmotion::Happy => "happy",
            DisplayEmotion::Sad => "sad",
            DisplayEmotion::Surprised => "surprised",
            DisplayEmotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for DisplayEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned face rectangle as reported by a face locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    #[cfg(test)]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A 2D landmark position in image coordinates (y grows downwards).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Severity of one sad sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SadnessReading {
    pub level: SadnessLevel,
    pub label: &'static str,
    pub intensity: f64,
}

/// One scored face, produced per sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionSample {
    pub timestamp: DateTime<Utc>,
    pub label: DisplayEmotion,
    /// Raw scores in [0, 100], keyed in the backend's output order.
    pub raw_scores: Vec<(&'static str, f64)>,
    pub confidence: f64,
    pub sadness: Option<SadnessReading>,
}

/// Majority sadness level of a window together with the mean intensity of
/// every sad sample in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SadnessSummary {
    pub level: SadnessLevel,
    pub label: &'static str,
    pub mean_intensity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub dominant_emotion: DisplayEmotion,
    pub sadness: Option<SadnessSummary>,
    /// Sample counts per label, in order of first appearance.
    pub label_counts: Vec<(DisplayEmotion, usize)>,
    pub mean_scores: Vec<(&'static str, f64)>,
    pub mean_confidence: f64,
    pub sample_count: usize,
    pub model_identifier: String,
}

impl WindowSummary {
    pub fn mean_score(&self, key: &str) -> Option<f64> {
        self.mean_scores
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
    }
}

/// A window summary as stored in the history database.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub session_id: Uuid,
    pub pipeline: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub primary_emotion: String,
    pub sadness_level: Option<String>,
    pub sadness_intensity: Option<f64>,
    pub samples_collected: i32,
    pub model_type: String,
}

#[derive(Debug, Clone)]
pub struct EmotionMix {
    pub emotion: String,
    pub windows: usize,
    pub share: f64,
}

#[derive(Debug, Clone)]
pub struct LevelSummary {
    pub level: String,
    pub windows: usize,
    pub avg_intensity: f64,
}
