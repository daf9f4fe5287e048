use crate::error::{MonitorError, Result};
use crate::models::SadnessReading;

/// Three ordered severity tiers. Each band table names them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SadnessLevel {
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SadnessBand {
    pub level: SadnessLevel,
    pub label: &'static str,
    pub lower: f64,
    pub upper: f64,
}

impl SadnessBand {
    /// Half-open `[lower, upper)`, except the top band which also holds `upper`.
    pub fn contains(&self, intensity: f64) -> bool {
        if self.level == SadnessLevel::Severe {
            intensity >= self.lower && intensity <= self.upper
        } else {
            intensity >= self.lower && intensity < self.upper
        }
    }
}

/// Partition of `[0, 100]` into three sadness bands.
#[derive(Debug, Clone, PartialEq)]
pub struct BandTable {
    bands: [SadnessBand; 3],
}

impl BandTable {
    /// upset `[0,40)`, melancholic `[40,70)`, depressed `[70,100]`.
    pub fn clinical() -> Self {
        Self::build(["upset", "melancholic", "depressed"], 40.0, 70.0)
    }

    /// mild `[0,35)`, moderate `[35,65)`, severe `[65,100]`.
    pub fn graded() -> Self {
        Self::build(["mild", "moderate", "severe"], 35.0, 65.0)
    }

    /// Same names, new cut points. Requires `0 < low < high < 100`.
    pub fn with_thresholds(&self, low: f64, high: f64) -> Result<Self> {
        if !(low.is_finite() && high.is_finite()) || low <= 0.0 || high >= 100.0 || low >= high {
            return Err(MonitorError::InvalidConfig(format!(
                "sadness thresholds must satisfy 0 < low < high < 100, got {low},{high}"
            )));
        }
        let names = [self.bands[0].label, self.bands[1].label, self.bands[2].label];
        Ok(Self::build(names, low, high))
    }

    fn build(names: [&'static str; 3], low: f64, high: f64) -> Self {
        Self {
            bands: [
                SadnessBand {
                    level: SadnessLevel::Mild,
                    label: names[0],
                    lower: 0.0,
                    upper: low,
                },
                SadnessBand {
                    level: SadnessLevel::Moderate,
                    label: names[1],
                    lower: low,
                    upper: high,
                },
                SadnessBand {
                    level: SadnessLevel::Severe,
                    label: names[2],
                    lower: high,
                    upper: 100.0,
                },
            ],
        }
    }

    #[cfg(test)]
    pub fn bands(&self) -> &[SadnessBand; 3] {
        &self.bands
    }

    pub fn band(&self, level: SadnessLevel) -> &SadnessBand {
        match level {
            SadnessLevel::Mild => &self.bands[0],
            SadnessLevel::Moderate => &self.bands[1],
            SadnessLevel::Severe => &self.bands[2],
        }
    }

    pub fn label(&self, level: SadnessLevel) -> &'static str {
        self.band(level).label
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.bands[1].lower, self.bands[2].lower)
    }

    pub fn reading(&self, intensity: f64) -> SadnessReading {
        let level = classify_level(intensity, self);
        SadnessReading {
            level,
            label: self.label(level),
            intensity,
        }
    }
}

/// First band, in ascending order, that holds `intensity`. Anything outside
/// `[0, 100]` (NaN included) falls back to the lowest band.
pub fn classify_level(intensity: f64, table: &BandTable) -> SadnessLevel {
    table
        .bands
        .iter()
        .find(|band| band.contains(intensity))
        .map(|band| band.level)
        .unwrap_or(SadnessLevel::Mild)
}

/// Cross-feature boosts applied to the raw sad score of the 7-class model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreAdjustment {
    pub fear_trigger: f64,
    pub fear_weight: f64,
    pub neutral_trigger: f64,
    pub sad_trigger: f64,
    pub neutral_weight: f64,
}

impl Default for ScoreAdjustment {
    fn default() -> Self {
        Self {
            fear_trigger: 20.0,
            fear_weight: 0.3,
            neutral_trigger: 40.0,
            sad_trigger: 20.0,
            neutral_weight: 0.2,
        }
    }
}

impl ScoreAdjustment {
    /// Fear boost first, then the flat-affect neutral boost, each clamped
    /// to 100 against the running total.
    pub fn adjust(&self, sad: f64, fear: f64, neutral: f64) -> f64 {
        let mut adjusted = sad;
        if fear > self.fear_trigger {
            adjusted = (adjusted + fear * self.fear_weight).min(100.0);
        }
        if neutral > self.neutral_trigger && sad > self.sad_trigger {
            adjusted = (adjusted + neutral * self.neutral_weight).min(100.0);
        }
        adjusted
    }
}

pub fn classify_sadness_level(
    sad: f64,
    fear: f64,
    neutral: f64,
    adjustment: &ScoreAdjustment,
    table: &BandTable,
) -> SadnessReading {
    table.reading(adjustment.adjust(sad, fear, neutral))
}

/// Blend of the binary model's intensity head with the landmark feature score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub model: f64,
    pub features: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            model: 0.6,
            features: 0.4,
        }
    }
}

impl FusionWeights {
    /// Without a feature score the blend is model-only.
    pub fn fuse(&self, model_intensity: f64, feature_score: Option<f64>) -> f64 {
        match feature_score {
            Some(score) => model_intensity * self.model + score * self.features,
            None => model_intensity,
        }
    }
}
