//! Fixed-length aggregation window. Samples accumulate until the window has
//! elapsed, then one [`WindowSummary`] is emitted and the window restarts.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{
    DisplayEmotion, EmotionSample, SadnessReading, SadnessSummary, WindowSummary,
};
use crate::sadness::SadnessLevel;

/// Maps offsets on the session's monotonic clock to UTC wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    anchor: DateTime<Utc>,
}

impl WallClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self { anchor }
    }

    pub fn at(&self, elapsed: Duration) -> DateTime<Utc> {
        TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| self.anchor.checked_add_signed(delta))
            .unwrap_or(self.anchor)
    }
}

/// Counts keyed in order of first appearance. The leader is the highest
/// count; a tie goes to whichever key was seen first.
#[derive(Debug, Clone)]
struct FirstSeenTally<K> {
    entries: Vec<(K, usize)>,
}

impl<K: PartialEq + Copy> FirstSeenTally<K> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add(&mut self, key: K) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((key, 1)),
        }
    }

    fn leader(&self) -> Option<K> {
        let mut best: Option<(K, usize)> = None;
        for &(key, count) in &self.entries {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((key, count));
            }
        }
        best.map(|(key, _)| key)
    }

    fn into_counts(self) -> Vec<(K, usize)> {
        self.entries
    }
}

pub struct WindowAggregator {
    window_length: Duration,
    window_start: Duration,
    clock: WallClock,
    model_identifier: String,
    samples: Vec<EmotionSample>,
    sad_samples: Vec<SadnessReading>,
}

impl WindowAggregator {
    pub fn new(
        window_length: Duration,
        clock: WallClock,
        model_identifier: impl Into<String>,
    ) -> Self {
        Self {
            window_length,
            window_start: Duration::ZERO,
            clock,
            model_identifier: model_identifier.into(),
            samples: Vec::new(),
            sad_samples: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn window_start(&self) -> Duration {
        self.window_start
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn record(&mut self, sample: EmotionSample) {
        if sample.label == DisplayEmotion::Sad {
            if let Some(reading) = sample.sadness {
                self.sad_samples.push(reading);
            }
        }
        self.samples.push(sample);
    }

    /// Closes the window once `window_length` has elapsed since it started.
    pub fn maybe_flush(&mut self, now: Duration) -> Option<WindowSummary> {
        if now.saturating_sub(self.window_start) < self.window_length {
            return None;
        }
        self.flush(now)
    }

    /// Closes the window unconditionally. Returns a summary only when at least
    /// one sample was recorded; the window restarts at `now` either way.
    pub fn flush(&mut self, now: Duration) -> Option<WindowSummary> {
        let summary = self.summarize(now);
        self.samples.clear();
        self.sad_samples.clear();
        self.window_start = now;
        summary
    }

    fn summarize(&self, now: Duration) -> Option<WindowSummary> {
        let mut labels = FirstSeenTally::new();
        for sample in &self.samples {
            labels.add(sample.label);
        }
        let dominant_emotion = labels.leader()?;

        let sadness = if self.sad_samples.is_empty() {
            None
        } else {
            let mut levels: FirstSeenTally<(SadnessLevel, &'static str)> = FirstSeenTally::new();
            let mut total = 0.0;
            for reading in &self.sad_samples {
                levels.add((reading.level, reading.label));
                total += reading.intensity;
            }
            levels.leader().map(|(level, label)| SadnessSummary {
                level,
                label,
                mean_intensity: total / self.sad_samples.len() as f64,
            })
        };

        let mut score_totals: Vec<(&'static str, f64, usize)> = Vec::new();
        for (key, value) in self.samples.iter().flat_map(|s| s.raw_scores.iter()) {
            match score_totals.iter_mut().find(|(existing, _, _)| existing == key) {
                Some((_, total, count)) => {
                    *total += *value;
                    *count += 1;
                }
                None => score_totals.push((*key, *value, 1)),
            }
        }

        let sample_count = self.samples.len();
        let mean_confidence =
            self.samples.iter().map(|s| s.confidence).sum::<f64>() / sample_count as f64;

        Some(WindowSummary {
            window_start: self.clock.at(self.window_start),
            window_end: self.clock.at(now),
            dominant_emotion,
            sadness,
            label_counts: labels.into_counts(),
            mean_scores: score_totals
                .into_iter()
                .map(|(key, total, count)| (key, total / count as f64))
                .collect(),
            mean_confidence,
            sample_count,
            model_identifier: self.model_identifier.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sadness::BandTable;
    use chrono::TimeZone;

    fn clock() -> WallClock {
        WallClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
    }

    fn aggregator() -> WindowAggregator {
        WindowAggregator::new(Duration::from_secs(30), clock(), "Custom CNN")
    }

    fn sample(label: DisplayEmotion) -> EmotionSample {
        EmotionSample {
            timestamp: clock().at(Duration::from_secs(1)),
            label,
            raw_scores: vec![(label.as_str(), 60.0)],
            confidence: 60.0,
            sadness: None,
        }
    }

    fn sad(intensity: f64) -> EmotionSample {
        EmotionSample {
            sadness: Some(BandTable::clinical().reading(intensity)),
            ..sample(DisplayEmotion::Sad)
        }
    }

    #[test]
    fn stays_open_until_window_elapses() {
        let mut window = aggregator();
        window.record(sample(DisplayEmotion::Happy));
        assert!(window.maybe_flush(Duration::from_millis(29_999)).is_none());
        assert_eq!(window.sample_count(), 1);
        assert_eq!(window.window_start(), Duration::ZERO);
    }

    #[test]
    fn empty_window_resets_silently() {
        let mut window = aggregator();
        assert!(window.maybe_flush(Duration::from_secs(31)).is_none());
        assert_eq!(window.window_start(), Duration::from_secs(31));
        assert!(window.maybe_flush(Duration::from_secs(45)).is_none());
        assert_eq!(window.window_start(), Duration::from_secs(31));
    }

    #[test]
    fn tie_goes_to_first_seen_label() {
        let mut window = aggregator();
        for label in [
            DisplayEmotion::Sad,
            DisplayEmotion::Happy,
            DisplayEmotion::Sad,
            DisplayEmotion::Happy,
        ] {
            window.record(sample(label));
        }
        let summary = window.maybe_flush(Duration::from_secs(30)).unwrap();
        assert_eq!(summary.dominant_emotion, DisplayEmotion::Sad);
        assert_eq!(
            summary.label_counts,
            vec![(DisplayEmotion::Sad, 2), (DisplayEmotion::Happy, 2)]
        );

        for label in [
            DisplayEmotion::Happy,
            DisplayEmotion::Sad,
            DisplayEmotion::Sad,
            DisplayEmotion::Happy,
        ] {
            window.record(sample(label));
        }
        let summary = window.maybe_flush(Duration::from_secs(60)).unwrap();
        assert_eq!(summary.dominant_emotion, DisplayEmotion::Happy);
    }

    #[test]
    fn strict_majority_beats_first_seen() {
        let mut window = aggregator();
        window.record(sample(DisplayEmotion::Neutral));
        window.record(sample(DisplayEmotion::Fearful));
        window.record(sample(DisplayEmotion::Fearful));
        let summary = window.maybe_flush(Duration::from_secs(30)).unwrap();
        assert_eq!(summary.dominant_emotion, DisplayEmotion::Fearful);
    }

    #[test]
    fn mean_intensity_over_sad_samples() {
        let mut window = aggregator();
        for intensity in [20.0, 50.0, 80.0] {
            window.record(sad(intensity));
        }
        window.record(sample(DisplayEmotion::Happy));

        let summary = window.maybe_flush(Duration::from_secs(30)).unwrap();
        let sadness = summary.sadness.unwrap();
        assert!((sadness.mean_intensity - 50.0).abs() < 1e-9);
        // one sample per band, first seen wins
        assert_eq!(sadness.label, "upset");
        assert_eq!(sadness.level, SadnessLevel::Mild);
        assert_eq!(summary.sample_count, 4);
    }

    #[test]
    fn level_vote_is_independent_of_mean() {
        let mut window = aggregator();
        for intensity in [10.0, 75.0, 75.0] {
            window.record(sad(intensity));
        }
        let sadness = window
            .maybe_flush(Duration::from_secs(30))
            .unwrap()
            .sadness
            .unwrap();
        assert_eq!(sadness.label, "depressed");
        assert!((sadness.mean_intensity - 160.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_sad_samples_means_no_sadness() {
        let mut window = aggregator();
        window.record(sample(DisplayEmotion::Sad));
        let summary = window.maybe_flush(Duration::from_secs(30)).unwrap();
        assert_eq!(summary.dominant_emotion, DisplayEmotion::Sad);
        assert!(summary.sadness.is_none());
    }

    #[test]
    fn flush_clears_and_restarts() {
        let mut window = aggregator();
        window.record(sample(DisplayEmotion::Happy));
        let summary = window.maybe_flush(Duration::from_secs(32)).unwrap();
        assert_eq!(summary.window_start, clock().at(Duration::ZERO));
        assert_eq!(summary.window_end, clock().at(Duration::from_secs(32)));
        assert_eq!(summary.model_identifier, "Custom CNN");
        assert_eq!(window.sample_count(), 0);
        assert_eq!(window.window_start(), Duration::from_secs(32));
        assert!(window.maybe_flush(Duration::from_secs(61)).is_none());
    }

    #[test]
    fn averages_scores_per_key() {
        let mut window = aggregator();
        let mut first = sample(DisplayEmotion::Happy);
        first.raw_scores = vec![("sad", 20.0), ("happy", 80.0)];
        first.confidence = 80.0;
        let mut second = sample(DisplayEmotion::Sad);
        second.raw_scores = vec![("sad", 70.0), ("happy", 30.0)];
        second.confidence = 70.0;
        window.record(first);
        window.record(second);

        let summary = window.maybe_flush(Duration::from_secs(30)).unwrap();
        assert_eq!(summary.mean_score("sad"), Some(45.0));
        assert_eq!(summary.mean_score("happy"), Some(55.0));
        assert_eq!(summary.mean_confidence, 75.0);
    }

    #[test]
    fn forced_flush_emits_partial_window() {
        let mut window = aggregator();
        window.record(sample(DisplayEmotion::Neutral));
        let summary = window.flush(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.sample_count, 1);
        assert_eq!(window.window_start(), Duration::from_secs(5));
    }
}
