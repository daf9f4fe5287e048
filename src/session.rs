//! Single-threaded frame loop: capture, locate, sample, aggregate, persist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{CapturedFrame, FaceLocator, FrameSource};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::models::{DisplayEmotion, EmotionSample, SadnessReading, WindowSummary};
use crate::scoring::Scorer;
use crate::sink::{SummarySink, NOT_AVAILABLE};
use crate::window::{WallClock, WindowAggregator};

/// Checked once per frame; `true` ends the session.
pub trait StopSignal {
    fn should_stop(&self) -> bool;
}

impl StopSignal for AtomicBool {
    fn should_stop(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// What an overlay would currently show.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub faces: usize,
    pub emotion: DisplayEmotion,
    pub confidence: f64,
    pub sadness: Option<SadnessReading>,
    pub window_samples: usize,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            faces: 0,
            emotion: DisplayEmotion::Neutral,
            confidence: 0.0,
            sadness: None,
            window_samples: 0,
        }
    }
}

impl DisplayState {
    fn show(&mut self, sample: &EmotionSample) {
        self.emotion = sample.label;
        self.confidence = sample.confidence;
        self.sadness = sample.sadness;
    }

    fn fallback(&mut self) {
        self.emotion = DisplayEmotion::Neutral;
        self.confidence = 0.0;
        self.sadness = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub frames: usize,
    pub samples: usize,
    pub classifier_failures: usize,
    pub windows_written: usize,
    /// Samples left in the open window when the session ended unflushed.
    pub discarded_samples: usize,
}

pub struct Session<S, L, Sc, K> {
    source: S,
    locator: L,
    scorer: Sc,
    sink: K,
    clock: WallClock,
    aggregator: WindowAggregator,
    sample_interval: Duration,
    flush_on_exit: bool,
    last_sample: Option<Duration>,
    display: DisplayState,
    report: SessionReport,
}

impl<S, L, Sc, K> Session<S, L, Sc, K>
where
    S: FrameSource,
    L: FaceLocator<S::Frame>,
    Sc: Scorer<S::Frame>,
    K: SummarySink,
{
    pub fn new(
        source: S,
        locator: L,
        scorer: Sc,
        sink: K,
        config: &MonitorConfig,
        clock: WallClock,
    ) -> Self {
        let aggregator =
            WindowAggregator::new(config.window_length, clock, scorer.model_identifier());
        Self {
            source,
            locator,
            scorer,
            sink,
            clock,
            aggregator,
            sample_interval: config.sample_interval,
            flush_on_exit: config.flush_on_exit,
            last_sample: None,
            display: DisplayState::default(),
            report: SessionReport::default(),
        }
    }

    #[cfg(test)]
    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn run(&mut self, stop: &dyn StopSignal) -> Result<SessionReport> {
        info!(
            model = %self.scorer.model_identifier(),
            sample_interval_ms = self.sample_interval.as_millis() as u64,
            "session started"
        );

        let mut last_elapsed = Duration::ZERO;
        while let Some(CapturedFrame { elapsed, frame }) = self.source.next_frame()? {
            last_elapsed = elapsed;
            self.report.frames += 1;
            self.tick(elapsed, &frame)?;
            if stop.should_stop() {
                break;
            }
        }

        if self.flush_on_exit {
            if let Some(summary) = self.aggregator.flush(last_elapsed) {
                self.write(&summary)?;
            }
        } else if self.aggregator.sample_count() > 0 {
            self.report.discarded_samples = self.aggregator.sample_count();
            info!(
                samples = self.report.discarded_samples,
                "discarding partial window"
            );
        }

        info!(
            frames = self.report.frames,
            samples = self.report.samples,
            windows = self.report.windows_written,
            "session ended"
        );
        Ok(self.report.clone())
    }

    fn tick(&mut self, elapsed: Duration, frame: &S::Frame) -> Result<()> {
        let faces = self.locator.locate(frame);
        self.display.faces = faces.len();

        let due = self
            .last_sample
            .map_or(true, |last| elapsed.saturating_sub(last) >= self.sample_interval);
        if let (true, Some(face)) = (due, faces.first()) {
            self.last_sample = Some(elapsed);
            match self.scorer.score(frame, face, self.clock.at(elapsed)) {
                Ok(sample) => {
                    debug!(
                        emotion = %sample.label,
                        confidence = sample.confidence,
                        sadness = ?sample.sadness.map(|s| s.label),
                        "sample"
                    );
                    self.display.show(&sample);
                    self.aggregator.record(sample);
                    self.report.samples += 1;
                }
                Err(err) => {
                    warn!(error = %err, "classifier failed, skipping tick");
                    self.display.fallback();
                    self.report.classifier_failures += 1;
                }
            }
        }
        self.display.window_samples = self.aggregator.sample_count();

        if let Some(summary) = self.aggregator.maybe_flush(elapsed) {
            self.write(&summary)?;
        }
        Ok(())
    }

    fn write(&mut self, summary: &WindowSummary) -> Result<()> {
        self.sink.append(summary)?;
        self.report.windows_written += 1;
        info!(
            emotion = %summary.dominant_emotion,
            sadness_level = summary.sadness.map(|s| s.label).unwrap_or(NOT_AVAILABLE),
            samples = summary.sample_count,
            "window summary"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClassifierOutput, EmotionClassifier};
    use crate::config::Pipeline;
    use crate::error::{ClassifierError, MonitorError};
    use crate::models::FaceRect;
    use crate::sadness::BandTable;
    use crate::scoring::SevenClassScorer;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::collections::VecDeque;

    struct NeverStop;

    impl StopSignal for NeverStop {
        fn should_stop(&self) -> bool {
            false
        }
    }

    #[derive(Clone)]
    struct Frame {
        faces: usize,
        scores: Option<[f64; 7]>,
    }

    struct Script {
        frames: VecDeque<Result<CapturedFrame<Frame>>>,
        reads: Cell<usize>,
    }

    impl FrameSource for Script {
        type Frame = Frame;

        fn next_frame(&mut self) -> Result<Option<CapturedFrame<Frame>>> {
            self.reads.set(self.reads.get() + 1);
            self.frames.pop_front().transpose()
        }
    }

    struct Locator;

    impl FaceLocator<Frame> for Locator {
        fn locate(&self, frame: &Frame) -> Vec<FaceRect> {
            (0..frame.faces)
                .map(|i| FaceRect::new(100 * i as i32, 0, 80, 80))
                .collect()
        }
    }

    struct Classifier;

    impl EmotionClassifier<Frame> for Classifier {
        fn classify(
            &self,
            frame: &Frame,
            _: &FaceRect,
        ) -> std::result::Result<ClassifierOutput, ClassifierError> {
            frame
                .scores
                .map(ClassifierOutput::SevenClass)
                .ok_or(ClassifierError::NoPrediction)
        }
    }

    const HAPPY: [f64; 7] = [0.0, 0.0, 0.0, 0.9, 0.1, 0.0, 0.0];
    const SAD: [f64; 7] = [0.0, 0.0, 0.0, 0.1, 0.9, 0.0, 0.0];

    fn frame_at(
        millis: u64,
        faces: usize,
        scores: Option<[f64; 7]>,
    ) -> Result<CapturedFrame<Frame>> {
        Ok(CapturedFrame {
            elapsed: Duration::from_millis(millis),
            frame: Frame { faces, scores },
        })
    }

    fn script(frames: Vec<Result<CapturedFrame<Frame>>>) -> Script {
        Script {
            frames: frames.into(),
            reads: Cell::new(0),
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig::for_pipeline(Pipeline::SevenClass)
    }

    fn run(
        frames: Vec<Result<CapturedFrame<Frame>>>,
        config: &MonitorConfig,
        sink: &mut Vec<WindowSummary>,
    ) -> Result<SessionReport> {
        let scorer = SevenClassScorer::new(Classifier, BandTable::clinical(), "Custom CNN");
        let clock = WallClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let mut session = Session::new(script(frames), Locator, scorer, sink, config, clock);
        session.run(&NeverStop)
    }

    #[test]
    fn samples_respect_interval() {
        let frames = (0..5).map(|i| frame_at(i * 100, 1, Some(HAPPY))).collect();
        let mut sink = Vec::new();
        let report = run(frames, &config(), &mut sink).unwrap();
        // 0ms and 300ms
        assert_eq!(report.frames, 5);
        assert_eq!(report.samples, 2);
        assert_eq!(report.discarded_samples, 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn faceless_frames_are_skipped() {
        let frames = vec![
            frame_at(0, 0, Some(HAPPY)),
            frame_at(400, 0, Some(HAPPY)),
            frame_at(800, 2, Some(SAD)),
        ];
        let mut sink = Vec::new();
        let report = run(frames, &config(), &mut sink).unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.classifier_failures, 0);
    }

    #[test]
    fn classifier_failures_never_reach_window() {
        let frames = vec![
            frame_at(0, 1, None),
            frame_at(1_000, 1, Some(SAD)),
            frame_at(2_000, 1, None),
            frame_at(30_000, 1, None),
        ];
        let mut sink = Vec::new();
        let report = run(frames, &config(), &mut sink).unwrap();
        assert_eq!(report.classifier_failures, 3);
        assert_eq!(report.samples, 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].sample_count, 1);
        assert_eq!(sink[0].dominant_emotion, DisplayEmotion::Sad);
    }

    #[test]
    fn failure_shows_neutral() {
        let scorer = SevenClassScorer::new(Classifier, BandTable::clinical(), "Custom CNN");
        let clock = WallClock::new(Utc::now());
        let mut sink = Vec::new();
        let frames = vec![frame_at(0, 1, Some(SAD)), frame_at(500, 1, None)];
        let mut session =
            Session::new(script(frames), Locator, scorer, &mut sink, &config(), clock);
        session.run(&NeverStop).unwrap();
        assert_eq!(session.display().emotion, DisplayEmotion::Neutral);
        assert_eq!(session.display().faces, 1);
        assert!(session.display().sadness.is_none());
    }

    #[test]
    fn windows_flush_on_schedule() {
        let frames = (0..=65)
            .map(|s| {
                let scores = if s % 3 == 0 { HAPPY } else { SAD };
                frame_at(s * 1_000, 1, Some(scores))
            })
            .collect();
        let mut sink = Vec::new();
        let report = run(frames, &config(), &mut sink).unwrap();
        assert_eq!(report.windows_written, 2);
        assert_eq!(sink.len(), 2);
        // window one holds samples at 0..=30s
        assert_eq!(sink[0].sample_count, 31);
        assert_eq!(sink[0].dominant_emotion, DisplayEmotion::Sad);
        assert_eq!(sink[1].window_start, sink[0].window_end);
        assert_eq!(sink[1].sample_count, 30);
        assert_eq!(report.discarded_samples, 5);
        let sadness = sink[0].sadness.unwrap();
        assert_eq!(sadness.label, "depressed");
    }

    #[test]
    fn flush_on_exit_keeps_partial_window() {
        let frames = (0..10).map(|s| frame_at(s * 1_000, 1, Some(HAPPY))).collect();
        let mut config = config();
        config.flush_on_exit = true;
        let mut sink = Vec::new();
        let report = run(frames, &config, &mut sink).unwrap();
        assert_eq!(report.windows_written, 1);
        assert_eq!(report.discarded_samples, 0);
        assert_eq!(sink[0].sample_count, 10);
    }

    #[test]
    fn capture_failure_is_fatal() {
        let frames = vec![
            frame_at(0, 1, Some(HAPPY)),
            Err(MonitorError::Capture("device unplugged".to_string())),
            frame_at(31_000, 1, Some(HAPPY)),
        ];
        let mut sink = Vec::new();
        let result = run(frames, &config(), &mut sink);
        assert!(matches!(result, Err(MonitorError::Capture(_))));
        assert!(sink.is_empty());
    }

    #[test]
    fn stop_signal_ends_loop() {
        let scorer = SevenClassScorer::new(Classifier, BandTable::clinical(), "Custom CNN");
        let clock = WallClock::new(Utc::now());
        let mut sink = Vec::new();
        let frames = (0..10).map(|s| frame_at(s * 1_000, 1, Some(HAPPY))).collect();
        let mut session =
            Session::new(script(frames), Locator, scorer, &mut sink, &config(), clock);
        let stop = AtomicBool::new(true);
        let report = session.run(&stop).unwrap();
        assert_eq!(report.frames, 1);
        assert_eq!(report.discarded_samples, 1);
        assert_eq!(session.source.reads.get(), 1);
    }
}
