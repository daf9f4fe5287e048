use std::fmt::Write;

use chrono::{Duration, NaiveDate, Utc};

use crate::models::{EmotionMix, HistoryRecord, LevelSummary};

pub fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

/// Windows per primary emotion, most frequent first. Ties keep the order in
/// which the emotions first appear in `records`.
pub fn summarize_emotions(records: &[HistoryRecord]) -> Vec<EmotionMix> {
    let mut counts: Vec<(String, usize)> = Vec::new();

    for record in records {
        match counts
            .iter_mut()
            .find(|(emotion, _)| *emotion == record.primary_emotion)
        {
            Some((_, count)) => *count += 1,
            None => counts.push((record.primary_emotion.clone(), 1)),
        }
    }

    let total = records.len();
    let mut mix: Vec<EmotionMix> = counts
        .into_iter()
        .map(|(emotion, windows)| EmotionMix {
            emotion,
            windows,
            share: if total == 0 {
                0.0
            } else {
                windows as f64 * 100.0 / total as f64
            },
        })
        .collect();

    mix.sort_by(|a, b| b.windows.cmp(&a.windows));
    mix
}

pub fn summarize_levels(records: &[HistoryRecord]) -> Vec<LevelSummary> {
    let mut levels: Vec<(String, usize, f64, usize)> = Vec::new();

    for record in records {
        let Some(level) = &record.sadness_level else {
            continue;
        };
        let index = match levels.iter().position(|(name, ..)| name == level) {
            Some(index) => index,
            None => {
                levels.push((level.clone(), 0, 0.0, 0));
                levels.len() - 1
            }
        };
        let entry = &mut levels[index];
        entry.1 += 1;
        if let Some(intensity) = record.sadness_intensity {
            entry.2 += intensity;
            entry.3 += 1;
        }
    }

    let mut summaries: Vec<LevelSummary> = levels
        .into_iter()
        .map(|(level, windows, total, measured)| LevelSummary {
            level,
            windows,
            avg_intensity: if measured == 0 {
                0.0
            } else {
                total / measured as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.windows.cmp(&a.windows));
    summaries
}

pub fn build_report(scope: Option<&str>, cutoff: NaiveDate, records: &[HistoryRecord]) -> String {
    let emotions = summarize_emotions(records);
    let levels = summarize_levels(records);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all sessions");

    let _ = writeln!(output, "# Emotion Monitor Report");
    let _ = writeln!(
        output,
        "Generated for {} (windows since {})",
        scope_label, cutoff
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Emotion Mix");

    if emotions.is_empty() {
        let _ = writeln!(output, "No windows recorded for this period.");
    } else {
        for mix in emotions.iter() {
            let _ = writeln!(
                output,
                "- {}: {} windows ({:.1}%)",
                mix.emotion, mix.windows, mix.share
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sadness Levels");

    if levels.is_empty() {
        let _ = writeln!(output, "No sad windows in this period.");
    } else {
        for level in levels.iter() {
            let _ = writeln!(
                output,
                "- {}: {} windows (avg intensity {:.1})",
                level.level, level.windows, level.avg_intensity
            );
        }
    }

    let mut recent = records.to_vec();
    recent.sort_by(|a, b| b.window_start.cmp(&a.window_start));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Windows");

    if recent.is_empty() {
        let _ = writeln!(output, "No windows recorded for this period.");
    } else {
        for record in recent.iter().take(5) {
            let sadness = match (&record.sadness_level, record.sadness_intensity) {
                (Some(level), Some(intensity)) => format!(", {level} {intensity:.1}"),
                (Some(level), None) => format!(", {level}"),
                _ => String::new(),
            };
            let _ = writeln!(
                output,
                "- {} to {}: {}{} across {} samples ({})",
                record.window_start.format("%Y-%m-%d %H:%M:%S"),
                record.window_end.format("%H:%M:%S"),
                record.primary_emotion,
                sadness,
                record.samples_collected,
                record.model_type
            );
        }
    }

    output
}
