use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::Pipeline;
use crate::models::HistoryRecord;
use crate::sink::NOT_AVAILABLE;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One line of any of the three session log layouts.
#[derive(Debug, serde::Deserialize)]
pub struct LogRow {
    pub window_start: String,
    pub window_end: String,
    pub primary_emotion: String,
    #[serde(default)]
    pub sadness_level: Option<String>,
    #[serde(default)]
    pub sadness_intensity: Option<String>,
    pub samples_collected: i32,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub landmarks_used: Option<String>,
}

fn available(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty() && v != NOT_AVAILABLE)
}

fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp {value:?}"))?
        .with_timezone(&Utc))
}

pub fn history_from_row(row: LogRow, session_id: Uuid) -> anyhow::Result<HistoryRecord> {
    let (pipeline, model_type) = match (row.model_type, row.landmarks_used) {
        (Some(model_type), _) => (Pipeline::SevenClass, model_type),
        (None, Some(landmarks)) => {
            let model_type = if landmarks.eq_ignore_ascii_case("true") {
                "Binary CNN + landmarks"
            } else {
                "Binary CNN"
            };
            (Pipeline::Landmark, model_type.to_string())
        }
        (None, None) => (Pipeline::Heuristic, "Mouth Heuristic".to_string()),
    };

    let sadness_intensity = available(row.sadness_intensity)
        .map(|value| {
            value
                .parse::<f64>()
                .with_context(|| format!("invalid sadness intensity {value:?}"))
        })
        .transpose()?;

    Ok(HistoryRecord {
        session_id,
        pipeline: pipeline.as_str().to_string(),
        window_start: parse_timestamp(&row.window_start)?,
        window_end: parse_timestamp(&row.window_end)?,
        primary_emotion: row.primary_emotion,
        sadness_level: available(row.sadness_level),
        sadness_intensity,
        samples_collected: row.samples_collected,
        model_type,
    })
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    session_id: Uuid,
) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<LogRow>().enumerate() {
        let row = result?;
        let record = history_from_row(row, session_id)
            .with_context(|| format!("row {} of {}", index + 1, csv_path.display()))?;
        let source_key = format!(
            "{}:{}:{}",
            record.pipeline,
            record.window_start.to_rfc3339(),
            record.window_end.to_rfc3339()
        );

        let result = sqlx::query(
            r#"
            INSERT INTO emotion_monitor.window_summaries
            (id, session_id, pipeline, window_start, window_end, primary_emotion,
             sadness_level, sadness_intensity, samples_collected, model_type, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.session_id)
        .bind(&record.pipeline)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(&record.primary_emotion)
        .bind(&record.sadness_level)
        .bind(record.sadness_intensity)
        .bind(record.samples_collected)
        .bind(&record.model_type)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_history(
    pool: &PgPool,
    since_date: NaiveDate,
    session: Option<Uuid>,
) -> anyhow::Result<Vec<HistoryRecord>> {
    let mut query = String::from(
        "SELECT session_id, pipeline, window_start, window_end, primary_emotion, \
         sadness_level, sadness_intensity, samples_collected, model_type \
         FROM emotion_monitor.window_summaries \
         WHERE window_start >= $1",
    );

    if session.is_some() {
        query.push_str(" AND session_id = $2");
    }
    query.push_str(" ORDER BY window_start");

    let since = since_date
        .and_hms_opt(0, 0, 0)
        .context("invalid cutoff date")?
        .and_utc();
    let mut rows = sqlx::query(&query).bind(since);
    if let Some(value) = session {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut history = Vec::with_capacity(records.len());

    for row in records {
        history.push(HistoryRecord {
            session_id: row.get("session_id"),
            pipeline: row.get("pipeline"),
            window_start: row.get("window_start"),
            window_end: row.get("window_end"),
            primary_emotion: row.get("primary_emotion"),
            sadness_level: row.get("sadness_level"),
            sadness_intensity: row.get("sadness_intensity"),
            samples_collected: row.get("samples_collected"),
            model_type: row.get("model_type"),
        });
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str) -> Vec<LogRow> {
        csv::Reader::from_reader(text.as_bytes())
            .deserialize::<LogRow>()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn seven_class_rows_keep_model_type() {
        let rows = read(
            "timestamp,window_start,window_end,primary_emotion,sadness_level,sadness_intensity,emotion_scores,samples_collected,model_type\n\
             2026-03-02T09:00:30.000000Z,2026-03-02T09:00:00.000000Z,2026-03-02T09:00:30.000000Z,sad,melancholic,52.50,\"{\"\"sad\"\":3}\",3,Custom CNN\n",
        );
        let session = Uuid::new_v4();
        let record = history_from_row(rows.into_iter().next().unwrap(), session).unwrap();
        assert_eq!(record.pipeline, "seven-class");
        assert_eq!(record.model_type, "Custom CNN");
        assert_eq!(record.sadness_level.as_deref(), Some("melancholic"));
        assert_eq!(record.sadness_intensity, Some(52.5));
        assert_eq!(record.samples_collected, 3);
        assert_eq!(record.session_id, session);
    }

    #[test]
    fn not_available_fields_become_none() {
        let rows = read(
            "timestamp,window_start,window_end,primary_emotion,sadness_level,sadness_intensity,happy_confidence,sad_confidence,samples_collected,landmarks_used\n\
             2026-03-02T09:00:30Z,2026-03-02T09:00:00Z,2026-03-02T09:00:30Z,happy,N/A,N/A,80.00,20.00,12,True\n",
        );
        let record = history_from_row(rows.into_iter().next().unwrap(), Uuid::new_v4()).unwrap();
        assert_eq!(record.pipeline, "landmark");
        assert_eq!(record.model_type, "Binary CNN + landmarks");
        assert!(record.sadness_level.is_none());
        assert!(record.sadness_intensity.is_none());
    }

    #[test]
    fn heuristic_rows_are_recognized() {
        let rows = read(
            "timestamp,window_start,window_end,primary_emotion,avg_confidence,samples_collected\n\
             2026-03-02T09:00:30Z,2026-03-02T09:00:00Z,2026-03-02T09:00:30Z,sad,41.00,60\n",
        );
        let record = history_from_row(rows.into_iter().next().unwrap(), Uuid::new_v4()).unwrap();
        assert_eq!(record.pipeline, "heuristic");
        assert_eq!(record.primary_emotion, "sad");
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let rows = read(
            "timestamp,window_start,window_end,primary_emotion,avg_confidence,samples_collected\n\
             x,yesterday,today,sad,41.00,60\n",
        );
        assert!(history_from_row(rows.into_iter().next().unwrap(), Uuid::new_v4()).is_err());
    }
}
