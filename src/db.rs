use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::AlertLogEntry;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stores alert log entries, skipping ones already recorded for the same
/// (student, type, severity, message). Returns how many rows were new.
pub async fn log_alerts(pool: &PgPool, entries: &[AlertLogEntry]) -> anyhow::Result<usize> {
    let mut inserted = 0usize;

    for entry in entries {
        let result = sqlx::query(
            r#"
            INSERT INTO student_early_warning.alert_log
            (id, student_id, alert_type, severity, message, source, logged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_id, alert_type, severity, message) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.student_id)
        .bind(entry.alert_type.as_str())
        .bind(entry.severity.as_str())
        .bind(&entry.message)
        .bind(&entry.source)
        .bind(entry.logged_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Start of a `since_days` look-back window ending at `now`. Windows shorter
/// than a day are widened to one; windows chrono cannot represent are errors.
pub fn cutoff(now: DateTime<Utc>, since_days: i64) -> anyhow::Result<DateTime<Utc>> {
    TimeDelta::try_days(since_days.max(1))
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("--since-days {since_days} is out of range"))
}

#[derive(Debug, Clone)]
pub struct StoredAlert {
    pub student_id: String,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub source: String,
    pub logged_at: DateTime<Utc>,
}

pub async fn fetch_alert_log(
    pool: &PgPool,
    since: DateTime<Utc>,
    student_id: Option<&str>,
) -> anyhow::Result<Vec<StoredAlert>> {
    let mut query = String::from(
        "SELECT student_id, alert_type, severity, message, source, logged_at \
         FROM student_early_warning.alert_log \
         WHERE logged_at >= $1",
    );

    if student_id.is_some() {
        query.push_str(" AND student_id = $2");
    }
    query.push_str(" ORDER BY logged_at DESC");

    let mut rows = sqlx::query(&query).bind(since);

    if let Some(value) = student_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut alerts = Vec::with_capacity(records.len());

    for row in records {
        alerts.push(StoredAlert {
            student_id: row.get("student_id"),
            alert_type: row.get("alert_type"),
            severity: row.get("severity"),
            message: row.get("message"),
            source: row.get("source"),
            logged_at: row.get("logged_at"),
        });
    }

    Ok(alerts)
}
