//! Freshness record persistence

use crate::services::freshness::SourceFreshness;
use chrono::{DateTime, Duration, Utc};
use myco_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Upsert one source's freshness record.
pub async fn save_source(pool: &SqlitePool, record: &SourceFreshness) -> Result<()> {
    let last_ingested = record.last_ingested.map(|dt| dt.to_rfc3339());
    sqlx::query(
        r#"
        INSERT INTO freshness (
            source_id, expected_interval_minutes, last_ingested, failed, notes
        ) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            expected_interval_minutes = excluded.expected_interval_minutes,
            last_ingested = excluded.last_ingested,
            failed = excluded.failed,
            notes = excluded.notes
        "#,
    )
    .bind(&record.source_id)
    .bind(record.expected_interval.num_minutes())
    .bind(&last_ingested)
    .bind(record.failed as i64)
    .bind(&record.notes)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load all persisted freshness records for startup restoration.
pub async fn load_all_sources(pool: &SqlitePool) -> Result<Vec<SourceFreshness>> {
    let rows = sqlx::query(
        "SELECT source_id, expected_interval_minutes, last_ingested, failed, notes FROM freshness",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let last_ingested: Option<String> = row.try_get("last_ingested")?;
        let last_ingested = match last_ingested {
            None => None,
            Some(text) => Some(
                DateTime::parse_from_rfc3339(&text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        Error::Internal(format!("Corrupt last_ingested '{}': {}", text, e))
                    })?,
            ),
        };
        let interval_minutes: i64 = row.try_get("expected_interval_minutes")?;
        let failed: i64 = row.try_get("failed")?;
        records.push(SourceFreshness {
            source_id: row.try_get("source_id")?,
            expected_interval: Duration::minutes(interval_minutes),
            last_ingested,
            failed: failed != 0,
            notes: row.try_get("notes")?,
        });
    }
    Ok(records)
}
