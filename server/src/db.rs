use std::str::FromStr;

use healthpatch_bridge::SensorReading;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use uuid::Uuid;

/// A persisted sensor reading
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reading {
    pub id: String,
    pub tag_uid: Option<String>,
    pub temperature: f64,
    pub ph: f64,
    pub glucose: f64,
    /// Unix timestamp, seconds
    pub recorded_at: i64,
}

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    // Every connection to an in-memory database is a separate database
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn migrate(db: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id TEXT PRIMARY KEY,
            tag_uid TEXT,
            temperature REAL NOT NULL,
            ph REAL NOT NULL,
            glucose REAL NOT NULL,
            recorded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_readings_recorded_at ON readings (recorded_at)")
        .execute(db)
        .await?;

    Ok(())
}

pub async fn insert_reading(
    db: &SqlitePool,
    tag_uid: Option<&str>,
    reading: &SensorReading,
) -> Result<Reading, sqlx::Error> {
    insert_reading_at(db, tag_uid, reading, chrono::Utc::now().timestamp()).await
}

pub async fn insert_reading_at(
    db: &SqlitePool,
    tag_uid: Option<&str>,
    reading: &SensorReading,
    recorded_at: i64,
) -> Result<Reading, sqlx::Error> {
    let row = Reading {
        id: Uuid::new_v4().to_string(),
        tag_uid: tag_uid.map(str::to_string),
        temperature: f64::from(reading.temperature_celsius),
        ph: f64::from(reading.ph),
        glucose: f64::from(reading.glucose_mgdl),
        recorded_at,
    };

    sqlx::query(
        "INSERT INTO readings (id, tag_uid, temperature, ph, glucose, recorded_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.tag_uid)
    .bind(row.temperature)
    .bind(row.ph)
    .bind(row.glucose)
    .bind(row.recorded_at)
    .execute(db)
    .await?;

    Ok(row)
}

/// Newest first, optionally only those recorded at or after `since` (unix seconds)
pub async fn list_readings(
    db: &SqlitePool,
    limit: i64,
    since: Option<i64>,
) -> Result<Vec<Reading>, sqlx::Error> {
    sqlx::query_as::<_, Reading>(
        "SELECT * FROM readings WHERE recorded_at >= ? ORDER BY recorded_at DESC, rowid DESC LIMIT ?",
    )
    .bind(since.unwrap_or(i64::MIN))
    .bind(limit)
    .fetch_all(db)
    .await
}

/// Oldest first, `from` inclusive, `to` exclusive
pub async fn readings_between(db: &SqlitePool, from: i64, to: i64) -> Result<Vec<Reading>, sqlx::Error> {
    sqlx::query_as::<_, Reading>(
        "SELECT * FROM readings WHERE recorded_at >= ? AND recorded_at < ? ORDER BY recorded_at, rowid",
    )
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await
}

/// UTC days that have at least one reading, as `YYYY-MM-DD`, ascending
pub async fn reading_dates(db: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT date(recorded_at, 'unixepoch') AS day FROM readings ORDER BY day",
    )
    .fetch_all(db)
    .await
}

pub async fn clear_readings(db: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM readings").execute(db).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readings_round_trip_through_sqlite() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();

        let first = SensorReading { temperature_celsius: 36.5, ph: 7.25, glucose_mgdl: 95.0 };
        let second = SensorReading { temperature_celsius: -20.0, ph: 7.0, glucose_mgdl: 100.0 };
        insert_reading(&db, Some("04A1"), &first).await.unwrap();
        insert_reading(&db, None, &second).await.unwrap();

        let rows = list_readings(&db, 10, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].temperature, -20.0);
        assert_eq!(rows[0].tag_uid, None);
        assert_eq!(rows[1].tag_uid.as_deref(), Some("04A1"));
        assert_eq!(rows[1].ph, 7.25);

        assert_eq!(list_readings(&db, 1, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn readings_filter_by_time_and_day() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();

        let reading = SensorReading { temperature_celsius: 36.0, ph: 7.0, glucose_mgdl: 90.0 };
        // 2024-03-01T23:59:00Z, 2024-03-02T00:00:00Z, 2024-03-02T12:00:00Z
        for recorded_at in [1_709_337_540, 1_709_337_600, 1_709_380_800] {
            insert_reading_at(&db, None, &reading, recorded_at).await.unwrap();
        }

        let since = list_readings(&db, 10, Some(1_709_337_600)).await.unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].recorded_at, 1_709_380_800);

        assert_eq!(reading_dates(&db).await.unwrap(), vec!["2024-03-01", "2024-03-02"]);

        let day = readings_between(&db, 1_709_337_600, 1_709_424_000).await.unwrap();
        let times: Vec<i64> = day.iter().map(|r| r.recorded_at).collect();
        assert_eq!(times, vec![1_709_337_600, 1_709_380_800]);

        assert_eq!(clear_readings(&db).await.unwrap(), 3);
        assert!(list_readings(&db, 10, None).await.unwrap().is_empty());
        assert!(reading_dates(&db).await.unwrap().is_empty());
    }
}
