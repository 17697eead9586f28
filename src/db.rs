//! PostgreSQL access
//!
//! Connection setup with retry, embedded migrations, and one repository per
//! table. Repositories only speak SQL; deciding what to do when a statement
//! fails is up to [`crate::storage::Storage`].

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::config::DatabaseSettings;
use crate::models::{ActivityRecord, DeviceStatus, StatusLevel, TelemetryRecord};

/// Try to open a pool up to `settings.max_retries` times.
///
/// Returns `None` once every attempt has failed.
pub async fn connect_with_retry(settings: &DatabaseSettings) -> Option<PgPool> {
    let options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .database(&settings.dbname)
        .username(&settings.user)
        .password(&settings.password);

    let attempts = settings.max_retries.max(1);
    for attempt in 1..=attempts {
        info!(attempt, attempts, host = %settings.host, "Connecting to database");

        match PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.connect_timeout())
            .connect_with(options.clone())
            .await
        {
            Ok(pool) => {
                info!("Database connection established");
                return Some(pool);
            }
            Err(e) => {
                error!(attempt, attempts, error = %e, "Database connection failed");
                if attempt < attempts {
                    info!(delay_secs = settings.retry_delay_secs, "Retrying database connection");
                    tokio::time::sleep(settings.retry_delay()).await;
                }
            }
        }
    }

    warn!("All database connection attempts failed");
    None
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Repository for the `device` table; one row per device holding the
/// latest status document.
pub struct DeviceRepo;

impl DeviceRepo {
    /// Insert or overwrite the device row and its status document.
    pub async fn upsert(
        pool: &PgPool,
        device_id: i32,
        device_name: &str,
        status: &DeviceStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO device (did, dname, location, device_type, status) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (did) DO UPDATE \
             SET dname = EXCLUDED.dname, \
                 location = EXCLUDED.location, \
                 device_type = EXCLUDED.device_type, \
                 status = EXCLUDED.status",
        )
        .bind(device_id)
        .bind(device_name)
        .bind(&status.location.zone)
        .bind(&status.device_type)
        .bind(Json(status))
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find(pool: &PgPool, device_id: i32) -> Result<Option<DeviceStatus>, sqlx::Error> {
        let row: Option<Json<DeviceStatus>> =
            sqlx::query_scalar("SELECT status FROM device WHERE did = $1 AND status IS NOT NULL")
                .bind(device_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|Json(status)| status))
    }

    /// All status documents ordered by device id.
    pub async fn list(pool: &PgPool) -> Result<Vec<(i32, DeviceStatus)>, sqlx::Error> {
        let rows: Vec<(i32, Json<DeviceStatus>)> =
            sqlx::query_as("SELECT did, status FROM device WHERE status IS NOT NULL ORDER BY did")
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(id, Json(status))| (id, status)).collect())
    }
}

type TelemetryRow = (i64, i32, f64, String, String, DateTime<Utc>);

/// Repository for the append-only `telemetry` table.
pub struct TelemetryRepo;

impl TelemetryRepo {
    pub async fn insert(
        pool: &PgPool,
        device_id: i32,
        value: f64,
        unit: &str,
        status: StatusLevel,
        recorded_at: DateTime<Utc>,
    ) -> Result<TelemetryRecord, sqlx::Error> {
        let data_id: i64 = sqlx::query_scalar(
            "INSERT INTO telemetry (did, value, unit, status, recorded_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING data_id",
        )
        .bind(device_id)
        .bind(value)
        .bind(unit)
        .bind(status.as_str())
        .bind(recorded_at)
        .fetch_one(pool)
        .await?;

        Ok(TelemetryRecord {
            data_id,
            device_id,
            value,
            unit: unit.to_owned(),
            status,
            recorded_at,
        })
    }

    /// Most recent readings of a device, newest first.
    pub async fn recent(
        pool: &PgPool,
        device_id: i32,
        limit: u32,
    ) -> Result<Vec<TelemetryRecord>, sqlx::Error> {
        let rows: Vec<TelemetryRow> = sqlx::query_as(
            "SELECT data_id, did, value, unit, status, recorded_at FROM telemetry \
             WHERE did = $1 ORDER BY data_id DESC LIMIT $2",
        )
        .bind(device_id)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    /// Latest reading per device type and UTC day since `since`.
    pub async fn daily_latest(
        pool: &PgPool,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, TelemetryRecord)>, sqlx::Error> {
        let rows: Vec<TypedTelemetryRow> = sqlx::query_as(
            "SELECT DISTINCT ON (d.device_type, (t.recorded_at AT TIME ZONE 'UTC')::date) \
                    d.device_type, t.data_id, t.did, t.value, t.unit, t.status, t.recorded_at \
             FROM telemetry t JOIN device d ON d.did = t.did \
             WHERE t.recorded_at > $1 AND d.device_type IS NOT NULL \
             ORDER BY d.device_type, (t.recorded_at AT TIME ZONE 'UTC')::date, \
                      t.recorded_at DESC, t.data_id DESC",
        )
        .bind(since)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(device_type, data_id, device_id, value, unit, status, recorded_at)| {
                (
                    device_type,
                    into_record((data_id, device_id, value, unit, status, recorded_at)),
                )
            })
            .collect())
    }

    /// Readings of devices of `device_type` since `since`, newest first.
    pub async fn recent_by_type(
        pool: &PgPool,
        device_type: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TelemetryRecord>, sqlx::Error> {
        let rows: Vec<TelemetryRow> = sqlx::query_as(
            "SELECT t.data_id, t.did, t.value, t.unit, t.status, t.recorded_at \
             FROM telemetry t JOIN device d ON d.did = t.did \
             WHERE d.device_type = $1 AND t.recorded_at > $2 \
             ORDER BY t.recorded_at DESC, t.data_id DESC LIMIT $3",
        )
        .bind(device_type)
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }
}

type TypedTelemetryRow = (String, i64, i32, f64, String, String, DateTime<Utc>);

fn into_record(
    (data_id, device_id, value, unit, status, recorded_at): TelemetryRow,
) -> TelemetryRecord {
    TelemetryRecord {
        data_id,
        device_id,
        value,
        unit,
        // Rows are only written by `insert`; anything else is treated as the worst case.
        status: status.parse().unwrap_or(StatusLevel::Critical),
        recorded_at,
    }
}

type ActivityRow = (i64, i32, String, String, DateTime<Utc>);

/// Repository for the append-only `device_activity` table.
pub struct ActivityRepo;

impl ActivityRepo {
    pub async fn insert(
        pool: &PgPool,
        device_id: i32,
        action: &str,
        status: &str,
    ) -> Result<ActivityRecord, sqlx::Error> {
        let (activity_id, recorded_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO device_activity (did, action, status) \
             VALUES ($1, $2, $3) \
             RETURNING activity_id, recorded_at",
        )
        .bind(device_id)
        .bind(action)
        .bind(status)
        .fetch_one(pool)
        .await?;

        Ok(ActivityRecord {
            activity_id,
            device_id,
            action: action.to_owned(),
            status: status.to_owned(),
            recorded_at,
        })
    }

    /// Most recent activity across all devices, newest first.
    pub async fn recent(pool: &PgPool, limit: u32) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT activity_id, did, action, status, recorded_at FROM device_activity \
             ORDER BY activity_id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(activity_id, device_id, action, status, recorded_at)| ActivityRecord {
                activity_id,
                device_id,
                action,
                status,
                recorded_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::build_status_document;
    use crate::models::Reading;
    use chrono::Duration;

    fn status(device_id: i32, device_type: &str, value: f64) -> DeviceStatus {
        build_status_document(
            &Reading::new(device_id, "Sensor", device_type, value, "%"),
            Utc::now(),
        )
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn upsert_keeps_one_row_per_device(pool: PgPool) {
        let first = status(2, "humidity", 50.0);
        let second = status(2, "humidity", 90.0);

        DeviceRepo::upsert(&pool, 2, "Humidity Monitor", &first).await.unwrap();
        DeviceRepo::upsert(&pool, 2, "Humidity Monitor v2", &second).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device WHERE did = 2")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let name: String = sqlx::query_scalar("SELECT dname FROM device WHERE did = 2")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name, "Humidity Monitor v2");

        let found = DeviceRepo::find(&pool, 2).await.unwrap();
        assert_eq!(found, Some(second));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn status_document_round_trips_through_jsonb(pool: PgPool) {
        let doc = status(1, "temperature", 14.0);
        DeviceRepo::upsert(&pool, 1, "Greenhouse Temperature Sensor", &doc).await.unwrap();

        let raw: serde_json::Value = sqlx::query_scalar("SELECT status FROM device WHERE did = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(raw["type"], "temperature");
        assert_eq!(raw["status"], "critical");
        assert_eq!(raw["indicColor"], "#FF3333");

        assert_eq!(DeviceRepo::find(&pool, 1).await.unwrap(), Some(doc));
        assert_eq!(DeviceRepo::find(&pool, 9).await.unwrap(), None);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn list_is_ordered_by_device_id(pool: PgPool) {
        for id in [3, 1, 2] {
            DeviceRepo::upsert(&pool, id, "Sensor", &status(id, "humidity", 60.0)).await.unwrap();
        }

        let ids: Vec<i32> = DeviceRepo::list(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn telemetry_recent_is_newest_first_and_limited(pool: PgPool) {
        let now = Utc::now();
        let mut ids = Vec::new();
        for (i, value) in [20.0, 21.0, 22.0].into_iter().enumerate() {
            let record = TelemetryRepo::insert(
                &pool,
                1,
                value,
                "°C",
                StatusLevel::Normal,
                now + Duration::seconds(i as i64),
            )
            .await
            .unwrap();
            ids.push(record.data_id);
        }
        TelemetryRepo::insert(&pool, 2, 82.0, "%", StatusLevel::Warning, now).await.unwrap();

        let recent = TelemetryRepo::recent(&pool, 1, 2).await.unwrap();
        let got: Vec<(i64, f64)> = recent.iter().map(|r| (r.data_id, r.value)).collect();
        assert_eq!(got, vec![(ids[2], 22.0), (ids[1], 21.0)]);
        assert!(recent.iter().all(|r| r.device_id == 1 && r.unit == "°C"));

        let other = TelemetryRepo::recent(&pool, 2, 10).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].status, StatusLevel::Warning);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn history_queries_join_on_device_type(pool: PgPool) {
        let now = Utc::now();
        DeviceRepo::upsert(&pool, 1, "Temp", &status(1, "temperature", 22.0)).await.unwrap();
        DeviceRepo::upsert(&pool, 2, "Humidity", &status(2, "humidity", 60.0)).await.unwrap();

        let yesterday = now - Duration::days(1);
        TelemetryRepo::insert(&pool, 1, 20.0, "°C", StatusLevel::Normal, yesterday).await.unwrap();
        TelemetryRepo::insert(&pool, 1, 24.0, "°C", StatusLevel::Normal, now - Duration::seconds(1)).await.unwrap();
        TelemetryRepo::insert(&pool, 1, 25.0, "°C", StatusLevel::Normal, now).await.unwrap();
        TelemetryRepo::insert(&pool, 2, 40.0, "%", StatusLevel::Warning, now - Duration::hours(30)).await.unwrap();
        TelemetryRepo::insert(&pool, 2, 61.0, "%", StatusLevel::Normal, now - Duration::minutes(2)).await.unwrap();
        TelemetryRepo::insert(&pool, 2, 62.0, "%", StatusLevel::Normal, now).await.unwrap();

        let daily = TelemetryRepo::daily_latest(&pool, now - Duration::days(30)).await.unwrap();
        let temperature: Vec<f64> = daily
            .iter()
            .filter(|(t, _)| t == "temperature")
            .map(|(_, r)| r.value)
            .collect();
        assert_eq!(temperature.len(), 2);
        assert!(temperature.contains(&20.0));
        assert!(temperature.contains(&25.0));

        let humidity = TelemetryRepo::recent_by_type(&pool, "humidity", now - Duration::hours(24), 24)
            .await
            .unwrap();
        let values: Vec<f64> = humidity.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![62.0, 61.0]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn activity_insert_and_recent(pool: PgPool) {
        let first = ActivityRepo::insert(&pool, 1, "Start Telemetry", "Active").await.unwrap();
        let second = ActivityRepo::insert(&pool, 2, "pump (irrigation)", "Inactive").await.unwrap();
        assert!(second.activity_id > first.activity_id);

        let recent = ActivityRepo::recent(&pool, 10).await.unwrap();
        assert_eq!(recent, vec![second.clone(), first]);

        let limited = ActivityRepo::recent(&pool, 1).await.unwrap();
        assert_eq!(limited, vec![second]);
    }
}
