//! Storage facade
//!
//! Writes go to PostgreSQL when a pool is available. Any failed statement,
//! or a missing pool, sends the write to the in-memory [`FallbackStore`]
//! instead, so callers never see a storage error. Reads follow the same
//! rule.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseSettings;
use crate::db::{self, ActivityRepo, DeviceRepo, TelemetryRepo};
use crate::fallback::{FallbackStore, FallbackSummary};
use crate::models::{ActivityRecord, DeviceStatus, StatusLevel, TelemetryRecord};

/// Backend that accepted a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteTarget {
    Database,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Storage {
    pool: Option<PgPool>,
    fallback: FallbackStore,
}

impl Storage {
    /// Connect to PostgreSQL and run migrations, or run in fallback-only
    /// mode when the database is disabled or unreachable.
    pub async fn connect(settings: &DatabaseSettings) -> Self {
        if !settings.enabled {
            info!("Database disabled by configuration, using fallback storage");
            return Self::fallback_only();
        }

        let Some(pool) = db::connect_with_retry(settings).await else {
            warn!("Using fallback storage");
            return Self::fallback_only();
        };

        if let Err(e) = db::run_migrations(&pool).await {
            error!(error = %e, "Database migrations failed, using fallback storage");
            return Self::fallback_only();
        }

        info!("Database ready");
        Self {
            pool: Some(pool),
            fallback: FallbackStore::new(),
        }
    }

    pub fn fallback_only() -> Self {
        Self {
            pool: None,
            fallback: FallbackStore::new(),
        }
    }

    /// Name of the primary backend
    pub fn backend(&self) -> &'static str {
        if self.pool.is_some() {
            "postgres"
        } else {
            "fallback"
        }
    }

    pub async fn upsert_device_status(
        &self,
        device_id: i32,
        device_name: &str,
        status: &DeviceStatus,
    ) -> WriteTarget {
        if let Some(pool) = &self.pool {
            match DeviceRepo::upsert(pool, device_id, device_name, status).await {
                Ok(()) => {
                    debug!(device_id, status = %status.status, "Device status updated in database");
                    return WriteTarget::Database;
                }
                Err(e) => error!(device_id, error = %e, "Error updating device status"),
            }
        }

        self.fallback.upsert_device_status(device_id, status.clone()).await;
        debug!(device_id, status = %status.status, "Device status updated in fallback storage");
        WriteTarget::Fallback
    }

    pub async fn insert_telemetry(
        &self,
        device_id: i32,
        value: f64,
        unit: &str,
        status: StatusLevel,
        recorded_at: DateTime<Utc>,
    ) -> (TelemetryRecord, WriteTarget) {
        if let Some(pool) = &self.pool {
            match TelemetryRepo::insert(pool, device_id, value, unit, status, recorded_at).await {
                Ok(record) => return (record, WriteTarget::Database),
                Err(e) => error!(device_id, error = %e, "Error sending telemetry data"),
            }
        }

        let record = self
            .fallback
            .insert_telemetry(device_id, value, unit, status, recorded_at)
            .await;
        debug!(device_id, data_id = record.data_id, "Telemetry data stored in fallback storage");
        (record, WriteTarget::Fallback)
    }

    pub async fn record_activity(&self, device_id: i32, action: &str, status: &str) -> ActivityRecord {
        if let Some(pool) = &self.pool {
            match ActivityRepo::insert(pool, device_id, action, status).await {
                Ok(record) => {
                    info!(device_id, action, status, "Device activity recorded in database");
                    return record;
                }
                Err(e) => error!(device_id, action, error = %e, "Error recording device activity"),
            }
        }

        let record = self.fallback.record_activity(device_id, action, status).await;
        info!(device_id, action, status, "Device activity recorded in fallback storage");
        record
    }

    /// Latest status document of every device, ordered by device id.
    ///
    /// Documents upserted into the fallback store during a database outage
    /// are merged in; for the same device the newer document wins.
    pub async fn device_statuses(&self) -> Vec<DeviceStatus> {
        let mut merged: BTreeMap<i32, DeviceStatus> =
            self.fallback.device_statuses().await.into_iter().collect();

        if let Some(pool) = &self.pool {
            match DeviceRepo::list(pool).await {
                Ok(rows) => {
                    for (device_id, stored) in rows {
                        let keep_local = merged
                            .get(&device_id)
                            .is_some_and(|local| local.last_updated > stored.last_updated);
                        if !keep_local {
                            merged.insert(device_id, stored);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Failed to list device statuses, reading fallback storage"),
            }
        }

        merged.into_values().collect()
    }

    pub async fn device_status(&self, device_id: i32) -> Option<DeviceStatus> {
        let local = self.fallback.device_status(device_id).await;

        if let Some(pool) = &self.pool {
            match DeviceRepo::find(pool, device_id).await {
                Ok(stored) => return newer(stored, local),
                Err(e) => warn!(device_id, error = %e, "Failed to load device status, reading fallback storage"),
            }
        }

        local
    }

    pub async fn recent_telemetry(&self, device_id: i32, limit: u32) -> Vec<TelemetryRecord> {
        if let Some(pool) = &self.pool {
            match TelemetryRepo::recent(pool, device_id, limit).await {
                Ok(records) => return records,
                Err(e) => warn!(device_id, error = %e, "Failed to load telemetry, reading fallback storage"),
            }
        }

        self.fallback.recent_telemetry(device_id, limit as usize).await
    }

    /// Latest reading per device type and UTC day since `since`.
    pub async fn daily_telemetry(&self, since: DateTime<Utc>) -> Vec<(String, TelemetryRecord)> {
        if let Some(pool) = &self.pool {
            match TelemetryRepo::daily_latest(pool, since).await {
                Ok(records) => return records,
                Err(e) => warn!(error = %e, "Failed to load daily telemetry, reading fallback storage"),
            }
        }

        self.fallback.daily_telemetry(since).await
    }

    /// Readings of devices of `device_type` since `since`, newest first.
    pub async fn recent_telemetry_by_type(
        &self,
        device_type: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Vec<TelemetryRecord> {
        if let Some(pool) = &self.pool {
            match TelemetryRepo::recent_by_type(pool, device_type, since, limit).await {
                Ok(records) => return records,
                Err(e) => warn!(device_type, error = %e, "Failed to load telemetry by type, reading fallback storage"),
            }
        }

        self.fallback
            .recent_telemetry_by_type(device_type, since, limit as usize)
            .await
    }

    pub async fn recent_activity(&self, limit: u32) -> Vec<ActivityRecord> {
        if let Some(pool) = &self.pool {
            match ActivityRepo::recent(pool, limit).await {
                Ok(records) => return records,
                Err(e) => warn!(error = %e, "Failed to load device activity, reading fallback storage"),
            }
        }

        self.fallback.recent_activity(limit as usize).await
    }

    pub async fn fallback_summary(&self) -> FallbackSummary {
        self.fallback.summary().await
    }
}

/// Pick the more recently updated of the database and fallback documents.
fn newer(stored: Option<DeviceStatus>, local: Option<DeviceStatus>) -> Option<DeviceStatus> {
    match (stored, local) {
        (Some(stored), Some(local)) if local.last_updated > stored.last_updated => Some(local),
        (stored, local) => stored.or(local),
    }
}
