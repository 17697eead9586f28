//! In-memory storage used while the database is unavailable.
//!
//! Mirrors the three tables: status documents keyed by device id, plus
//! append-only telemetry and activity logs with sequential ids.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{ActivityRecord, DeviceStatus, StatusLevel, TelemetryRecord};

#[derive(Debug, Default)]
struct Inner {
    device_status: BTreeMap<i32, DeviceStatus>,
    telemetry: Vec<TelemetryRecord>,
    activity: Vec<ActivityRecord>,
}

/// Number of records currently held in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FallbackSummary {
    pub telemetry_records: usize,
    pub device_status_records: usize,
    pub activity_records: usize,
}

/// Cheaply cloneable handle; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct FallbackStore {
    inner: Arc<RwLock<Inner>>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the status document for `device_id`.
    pub async fn upsert_device_status(&self, device_id: i32, status: DeviceStatus) {
        self.inner.write().await.device_status.insert(device_id, status);
    }

    pub async fn device_status(&self, device_id: i32) -> Option<DeviceStatus> {
        self.inner.read().await.device_status.get(&device_id).cloned()
    }

    /// All status documents ordered by device id.
    pub async fn device_statuses(&self) -> Vec<(i32, DeviceStatus)> {
        self.inner
            .read()
            .await
            .device_status
            .iter()
            .map(|(id, status)| (*id, status.clone()))
            .collect()
    }

    pub async fn insert_telemetry(
        &self,
        device_id: i32,
        value: f64,
        unit: &str,
        status: StatusLevel,
        recorded_at: DateTime<Utc>,
    ) -> TelemetryRecord {
        let mut inner = self.inner.write().await;
        let record = TelemetryRecord {
            data_id: inner.telemetry.len() as i64 + 1,
            device_id,
            value,
            unit: unit.to_owned(),
            status,
            recorded_at,
        };
        inner.telemetry.push(record.clone());
        record
    }

    /// Most recent readings of a device, newest first.
    pub async fn recent_telemetry(&self, device_id: i32, limit: usize) -> Vec<TelemetryRecord> {
        self.inner
            .read()
            .await
            .telemetry
            .iter()
            .rev()
            .filter(|r| r.device_id == device_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Latest reading per device type and UTC day since `since`, keyed by
    /// the type of the device that produced it. Readings of devices without a
    /// status document are skipped.
    pub async fn daily_telemetry(&self, since: DateTime<Utc>) -> Vec<(String, TelemetryRecord)> {
        let inner = self.inner.read().await;
        let mut latest: BTreeMap<(String, NaiveDate), &TelemetryRecord> = BTreeMap::new();

        for record in inner.telemetry.iter().filter(|r| r.recorded_at > since) {
            let Some(status) = inner.device_status.get(&record.device_id) else {
                continue;
            };
            let key = (status.device_type.clone(), record.recorded_at.date_naive());
            let is_latest = latest
                .get(&key)
                .map_or(true, |current| current.recorded_at <= record.recorded_at);
            if is_latest {
                latest.insert(key, record);
            }
        }

        latest
            .into_iter()
            .map(|((device_type, _), record)| (device_type, record.clone()))
            .collect()
    }

    /// Readings of devices of `device_type` since `since`, newest first.
    pub async fn recent_telemetry_by_type(
        &self,
        device_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Vec<TelemetryRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<&TelemetryRecord> = inner
            .telemetry
            .iter()
            .filter(|r| r.recorded_at > since)
            .filter(|r| {
                inner
                    .device_status
                    .get(&r.device_id)
                    .is_some_and(|s| s.device_type == device_type)
            })
            .collect();

        records.sort_by(|a, b| (b.recorded_at, b.data_id).cmp(&(a.recorded_at, a.data_id)));
        records.into_iter().take(limit).cloned().collect()
    }

    pub async fn record_activity(&self, device_id: i32, action: &str, status: &str) -> ActivityRecord {
        let mut inner = self.inner.write().await;
        let record = ActivityRecord {
            activity_id: inner.activity.len() as i64 + 1,
            device_id,
            action: action.to_owned(),
            status: status.to_owned(),
            recorded_at: Utc::now(),
        };
        inner.activity.push(record.clone());
        record
    }

    /// Most recent activity across all devices, newest first.
    pub async fn recent_activity(&self, limit: usize) -> Vec<ActivityRecord> {
        self.inner
            .read()
            .await
            .activity
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn summary(&self) -> FallbackSummary {
        let inner = self.inner.read().await;
        FallbackSummary {
            telemetry_records: inner.telemetry.len(),
            device_status_records: inner.device_status.len(),
            activity_records: inner.activity.len(),
        }
    }
}
