//! Reading ingestion: classify, upsert the device status document, append
//! the telemetry value.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::classifier::build_status_document;
use crate::models::{DeviceStatus, Reading, TelemetryRecord};
use crate::storage::{Storage, WriteTarget};

/// Result of ingesting one reading
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub status: DeviceStatus,
    pub telemetry: TelemetryRecord,
    /// Backend that accepted the status document
    pub stored_in: WriteTarget,
}

/// Run a reading through the classifier and persist the results.
///
/// The status document is written before the telemetry row so the device
/// exists by the time its first value is stored.
pub async fn process_reading(storage: &Storage, reading: &Reading) -> IngestOutcome {
    let now = Utc::now();
    let status = build_status_document(reading, now);

    let stored_in = storage
        .upsert_device_status(reading.device_id, &reading.device_name, &status)
        .await;

    let (telemetry, _) = storage
        .insert_telemetry(reading.device_id, reading.value, &reading.unit, status.status, now)
        .await;

    info!(
        device_id = reading.device_id,
        device_type = %reading.device_type,
        value = reading.value,
        unit = %reading.unit,
        status = %status.status,
        data_id = telemetry.data_id,
        "Reading processed"
    );

    IngestOutcome {
        status,
        telemetry,
        stored_in,
    }
}
