//! Data models for telemetry readings, device status documents and
//! WebSocket messages.
//!
//! Everything that leaves the process (REST responses, WebSocket frames and
//! the JSONB column of the `device` table) is serialized with camelCase keys
//! so the dashboard can consume the documents unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Indicator color shown by the dashboard for a normal device
pub const NORMAL_COLOR: &str = "#FF9733";

/// Indicator color shown by the dashboard for warning and critical devices
pub const ALERT_COLOR: &str = "#FF3333";

/// Severity of a device reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Normal,
    Warning,
    Critical,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Normal => "normal",
            StatusLevel::Warning => "warning",
            StatusLevel::Critical => "critical",
        }
    }

    /// Dashboard indicator color for this status
    pub fn indicator_color(&self) -> &'static str {
        match self {
            StatusLevel::Normal => NORMAL_COLOR,
            StatusLevel::Warning | StatusLevel::Critical => ALERT_COLOR,
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(StatusLevel::Normal),
            "warning" => Ok(StatusLevel::Warning),
            "critical" => Ok(StatusLevel::Critical),
            other => Err(format!("unknown status level: {other:?}")),
        }
    }
}

/// Six-number band configuration used to classify a reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdProfile {
    pub min: f64,
    pub max: f64,
    pub warning_min: f64,
    pub warning_max: f64,
    pub critical_min: f64,
    pub critical_max: f64,
}

/// Physical placement of a device on the farm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub zone: String,
    pub area: String,
    pub position: String,
}

impl Location {
    pub fn new(zone: &str, area: &str, position: &str) -> Self {
        Self {
            zone: zone.to_owned(),
            area: area.to_owned(),
            position: position.to_owned(),
        }
    }
}

/// Latest known condition of a device.
///
/// Upserted by device id: every reading overwrites the previous document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// `{type}{deviceId:03}`, e.g. `temperature001`
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub model: String,
    pub serial_number: String,
    pub location: Location,
    pub status: StatusLevel,
    pub last_value: f64,
    pub unit: String,
    pub last_updated: DateTime<Utc>,
    pub install_date: String,
    pub threshold: ThresholdProfile,
    /// Reading interval advertised to the dashboard, in seconds
    pub reading_interval: u32,
    /// Simulated, not physically meaningful
    pub battery_level: u8,
    pub firmware_version: String,
    pub indic_color: String,
}

/// A single reading from the simulator or a real device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[validate(range(min = 1, message = "Device id must be a positive integer"))]
    pub device_id: i32,

    #[validate(length(min = 1, max = 100, message = "Device name must be 1-100 characters"))]
    pub device_name: String,

    #[validate(length(min = 1, max = 50, message = "Device type must be 1-50 characters"))]
    pub device_type: String,

    pub value: f64,

    #[validate(length(max = 10, message = "Unit must be at most 10 characters"))]
    pub unit: String,
}

impl Reading {
    pub fn new(device_id: i32, device_name: &str, device_type: &str, value: f64, unit: &str) -> Self {
        Self {
            device_id,
            device_name: device_name.to_owned(),
            device_type: device_type.to_owned(),
            value,
            unit: unit.to_owned(),
        }
    }
}

/// Append-only telemetry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub data_id: i64,
    pub device_id: i32,
    pub value: f64,
    pub unit: String,
    pub status: StatusLevel,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only device activity log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub activity_id: i64,
    pub device_id: i32,
    pub action: String,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

/// Input DTO for recording device activity over HTTP
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInput {
    #[validate(length(min = 1, max = 100, message = "Action must be 1-100 characters"))]
    pub action: String,

    #[validate(length(min = 1, max = 50, message = "Status must be 1-50 characters"))]
    #[serde(default = "default_activity_status")]
    pub status: String,
}

pub fn default_activity_status() -> String {
    "Active".to_owned()
}

/// Control command sent by the dashboard over the WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub device_id: i32,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DeviceCommand {
    /// Action text written to the activity log
    pub fn action(&self) -> String {
        match &self.control_type {
            Some(control) => format!("{} ({})", self.command, control),
            None => self.command.clone(),
        }
    }

    /// Activity status written to the activity log
    pub fn activity_status(&self) -> &'static str {
        if self.enabled {
            "Active"
        } else {
            "Inactive"
        }
    }
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Latest status snapshot of every known device
    StatusUpdate(Vec<DeviceStatus>),
    /// Connection acknowledgment
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Inbound control command
    DeviceCommand(DeviceCommand),
    /// Command was recorded in the activity log
    CommandAck {
        #[serde(rename = "activityId")]
        activity_id: i64,
        #[serde(rename = "deviceId")]
        device_id: i32,
    },
    /// Error message
    Error { message: String },
    /// Heartbeat/ping
    Ping,
    /// Heartbeat/pong response
    Pong,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub storage_backend: String,
    pub connected_clients: usize,
    pub total_readings: u64,
    pub last_reading: Option<DateTime<Utc>>,
}
