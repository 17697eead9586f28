//! Threshold classification of device readings
//!
//! Maps a reading onto one of three severity bands using a per-device-type
//! [`ThresholdProfile`], and assembles the [`DeviceStatus`] document that is
//! upserted and broadcast for the device.
//!
//! Everything here is pure apart from the simulated battery level, so it can
//! be called from any task without synchronization.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::{DeviceStatus, Location, Reading, StatusLevel, ThresholdProfile};

pub const TEMPERATURE: ThresholdProfile = ThresholdProfile {
    min: 18.0,
    max: 28.0,
    warning_min: 20.0,
    warning_max: 26.0,
    critical_min: 15.0,
    critical_max: 30.0,
};

pub const HUMIDITY: ThresholdProfile = ThresholdProfile {
    min: 40.0,
    max: 80.0,
    warning_min: 45.0,
    warning_max: 75.0,
    critical_min: 30.0,
    critical_max: 85.0,
};

pub const SOIL_MOISTURE: ThresholdProfile = ThresholdProfile {
    min: 20.0,
    max: 60.0,
    warning_min: 25.0,
    warning_max: 55.0,
    critical_min: 15.0,
    critical_max: 65.0,
};

/// Used for every device type without a dedicated profile
pub const DEFAULT: ThresholdProfile = ThresholdProfile {
    min: 0.0,
    max: 100.0,
    warning_min: 10.0,
    warning_max: 90.0,
    critical_min: 5.0,
    critical_max: 95.0,
};

/// Fixed descriptive metadata carried by every status document
pub mod metadata {
    pub const MODEL: &str = "IOT Farming Sensor v2";
    pub const INSTALL_DATE: &str = "2024-01-15";
    pub const FIRMWARE_VERSION: &str = "2.1.0";
    pub const READING_INTERVAL_SECS: u32 = 5;
}

/// Inclusive range of the simulated battery level
const BATTERY_RANGE: std::ops::RangeInclusive<u8> = 75..=100;

/// Named profiles, in the order they are listed by the API
pub fn profiles() -> [(&'static str, ThresholdProfile); 4] {
    [
        ("temperature", TEMPERATURE),
        ("humidity", HUMIDITY),
        ("soil_moisture", SOIL_MOISTURE),
        ("default", DEFAULT),
    ]
}

/// Select the threshold profile by exact match on the device type
pub fn profile_for(device_type: &str) -> ThresholdProfile {
    match device_type {
        "temperature" => TEMPERATURE,
        "humidity" => HUMIDITY,
        "soil_moisture" => SOIL_MOISTURE,
        _ => DEFAULT,
    }
}

/// Installation location for a device type
pub fn location_for(device_type: &str) -> Location {
    match device_type {
        "temperature" => Location::new("Greenhouse", "North", "Wall"),
        "humidity" => Location::new("Greenhouse", "Center", "Ceiling"),
        "soil_moisture" => Location::new("Field", "East", "Ground"),
        _ => Location::new("Unknown", "Unknown", "Unknown"),
    }
}

/// Classify `value` against the profile for `device_type`.
///
/// Bounds are exclusive: a value equal to a bound belongs to the inner band.
/// `NaN` is reported as [`StatusLevel::Critical`].
pub fn classify(device_type: &str, value: f64) -> (StatusLevel, ThresholdProfile) {
    let profile = profile_for(device_type);
    (level_for(&profile, value), profile)
}

fn level_for(profile: &ThresholdProfile, value: f64) -> StatusLevel {
    if value.is_nan() || value < profile.critical_min || value > profile.critical_max {
        StatusLevel::Critical
    } else if value < profile.warning_min || value > profile.warning_max {
        StatusLevel::Warning
    } else {
        StatusLevel::Normal
    }
}

/// Build the status document for a reading taken at `now`.
pub fn build_status_document(reading: &Reading, now: DateTime<Utc>) -> DeviceStatus {
    build_status_document_with(reading, now, &mut rand::thread_rng())
}

/// Same as [`build_status_document`] with a caller-supplied RNG for the
/// battery level.
pub fn build_status_document_with<R: Rng + ?Sized>(
    reading: &Reading,
    now: DateTime<Utc>,
    rng: &mut R,
) -> DeviceStatus {
    let (status, threshold) = classify(&reading.device_type, reading.value);

    DeviceStatus {
        id: format!("{}{:03}", reading.device_type, reading.device_id),
        name: reading.device_name.clone(),
        device_type: reading.device_type.clone(),
        model: metadata::MODEL.to_owned(),
        serial_number: format!("IOT-2025-{:04}", reading.device_id),
        location: location_for(&reading.device_type),
        status,
        last_value: reading.value,
        unit: reading.unit.clone(),
        last_updated: now,
        install_date: metadata::INSTALL_DATE.to_owned(),
        threshold,
        reading_interval: metadata::READING_INTERVAL_SECS,
        battery_level: rng.gen_range(BATTERY_RANGE),
        firmware_version: metadata::FIRMWARE_VERSION.to_owned(),
        indic_color: status.indicator_color().to_owned(),
    }
}
