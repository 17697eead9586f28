//! Telemetry simulator
//!
//! Stands in for the greenhouse hardware: on every tick it produces one
//! reading per demo device and pushes it through the same ingest pipeline
//! that HTTP-posted readings use. Replacing it with a real device reader
//! does not affect the rest of the system.
//!
//! Values are drawn uniformly from a band somewhat wider than the device's
//! critical limits, so every status shows up regularly on the dashboard.

use futures::future::join_all;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::config::SimulatorSettings;
use crate::ingest::process_reading;
use crate::models::{Reading, StatusLevel};
use crate::state::AppState;

/// A device whose readings are simulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub id: i32,
    pub name: &'static str,
    pub device_type: &'static str,
    pub unit: &'static str,
}

pub const DEVICES: [SimulatedDevice; 3] = [
    SimulatedDevice {
        id: 1,
        name: "Greenhouse Temperature Sensor",
        device_type: "temperature",
        unit: "°C",
    },
    SimulatedDevice {
        id: 2,
        name: "Humidity Monitor",
        device_type: "humidity",
        unit: "%",
    },
    SimulatedDevice {
        id: 3,
        name: "Soil Moisture Sensor",
        device_type: "soil_moisture",
        unit: "%",
    },
];

/// Inclusive range simulated values are drawn from
pub fn value_range(device_type: &str) -> (f64, f64) {
    match device_type {
        "temperature" => (15.0, 32.0),
        "humidity" => (35.0, 85.0),
        "soil_moisture" => (15.0, 70.0),
        _ => (0.0, 100.0),
    }
}

/// Draw a value for `device_type`, rounded to one decimal
pub fn sample_value<R: Rng + ?Sized>(device_type: &str, rng: &mut R) -> f64 {
    let (low, high) = value_range(device_type);
    let value = Uniform::new_inclusive(low, high).sample(rng);
    ((value * 10.0).round() / 10.0).clamp(low, high)
}

/// Periodic reading generator
pub struct TelemetrySimulator {
    /// Interval between batches in milliseconds
    interval_ms: u64,
    max_batches: Option<u32>,
    devices: Vec<SimulatedDevice>,
}

impl TelemetrySimulator {
    pub fn new(settings: &SimulatorSettings) -> Self {
        info!(
            interval_ms = settings.interval_ms,
            max_batches = ?settings.max_batches,
            "Initializing telemetry simulator"
        );

        Self {
            interval_ms: settings.interval_ms,
            max_batches: settings.max_batches,
            devices: DEVICES.to_vec(),
        }
    }

    /// One reading per device
    pub fn batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Reading> {
        self.devices
            .iter()
            .map(|d| {
                Reading::new(
                    d.id,
                    d.name,
                    d.device_type,
                    sample_value(d.device_type, rng),
                    d.unit,
                )
            })
            .collect()
    }

    async fn record_activity(&self, state: &Arc<RwLock<AppState>>, action: &str) {
        let storage = state.read().await.storage().clone();
        join_all(
            self.devices
                .iter()
                .map(|d| storage.record_activity(d.id, action, "Active")),
        )
        .await;
    }

    /// Run until `max_batches` batches have been produced, or forever.
    pub async fn run(self, state: Arc<RwLock<AppState>>) {
        info!("Starting telemetry simulation");

        self.record_activity(&state, "Start Telemetry").await;

        let mut tick_interval = interval(Duration::from_millis(self.interval_ms.max(1)));
        let mut batch_count: u32 = 0;

        loop {
            if self.max_batches.is_some_and(|max| batch_count >= max) {
                break;
            }

            tick_interval.tick().await;
            batch_count += 1;

            // ThreadRng is not Send; keep it out of scope across awaits.
            let readings = self.batch(&mut rand::thread_rng());
            let storage = state.read().await.storage().clone();

            for reading in &readings {
                let outcome = process_reading(&storage, reading).await;

                if outcome.status.status == StatusLevel::Critical {
                    warn!(
                        device_id = reading.device_id,
                        value = reading.value,
                        unit = %reading.unit,
                        "Critical reading simulated"
                    );
                }

                state.write().await.note_reading(outcome.status.last_updated);
            }

            debug!(batch = batch_count, readings = readings.len(), "Simulated batch processed");
        }

        self.record_activity(&state, "End Telemetry").await;

        let storage = state.read().await.storage().clone();
        let summary = storage.fallback_summary().await;
        info!(
            batches = batch_count,
            fallback_telemetry = summary.telemetry_records,
            fallback_device_status = summary.device_status_records,
            fallback_activity = summary.activity_records,
            "Telemetry simulation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(max_batches: Option<u32>) -> SimulatorSettings {
        SimulatorSettings {
            enabled: true,
            interval_ms: 10,
            max_batches,
        }
    }

    #[test]
    fn test_simulator_creation() {
        let simulator = TelemetrySimulator::new(&settings(None));
        assert_eq!(simulator.interval_ms, 10);
        assert_eq!(simulator.devices.len(), 3);
    }

    #[test]
    fn test_sampled_values_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for device_type in ["temperature", "humidity", "soil_moisture", "other"] {
            let (low, high) = value_range(device_type);
            for _ in 0..500 {
                let value = sample_value(device_type, &mut rng);
                assert!(value >= low && value <= high, "{device_type}: {value}");
                assert_eq!((value * 10.0).round() / 10.0, value);
            }
        }
    }

    #[test]
    fn test_batch_has_one_reading_per_device() {
        let simulator = TelemetrySimulator::new(&settings(None));
        let batch = simulator.batch(&mut StdRng::seed_from_u64(1));

        let ids: Vec<i32> = batch.iter().map(|r| r.device_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(batch[0].unit, "°C");
        assert_eq!(batch[2].device_type, "soil_moisture");
    }

    #[tokio::test]
    async fn test_bounded_run_populates_storage() {
        let state = Arc::new(RwLock::new(AppState::new(Storage::fallback_only())));
        let simulator = TelemetrySimulator::new(&settings(Some(2)));

        tokio::time::timeout(Duration::from_secs(5), simulator.run(state.clone()))
            .await
            .expect("simulator did not finish");

        let state = state.read().await;
        assert_eq!(state.total_readings(), 6);

        let storage = state.storage();
        assert_eq!(storage.device_statuses().await.len(), 3);
        assert_eq!(storage.recent_telemetry(1, 10).await.len(), 2);

        let activity = storage.recent_activity(10).await;
        assert_eq!(activity.len(), 6);
        assert!(activity[..3].iter().all(|a| a.action == "End Telemetry"));
        assert!(activity[3..].iter().all(|a| a.action == "Start Telemetry"));
    }
}
