//! Application state management
//!
//! Central state container owning the storage handle, the registry of
//! connected WebSocket listeners and ingestion counters. Shared as
//! `Arc<RwLock<AppState>>`; clone the storage handle out before awaiting
//! on it so the lock is never held across I/O.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

use crate::storage::Storage;

/// Default interval between store polls per WebSocket session
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

/// Central application state
#[derive(Debug)]
pub struct AppState {
    storage: Storage,
    /// Application start time
    start_time: DateTime<Utc>,
    /// Total readings processed
    total_readings: u64,
    last_reading: Option<DateTime<Utc>>,
    /// Connected WebSocket clients
    connected_clients: Vec<String>,
    broadcast_interval: Duration,
}

impl AppState {
    /// Create new application state
    pub fn new(storage: Storage) -> Self {
        info!(backend = storage.backend(), "Initializing application state");
        Self {
            storage,
            start_time: Utc::now(),
            total_readings: 0,
            last_reading: None,
            connected_clients: Vec::new(),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
        }
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn broadcast_interval(&self) -> Duration {
        self.broadcast_interval
    }

    /// Count a processed reading
    pub fn note_reading(&mut self, at: DateTime<Utc>) {
        self.total_readings += 1;
        self.last_reading = Some(at);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.start_time).num_seconds().max(0) as u64
    }

    /// Get total readings processed
    pub fn total_readings(&self) -> u64 {
        self.total_readings
    }

    /// Get the timestamp of the latest reading
    pub fn last_reading_time(&self) -> Option<DateTime<Utc>> {
        self.last_reading
    }

    /// Register a new WebSocket client
    pub fn add_client(&mut self, client_id: String) {
        info!(client_id = %client_id, "WebSocket client connected");
        self.connected_clients.push(client_id);
    }

    /// Remove a WebSocket client
    pub fn remove_client(&mut self, client_id: &str) {
        info!(client_id = %client_id, "WebSocket client disconnected");
        self.connected_clients.retain(|id| id != client_id);
    }

    /// Get count of connected clients
    pub fn client_count(&self) -> usize {
        self.connected_clients.len()
    }
}
