//! Configuration management module
//!
//! Loads settings from environment variables. Database credentials come
//! from `DB_*` variables when `DB_HOST` is set, otherwise from the
//! `[postgresql]` section of an INI file (`database.ini` by default).

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// INI section holding the database credentials
const DB_SECTION: &str = "postgresql";

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value:?}")]
    ParseError { key: String, value: String },

    #[error("Failed to read database config file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: config::ConfigError,
    },
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Telemetry simulator settings
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSettings {
    pub enabled: bool,
    /// Interval in milliseconds between reading batches
    pub interval_ms: u64,
    /// Stop after this many batches; run forever when unset
    pub max_batches: Option<u32>,
}

/// WebSocket relay settings
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastSettings {
    /// Interval in seconds between store polls per WebSocket session
    pub interval_secs: u64,
}

impl BroadcastSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    /// Connection attempts before falling back to in-memory storage
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Upper bound for a single connection attempt
    pub connect_timeout_secs: u64,
}

impl DatabaseSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub simulator: SimulatorSettings,
    pub broadcast: BroadcastSettings,
    pub database: DatabaseSettings,
}

/// Credentials as read from the INI file; any key may be missing
#[derive(Debug, Default, Deserialize)]
struct IniCredentials {
    host: Option<String>,
    port: Option<String>,
    dbname: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let max_batches = match lookup("SIMULATOR_BATCHES") {
            Some(raw) => Some(parse("SIMULATOR_BATCHES", &raw)?),
            None => None,
        };

        let credentials = if lookup("DB_HOST").is_some() {
            info!("Using database credentials from environment variables");
            IniCredentials {
                host: lookup("DB_HOST"),
                port: lookup("DB_PORT"),
                dbname: lookup("DB_NAME"),
                user: lookup("DB_USER"),
                password: lookup("DB_PASSWORD"),
            }
        } else {
            let path = var("DATABASE_CONFIG_FILE", "database.ini");
            read_ini_credentials(Path::new(&path))?
        };

        let db_port = credentials.port.unwrap_or_else(|| "5432".into());

        Ok(Self {
            server: ServerSettings {
                host: var("SERVER_HOST", "0.0.0.0"),
                port: parse("SERVER_PORT", &var("SERVER_PORT", "8080"))?,
            },
            simulator: SimulatorSettings {
                enabled: parse("SIMULATOR_ENABLED", &var("SIMULATOR_ENABLED", "true"))?,
                interval_ms: parse("SIMULATOR_INTERVAL_MS", &var("SIMULATOR_INTERVAL_MS", "2000"))?,
                max_batches,
            },
            broadcast: BroadcastSettings {
                interval_secs: parse(
                    "BROADCAST_INTERVAL_SECS",
                    &var("BROADCAST_INTERVAL_SECS", "10"),
                )?,
            },
            database: DatabaseSettings {
                enabled: parse("DATABASE_ENABLED", &var("DATABASE_ENABLED", "true"))?,
                host: credentials.host.unwrap_or_else(|| "localhost".into()),
                port: parse("DB_PORT", &db_port)?,
                dbname: credentials.dbname.unwrap_or_else(|| "postgres".into()),
                user: credentials.user.unwrap_or_else(|| "postgres".into()),
                password: credentials.password.unwrap_or_default(),
                max_connections: parse("DB_MAX_CONNECTIONS", &var("DB_MAX_CONNECTIONS", "5"))?,
                max_retries: parse("DB_MAX_RETRIES", &var("DB_MAX_RETRIES", "3"))?,
                retry_delay_secs: parse("DB_RETRY_DELAY_SECS", &var("DB_RETRY_DELAY_SECS", "2"))?,
                connect_timeout_secs: parse(
                    "DB_CONNECT_TIMEOUT_SECS",
                    &var("DB_CONNECT_TIMEOUT_SECS", "5"),
                )?,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::ParseError {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

/// Read the `[postgresql]` section of an INI file.
///
/// A missing file or section yields empty credentials so the defaults apply.
fn read_ini_credentials(path: &Path) -> Result<IniCredentials, SettingsError> {
    if !path.is_file() {
        return Ok(IniCredentials::default());
    }

    let to_error = |source| SettingsError::ConfigFile {
        path: path.display().to_string(),
        source,
    };

    let parsed = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Ini))
        .build()
        .map_err(to_error)?;

    let credentials = match parsed.get::<IniCredentials>(DB_SECTION) {
        Ok(credentials) => credentials,
        Err(config::ConfigError::NotFound(_)) => {
            warn!(path = %path.display(), "Section {DB_SECTION} not found in database config file");
            return Ok(IniCredentials::default());
        }
        Err(e) => return Err(to_error(e)),
    };

    let missing: Vec<&str> = [
        ("host", credentials.host.is_none()),
        ("port", credentials.port.is_none()),
        ("dbname", credentials.dbname.is_none()),
        ("user", credentials.user.is_none()),
        ("password", credentials.password.is_none()),
    ]
    .into_iter()
    .filter_map(|(key, absent)| absent.then_some(key))
    .collect();

    if missing.is_empty() {
        info!(path = %path.display(), "Using database configuration from file");
    } else {
        warn!(path = %path.display(), ?missing, "Incomplete database config, using defaults for missing keys");
    }

    Ok(credentials)
}
