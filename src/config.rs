use std::path::Path;

use anyhow::Context;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::db::DB_FILE;
use crate::protocol::DEFAULT_MAX_REQUEST_LEN;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Prompted for on startup when absent.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_max_request_len")]
    pub max_request_len: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_request_len() -> usize {
    DEFAULT_MAX_REQUEST_LEN
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            max_request_len: default_max_request_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    DB_FILE.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// A named value inside the payloads of one device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeteredField {
    pub device_id: String,
    pub field: String,
}

impl MeteredField {
    pub fn new(device_id: &str, field: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_reference_timezone")]
    pub reference_timezone: String,

    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    #[serde(default = "default_fridge_moisture")]
    pub fridge_moisture: Vec<MeteredField>,

    #[serde(default = "default_dishwasher_water")]
    pub dishwasher_water: MeteredField,

    /// Ammeter fields compared by the top consumer query, in tie-break order.
    #[serde(default = "default_consumers")]
    pub consumers: Vec<MeteredField>,

    #[serde(default = "default_voltage")]
    pub voltage: f64,

    /// Time each ammeter reading is assumed to cover.
    #[serde(default = "default_reading_interval_secs")]
    pub reading_interval_secs: u64,
}

fn default_reference_timezone() -> String {
    "America/Los_Angeles".to_string()
}

pub const MAX_WINDOW_HOURS: i64 = 24 * 366 * 100;

fn default_window_hours() -> i64 {
    3
}

fn default_fridge_moisture() -> Vec<MeteredField> {
    vec![MeteredField::new("fridge-1", "Moisture Meter - Fridge 1")]
}

fn default_dishwasher_water() -> MeteredField {
    MeteredField::new("dishwasher", "Water Consumption Sensor")
}

fn default_consumers() -> Vec<MeteredField> {
    vec![
        MeteredField::new("fridge-1", "Ammeter - Fridge 1"),
        MeteredField::new("fridge-2", "Ammeter - Fridge 2"),
        MeteredField::new("dishwasher", "Ammeter - Dishwasher"),
    ]
}

fn default_voltage() -> f64 {
    120.0
}

fn default_reading_interval_secs() -> u64 {
    60
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            reference_timezone: default_reference_timezone(),
            window_hours: default_window_hours(),
            fridge_moisture: default_fridge_moisture(),
            dishwasher_water: default_dishwasher_water(),
            consumers: default_consumers(),
            voltage: default_voltage(),
            reading_interval_secs: default_reading_interval_secs(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::parse(&contents)
                    .with_context(|| format!("Failed to load config file {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let a = &self.analytics;
        a.reference_timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("Unknown reference timezone {:?}", a.reference_timezone))?;
        if !(1..=MAX_WINDOW_HOURS).contains(&a.window_hours) {
            anyhow::bail!(
                "analytics.window_hours must be between 1 and {MAX_WINDOW_HOURS}, got {}",
                a.window_hours
            );
        }
        if a.fridge_moisture.is_empty() {
            anyhow::bail!("analytics.fridge_moisture must name at least one device");
        }
        if a.consumers.is_empty() {
            anyhow::bail!("analytics.consumers must name at least one device");
        }
        if !(a.voltage.is_finite() && a.voltage > 0.0) {
            anyhow::bail!("analytics.voltage must be positive, got {}", a.voltage);
        }
        if self.server.max_request_len == 0 {
            anyhow::bail!("server.max_request_len must be positive");
        }
        Ok(())
    }
}
