use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Rate API endpoint. One request prices a single (hotel, stay date) night.
pub const API_BASE: &str = "https://data.xotelo.com/api/rates";

/// Timestamp layout used everywhere a run timestamp is stored or rendered.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// JSON configuration document. Every field has a serde default so a minimal
/// config (just hotels) works out of the box.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub hotels: Vec<HotelConfig>,
    #[serde(default)]
    pub spike_thresholds: SpikeThresholds,
    #[serde(default = "default_lookback_days_avg")]
    pub lookback_days_avg: usize,
    #[serde(default = "default_avg_prev_offset")]
    pub avg_prev_offset: usize,
    #[serde(default)]
    pub run_window: RunWindow,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotelConfig {
    pub name: String,
    /// Rate API key for this hotel; hotels without a key are still tracked
    /// but contribute absent observations on API fetches.
    #[serde(default)]
    pub key: Option<String>,
}

/// Ascending percentage cutoffs (fractional, e.g. 0.10 = 10%).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SpikeThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self { low: 0.10, medium: 0.20, high: 0.30 }
    }
}

impl SpikeThresholds {
    /// Thresholds must be strictly ascending. The `<` comparisons also reject
    /// NaN values.
    pub fn validate(&self) -> Result<()> {
        if self.low < self.medium && self.medium < self.high {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "spike_thresholds must be strictly ascending: low={} medium={} high={}",
                self.low, self.medium, self.high
            )))
        }
    }
}

/// Stay-date bounds for fetch and report scope. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RunWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default = "default_rooms")]
    pub rooms: u32,
    /// Bounded worker-pool size for the parallel fetch.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            adults: default_adults(),
            rooms: default_rooms(),
            parallelism: default_parallelism(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let cfg: Config = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("malformed config {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// All consistency checks, reported before any computation or store access.
    pub fn validate(&self) -> Result<()> {
        self.spike_thresholds.validate()?;
        if self.lookback_days_avg < 1 {
            return Err(AppError::Config("lookback_days_avg must be >= 1".to_string()));
        }
        if self.avg_prev_offset < 1 {
            return Err(AppError::Config("avg_prev_offset must be >= 1".to_string()));
        }
        if self.fetch.parallelism < 1 {
            return Err(AppError::Config("fetch.parallelism must be >= 1".to_string()));
        }
        if let (Some(start), Some(end)) = (self.run_window.start, self.run_window.end) {
            if end < start {
                return Err(AppError::Config(format!(
                    "run_window.end {end} is before run_window.start {start}"
                )));
            }
        }
        Ok(())
    }
}

fn default_db_path() -> String {
    "pricing.db".to_string()
}

fn default_report_dir() -> String {
    "reports".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lookback_days_avg() -> usize {
    3
}

fn default_avg_prev_offset() -> usize {
    1
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_adults() -> u32 {
    2
}

fn default_rooms() -> u32 {
    1
}

fn default_parallelism() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    10
}
