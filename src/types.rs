use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Hotel
// ---------------------------------------------------------------------------

/// Static reference entity; API keys live in the config, not here.
#[derive(Debug, Clone, Serialize)]
pub struct Hotel {
    pub id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One timestamped batch of price observations across hotels and stay dates.
/// Runs are ordered by timestamp (id as tiebreak); ordering is the basis for
/// "previous run" and trailing computations.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub run_timestamp: NaiveDateTime,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub note: Option<String>,
}

/// Metadata for a run about to be created. `timestamp: None` means "now".
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub timestamp: Option<NaiveDateTime>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// One (hotel, stay date) price from a single run. `price: None` is the
/// explicit absent marker — excluded from every aggregate, never coerced to 0.
#[derive(Debug, Clone)]
pub struct Observation {
    pub hotel_id: i64,
    pub stay_date: NaiveDate,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub source: ObservationSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    Csv,
    Api,
}

impl std::fmt::Display for ObservationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationSource::Csv => write!(f, "csv"),
            ObservationSource::Api => write!(f, "api"),
        }
    }
}

// ---------------------------------------------------------------------------
// Spike classification
// ---------------------------------------------------------------------------

/// Severity tier for a percentage change, from the ascending config
/// thresholds. Variant order matters: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for SpikeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SpikeTier::Low => "low",
            SpikeTier::Medium => "medium",
            SpikeTier::High => "high",
        };
        write!(f, "{s}")
    }
}
