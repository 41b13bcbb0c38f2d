//! Database row types matching the schema in `migrations/0001_init.sql`.
//! Used by sqlx for typed queries; converted to domain types at the store
//! boundary so malformed rows surface as errors instead of panics.

use chrono::{NaiveDate, NaiveDateTime};

use crate::config::RUN_TIMESTAMP_FORMAT;
use crate::error::{AppError, Result};
use crate::types::{Hotel, Run};

#[derive(Debug, sqlx::FromRow)]
pub struct RunRow {
    pub id: i64,
    pub run_timestamp: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct HotelRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PriceRow {
    pub run_id: i64,
    pub hotel_id: i64,
    pub stay_date: String,
    pub price: Option<f64>,
}

impl RunRow {
    pub fn into_run(self) -> Result<Run> {
        let run_timestamp =
            NaiveDateTime::parse_from_str(&self.run_timestamp, RUN_TIMESTAMP_FORMAT).map_err(
                |_| {
                    AppError::Data(format!(
                        "run {} has malformed timestamp {:?}",
                        self.id, self.run_timestamp
                    ))
                },
            )?;
        Ok(Run {
            id: self.id,
            run_timestamp,
            start_date: parse_opt_date(self.id, self.start_date.as_deref())?,
            end_date: parse_opt_date(self.id, self.end_date.as_deref())?,
            note: self.note,
        })
    }
}

impl From<HotelRow> for Hotel {
    fn from(row: HotelRow) -> Self {
        Hotel { id: row.id, name: row.name }
    }
}

pub fn parse_stay_date(run_id: i64, s: &str) -> Result<NaiveDate> {
    s.parse()
        .map_err(|_| AppError::Data(format!("run {run_id} has malformed stay date {s:?}")))
}

fn parse_opt_date(run_id: i64, s: Option<&str>) -> Result<Option<NaiveDate>> {
    s.map(|s| parse_stay_date(run_id, s)).transpose()
}
