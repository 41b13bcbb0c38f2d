//! Parallel rate fetch: one request per (hotel, stay date) over the configured
//! window, executed through a bounded worker pool. Individual failures are
//! isolated — a hotel that errors contributes an absent observation for that
//! date, never a failed run.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{Config, FetchConfig, API_BASE};
use crate::error::{AppError, Result};
use crate::types::{Observation, ObservationSource};

#[derive(Debug, Default)]
pub struct FetchStats {
    pub dates: usize,
    pub hotels: usize,
    pub tasks: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// Inclusive day range; empty when `end < start`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Extract the first offered rate from an API payload. `None` covers error
/// responses and structurally unusable payloads alike.
pub fn parse_rate_response(v: &serde_json::Value) -> Option<f64> {
    if !v.get("error").is_none_or(|e| e.is_null()) {
        return None;
    }
    v.get("result")?
        .get("rates")?
        .as_array()?
        .first()?
        .get("rate")
        .and_then(|r| r.as_f64().or_else(|| r.as_str().and_then(|s| s.parse().ok())))
}

async fn fetch_rate(
    client: &reqwest::Client,
    hotel_key: &str,
    stay_date: NaiveDate,
    fetch: &FetchConfig,
) -> Option<f64> {
    let chk_out = stay_date.succ_opt()?;
    let resp = client
        .get(API_BASE)
        .query(&[
            ("hotel_key", hotel_key.to_string()),
            ("chk_in", stay_date.to_string()),
            ("chk_out", chk_out.to_string()),
            ("currency", fetch.currency.clone()),
            ("adults", fetch.adults.to_string()),
            ("rooms", fetch.rooms.to_string()),
        ])
        .send()
        .await;

    let value: serde_json::Value = match resp {
        Ok(r) => match r.json().await {
            Ok(v) => v,
            Err(e) => {
                debug!("rate payload parse failed for {hotel_key} {stay_date}: {e}");
                return None;
            }
        },
        Err(e) => {
            debug!("rate fetch failed for {hotel_key} {stay_date}: {e}");
            return None;
        }
    };
    parse_rate_response(&value)
}

/// Fetch the whole (hotel × stay date) grid and return one observation per
/// cell. Results are drained into a single collector; concurrency is bounded
/// by `fetch.parallelism`.
pub async fn fetch_run(
    cfg: &Config,
    hotel_ids: &HashMap<String, i64>,
) -> Result<(Vec<Observation>, FetchStats)> {
    let (start, end) = match (cfg.run_window.start, cfg.run_window.end) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(AppError::Config(
                "run_window.start and run_window.end must be configured for fetch".to_string(),
            ))
        }
    };
    let dates = date_range(start, end);

    let currency = Some(cfg.fetch.currency.clone());
    let mut observations: Vec<Observation> = Vec::new();
    let mut tasks: Vec<(i64, String, NaiveDate)> = Vec::new();
    let mut keyed_hotels = 0usize;

    for hotel in &cfg.hotels {
        let Some(&hotel_id) = hotel_ids.get(&hotel.name) else {
            continue;
        };
        match &hotel.key {
            Some(key) => {
                keyed_hotels += 1;
                for date in &dates {
                    tasks.push((hotel_id, key.clone(), *date));
                }
            }
            None => {
                // No API key: the hotel still gets explicit absent cells.
                warn!("hotel {:?} has no API key; recording absent prices", hotel.name);
                for date in &dates {
                    observations.push(Observation {
                        hotel_id,
                        stay_date: *date,
                        price: None,
                        currency: currency.clone(),
                        source: ObservationSource::Api,
                    });
                }
            }
        }
    }

    let mut stats = FetchStats {
        dates: dates.len(),
        hotels: cfg.hotels.len(),
        tasks: tasks.len(),
        ..Default::default()
    };
    info!(
        "Starting parallel fetch: dates={} hotels={} tasks={} pool={}",
        stats.dates, stats.hotels, stats.tasks, cfg.fetch.parallelism
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.fetch.timeout_secs))
        .build()?;

    let mut results = stream::iter(tasks.into_iter().map(|(hotel_id, key, date)| {
        let client = client.clone();
        let fetch_cfg = cfg.fetch.clone();
        async move {
            let price = fetch_rate(&client, &key, date, &fetch_cfg).await;
            (hotel_id, date, price)
        }
    }))
    .buffer_unordered(cfg.fetch.parallelism);

    // Progress is reported by stay date: a date counts as done once every
    // keyed hotel has been processed for it.
    let mut per_date_done: HashMap<NaiveDate, usize> = HashMap::new();
    let mut dates_done = 0usize;

    while let Some((hotel_id, date, price)) = results.next().await {
        match price {
            Some(_) => stats.fetched += 1,
            None => stats.failed += 1,
        }
        observations.push(Observation {
            hotel_id,
            stay_date: date,
            price,
            currency: currency.clone(),
            source: ObservationSource::Api,
        });

        let done = per_date_done.entry(date).or_insert(0);
        *done += 1;
        if *done == keyed_hotels {
            dates_done += 1;
            let pct = if stats.dates > 0 { dates_done * 100 / stats.dates } else { 100 };
            info!("Completed {date}: {dates_done}/{} dates ({pct}%)", stats.dates);
        }
    }

    Ok((observations, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn date_range_is_inclusive() {
        let start: NaiveDate = "2026-08-10".parse().expect("date");
        let end: NaiveDate = "2026-08-12".parse().expect("date");
        let days = date_range(start, end);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], start);
        assert_eq!(days[2], end);
        assert_eq!(date_range(start, start).len(), 1);
        assert!(date_range(end, start).is_empty());
    }

    #[test]
    fn rate_payload_happy_path() {
        let v = json!({"error": null, "result": {"rates": [{"rate": 120.5}, {"rate": 130.0}]}});
        assert_eq!(parse_rate_response(&v), Some(120.5));
        // The error key may be missing entirely.
        let v = json!({"result": {"rates": [{"rate": "99.5"}]}});
        assert_eq!(parse_rate_response(&v), Some(99.5));
    }

    #[test]
    fn rate_payload_failures_are_absent() {
        for v in [
            json!({"error": "invalid key"}),
            json!({"error": null, "result": {"rates": []}}),
            json!({"error": null, "result": {}}),
            json!({"error": null}),
            json!({"error": null, "result": {"rates": [{"rate": "not a number"}]}}),
            json!([]),
        ] {
            assert_eq!(parse_rate_response(&v), None, "payload {v}");
        }
    }
}
