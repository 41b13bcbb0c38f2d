//! The spike & delta computation core: turns a time-ordered sequence of runs
//! into a reporting matrix of stay-date rows with per-hotel prices and deltas,
//! row averages, trailing averages, and severity classifications.
//!
//! Everything here is synchronous, pure computation over already-materialized
//! run data — missing values degrade to absent cells, they never raise.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::config::{RunWindow, SpikeThresholds};
use crate::engine::classifier;
use crate::error::{AppError, Result};
use crate::types::{Hotel, Run, SpikeTier};

/// Immutable engine parameters, threaded explicitly through the entry point.
#[derive(Debug, Clone, Copy)]
pub struct EngineParams {
    pub thresholds: SpikeThresholds,
    /// How many of the most recent prior runs feed the trailing average.
    pub lookback_days_avg: usize,
    /// The Δ Avg column compares against run n-k, k = this offset.
    pub avg_prev_offset: usize,
}

impl EngineParams {
    /// Raised before any computation; inconsistent parameters are fatal.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.lookback_days_avg < 1 {
            return Err(AppError::Config("lookback_days_avg must be >= 1".to_string()));
        }
        if self.avg_prev_offset < 1 {
            return Err(AppError::Config("avg_prev_offset must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// One run's observations keyed by (hotel_id, stay_date). A missing key and a
/// stored `None` price mean the same thing: no valid observation.
#[derive(Debug, Clone)]
pub struct RunPrices {
    pub run: Run,
    pub prices: HashMap<(i64, NaiveDate), Option<f64>>,
}

impl RunPrices {
    pub fn price(&self, hotel_id: i64, date: NaiveDate) -> Option<f64> {
        self.prices.get(&(hotel_id, date)).copied().flatten()
    }

    /// Mean of valid hotel prices for one stay date; absent when no hotel has
    /// one (never 0).
    fn row_avg(&self, hotels: &[Hotel], date: NaiveDate) -> Option<f64> {
        let vals: Vec<f64> = hotels.iter().filter_map(|h| self.price(h.id, date)).collect();
        mean(&vals)
    }
}

/// A signed fractional change plus its severity tier. `tier: None` means the
/// magnitude stayed below the lowest threshold.
#[derive(Debug, Clone, Copy)]
pub struct Comparison {
    pub pct: f64,
    pub tier: Option<SpikeTier>,
}

#[derive(Debug, Clone, Copy)]
pub struct HotelCell {
    pub price: Option<f64>,
    /// Change vs the immediately previous run; absent unless both prices are
    /// valid and the previous price is positive.
    pub delta: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DateRow {
    pub stay_date: NaiveDate,
    /// Same order as `ReportMatrix::hotels`.
    pub cells: Vec<HotelCell>,
    pub row_avg: Option<f64>,
    pub trailing_avg: Option<f64>,
    /// Current row average vs the trailing average.
    pub avg_spike: Option<Comparison>,
    /// Current row average vs the row average of run n-k.
    pub delta_vs_prev: Option<Comparison>,
}

#[derive(Debug, Clone)]
pub struct ReportMatrix {
    pub hotels: Vec<Hotel>,
    pub rows: Vec<DateRow>,
    pub current_run: Run,
    /// Rn-1, the reference for per-hotel deltas.
    pub prev_run: Option<Run>,
    /// Rn-k, the reference for the Δ Avg column.
    pub offset_run: Option<Run>,
}

/// Transform time-ordered runs (most recent LAST) into the reporting matrix.
///
/// Rows cover every stay date inside `window` that carries at least one valid
/// observation in any of the supplied runs; dates with no valid data anywhere
/// are omitted, never fabricated.
pub fn build_matrix(
    runs: &[RunPrices],
    hotels: &[Hotel],
    window: RunWindow,
    params: &EngineParams,
) -> Result<ReportMatrix> {
    params.validate()?;

    let (current, prior) = runs
        .split_last()
        .ok_or_else(|| AppError::Data("no runs available to report on".to_string()))?;
    let prev = prior.last();
    let offset_run = prior.len().checked_sub(params.avg_prev_offset).map(|i| &prior[i]);
    let lookback = params.lookback_days_avg.min(prior.len());
    let trailing_runs = &prior[prior.len() - lookback..];

    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
    for run in runs {
        for (&(_, date), price) in &run.prices {
            if price.is_some() {
                dates.insert(date);
            }
        }
    }

    let in_window = |d: &NaiveDate| {
        window.start.is_none_or(|s| *d >= s) && window.end.is_none_or(|e| *d <= e)
    };

    let mut rows = Vec::new();
    for date in dates.into_iter().filter(|d| in_window(d)) {
        let cells: Vec<HotelCell> = hotels
            .iter()
            .map(|h| {
                let price = current.price(h.id, date);
                let delta = prev.and_then(|p| pct_change(price, p.price(h.id, date)));
                HotelCell { price, delta }
            })
            .collect();

        let row_avg = current.row_avg(hotels, date);

        let trailing_vals: Vec<f64> =
            trailing_runs.iter().filter_map(|r| r.row_avg(hotels, date)).collect();
        let trailing_avg = mean(&trailing_vals);

        let avg_spike = compare(row_avg, trailing_avg, &params.thresholds);
        let delta_vs_prev =
            offset_run.and_then(|r| compare(row_avg, r.row_avg(hotels, date), &params.thresholds));

        rows.push(DateRow { stay_date: date, cells, row_avg, trailing_avg, avg_spike, delta_vs_prev });
    }

    Ok(ReportMatrix {
        hotels: hotels.to_vec(),
        rows,
        current_run: current.run.clone(),
        prev_run: prev.map(|p| p.run.clone()),
        offset_run: offset_run.map(|p| p.run.clone()),
    })
}

/// Fractional change of `value` against `reference`. Absent whenever either
/// side is absent or the reference is not a positive price — an absent delta,
/// never an error, an infinity, or a spurious "high" classification.
pub fn pct_change(value: Option<f64>, reference: Option<f64>) -> Option<f64> {
    match (value, reference) {
        (Some(v), Some(r)) if r > 0.0 => Some((v - r) / r),
        _ => None,
    }
}

fn compare(
    value: Option<f64>,
    reference: Option<f64>,
    thresholds: &SpikeThresholds,
) -> Option<Comparison> {
    let pct = pct_change(value, reference)?;
    Some(Comparison { pct, tier: classifier::classify(pct, thresholds) })
}

fn mean(vals: &[f64]) -> Option<f64> {
    if vals.is_empty() {
        None
    } else {
        Some(vals.iter().sum::<f64>() / vals.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpikeTier;

    fn hotels(names: &[&str]) -> Vec<Hotel> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Hotel { id: i as i64 + 1, name: name.to_string() })
            .collect()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn run_prices(id: i64, day: u32, prices: &[(i64, &str, Option<f64>)]) -> RunPrices {
        let run = Run {
            id,
            run_timestamp: format!("2026-08-{day:02}T08:00:00").parse().expect("timestamp"),
            start_date: None,
            end_date: None,
            note: None,
        };
        let prices = prices
            .iter()
            .map(|&(hotel_id, stay, price)| ((hotel_id, date(stay)), price))
            .collect();
        RunPrices { run, prices }
    }

    fn params() -> EngineParams {
        EngineParams {
            thresholds: SpikeThresholds { low: 0.10, medium: 0.20, high: 0.30 },
            lookback_days_avg: 1,
            avg_prev_offset: 1,
        }
    }

    fn open_window() -> RunWindow {
        RunWindow::default()
    }

    #[test]
    fn end_to_end_two_runs_negative_low_spike() {
        // R1: A=100, B=200; R2: A=130 only. Row avg 130, trailing 150,
        // pct = -13.3% → low tier, negative direction.
        let hs = hotels(&["A", "B"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0)), (2, "2026-09-04", Some(200.0))]),
            run_prices(2, 4, &[(1, "2026-09-04", Some(130.0))]),
        ];

        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        assert_eq!(matrix.rows.len(), 1);
        let row = &matrix.rows[0];
        assert_eq!(row.row_avg, Some(130.0));
        assert_eq!(row.trailing_avg, Some(150.0));

        let spike = row.avg_spike.expect("classified");
        assert!((spike.pct - (130.0 - 150.0) / 150.0).abs() < 1e-12);
        assert!(spike.pct < 0.0);
        assert_eq!(spike.tier, Some(SpikeTier::Low));
    }

    #[test]
    fn row_avg_ignores_absent_prices() {
        let hs = hotels(&["A", "B", "C"]);
        let runs = vec![run_prices(
            1,
            1,
            &[
                (1, "2026-09-04", Some(100.0)),
                (2, "2026-09-04", None),
                (3, "2026-09-04", Some(200.0)),
            ],
        )];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        assert_eq!(matrix.rows[0].row_avg, Some(150.0));
    }

    #[test]
    fn row_avg_is_absent_when_no_hotel_has_a_price() {
        let hs = hotels(&["A", "B"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(2, 2, &[(1, "2026-09-04", None), (2, "2026-09-04", None)]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        let row = &matrix.rows[0];
        assert_eq!(row.row_avg, None);
        assert!(row.avg_spike.is_none());
        assert!(row.delta_vs_prev.is_none());
    }

    #[test]
    fn per_hotel_delta_roundtrips() {
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(87.5))]),
            run_prices(2, 2, &[(1, "2026-09-04", Some(113.75))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        let cell = matrix.rows[0].cells[0];
        let delta = cell.delta.expect("delta");
        assert!((87.5 * (1.0 + delta) - 113.75).abs() < 1e-9);
    }

    #[test]
    fn delta_is_absent_for_missing_or_zero_previous_price() {
        let hs = hotels(&["A", "B", "C"]);
        let runs = vec![
            run_prices(
                1,
                1,
                &[(1, "2026-09-04", None), (2, "2026-09-04", Some(0.0)), (3, "2026-09-04", Some(80.0))],
            ),
            run_prices(
                2,
                2,
                &[
                    (1, "2026-09-04", Some(100.0)),
                    (2, "2026-09-04", Some(100.0)),
                    (3, "2026-09-04", Some(100.0)),
                ],
            ),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        let row = &matrix.rows[0];
        assert_eq!(row.cells[0].delta, None, "absent previous price");
        assert_eq!(row.cells[1].delta, None, "zero previous price");
        assert!((row.cells[2].delta.expect("valid delta") - 0.25).abs() < 1e-12);
    }

    #[test]
    fn delta_is_absent_when_current_price_is_missing() {
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(2, 2, &[]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        let row = &matrix.rows[0];
        assert_eq!(row.cells[0].price, None);
        assert_eq!(row.cells[0].delta, None);
    }

    #[test]
    fn trailing_avg_uses_available_runs_when_history_is_short() {
        let mut p = params();
        p.lookback_days_avg = 3;
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(2, 2, &[(1, "2026-09-04", Some(130.0))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &p).expect("matrix");
        assert_eq!(matrix.rows[0].trailing_avg, Some(100.0));
    }

    #[test]
    fn trailing_avg_spans_the_lookback_window_only() {
        let mut p = params();
        p.lookback_days_avg = 2;
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(500.0))]),
            run_prices(2, 2, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(3, 3, &[(1, "2026-09-04", Some(200.0))]),
            run_prices(4, 4, &[(1, "2026-09-04", Some(150.0))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &p).expect("matrix");
        // Only runs 2 and 3 feed the trailing mean; run 1 is outside the window.
        assert_eq!(matrix.rows[0].trailing_avg, Some(150.0));
    }

    #[test]
    fn trailing_avg_absent_without_prior_runs() {
        let hs = hotels(&["A"]);
        let runs = vec![run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))])];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        let row = &matrix.rows[0];
        assert_eq!(row.trailing_avg, None);
        assert!(row.avg_spike.is_none());
        assert!(matrix.prev_run.is_none());
        assert!(matrix.offset_run.is_none());
    }

    #[test]
    fn offset_comparison_targets_run_n_minus_k() {
        let mut p = params();
        p.avg_prev_offset = 2;
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(2, 2, &[(1, "2026-09-04", Some(999.0))]),
            run_prices(3, 3, &[(1, "2026-09-04", Some(125.0))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &p).expect("matrix");
        assert_eq!(matrix.offset_run.as_ref().map(|r| r.id), Some(1));

        let cmp = matrix.rows[0].delta_vs_prev.expect("comparison");
        assert!((cmp.pct - 0.25).abs() < 1e-12);
        assert_eq!(cmp.tier, Some(SpikeTier::Medium));
        // The per-hotel delta still compares against the immediately previous run.
        let delta = matrix.rows[0].cells[0].delta.expect("delta");
        assert!((delta - (125.0 - 999.0) / 999.0).abs() < 1e-12);
    }

    #[test]
    fn offset_comparison_absent_with_insufficient_history() {
        let mut p = params();
        p.avg_prev_offset = 2;
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(2, 2, &[(1, "2026-09-04", Some(130.0))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &p).expect("matrix");
        assert!(matrix.offset_run.is_none());
        assert!(matrix.rows[0].delta_vs_prev.is_none());
    }

    #[test]
    fn window_bounds_filter_rows() {
        let hs = hotels(&["A"]);
        let runs = vec![run_prices(
            1,
            1,
            &[
                (1, "2026-09-01", Some(100.0)),
                (1, "2026-09-05", Some(110.0)),
                (1, "2026-09-09", Some(120.0)),
            ],
        )];
        let window =
            RunWindow { start: Some(date("2026-09-02")), end: Some(date("2026-09-08")) };
        let matrix = build_matrix(&runs, &hs, window, &params()).expect("matrix");
        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].stay_date, date("2026-09-05"));
    }

    #[test]
    fn dates_with_no_valid_data_anywhere_are_omitted() {
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", None)]),
            run_prices(2, 2, &[(1, "2026-09-05", Some(100.0))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].stay_date, date("2026-09-05"));
    }

    #[test]
    fn date_valid_only_in_prior_run_yields_blank_current_row() {
        let hs = hotels(&["A"]);
        let runs = vec![
            run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))]),
            run_prices(2, 2, &[(1, "2026-09-05", Some(110.0))]),
        ];
        let matrix = build_matrix(&runs, &hs, open_window(), &params()).expect("matrix");
        let row = matrix
            .rows
            .iter()
            .find(|r| r.stay_date == date("2026-09-04"))
            .expect("prior-run date kept");
        assert_eq!(row.cells[0].price, None);
        assert_eq!(row.row_avg, None);
        assert_eq!(row.trailing_avg, Some(100.0));
        assert!(row.avg_spike.is_none());
    }

    #[test]
    fn non_ascending_thresholds_fail_before_computation() {
        let mut p = params();
        p.thresholds = SpikeThresholds { low: 0.10, medium: 0.20, high: 0.10 };
        let hs = hotels(&["A"]);
        let runs = vec![run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))])];
        let err = build_matrix(&runs, &hs, open_window(), &p).expect_err("must fail");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn zero_lookback_fails() {
        let mut p = params();
        p.lookback_days_avg = 0;
        let hs = hotels(&["A"]);
        let runs = vec![run_prices(1, 1, &[(1, "2026-09-04", Some(100.0))])];
        assert!(matches!(
            build_matrix(&runs, &hs, open_window(), &p),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn empty_run_sequence_is_a_data_error() {
        let hs = hotels(&["A"]);
        assert!(matches!(
            build_matrix(&[], &hs, open_window(), &params()),
            Err(AppError::Data(_))
        ));
    }

    #[test]
    fn pct_change_guards_its_denominator() {
        assert_eq!(pct_change(Some(100.0), None), None);
        assert_eq!(pct_change(None, Some(100.0)), None);
        assert_eq!(pct_change(Some(100.0), Some(0.0)), None);
        assert_eq!(pct_change(Some(100.0), Some(-5.0)), None);
        let pct = pct_change(Some(110.0), Some(100.0)).expect("valid");
        assert!((pct - 0.10).abs() < 1e-12);
    }
}
