mod config;
mod engine;
mod error;
mod ingest;
mod report;
mod store;
mod types;

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, RUN_TIMESTAMP_FORMAT};
use crate::engine::{build_matrix, EngineParams, RunPrices};
use crate::error::{AppError, Result};
use crate::ingest::csv::{read_price_csv, write_price_csv, PriceCsv};
use crate::ingest::fetch::{date_range, fetch_run};
use crate::report::{rebuild_index, write_report, ReportMeta};
use crate::store::{RunFilter, RunStore};
use crate::types::{Hotel, Observation, ObservationSource, RunMeta};

/// Hotel price run tracker: ingest rate observations into timestamped runs
/// and report percentage spikes against prior runs.
#[derive(Parser)]
#[command(name = "ratewatch", version, about)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Override the database path from the config.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render an HTML report comparing the latest run against prior runs.
    GenerateReport {
        /// Write the report and index somewhere other than the configured report_dir.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Ingest a prices CSV as one new run.
    IngestCsv {
        /// Path to the CSV file (Date column + one column per hotel).
        #[arg(long)]
        csv: PathBuf,
        /// Run window start (YYYY-MM-DD); inferred from the CSV when omitted.
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Run window end (YYYY-MM-DD); inferred from the CSV when omitted.
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Optional note stored with the run.
        #[arg(long)]
        note: Option<String>,
        /// Run timestamp (ISO, e.g. 2026-08-06T09:30:00); defaults to now.
        #[arg(long)]
        timestamp: Option<NaiveDateTime>,
    },
    /// Export one run back to CSV.
    ExportCsv {
        #[arg(long, default_value = "export.csv")]
        out: PathBuf,
        /// Run to export; defaults to the latest.
        #[arg(long)]
        run_id: Option<i64>,
    },
    /// Fetch live rates for all configured hotels and store them as a new run.
    FetchParallel {
        /// Optional note stored with the run.
        #[arg(long)]
        note: Option<String>,
    },
    /// List stored runs, newest first.
    ShowRuns {
        #[arg(long)]
        limit: Option<i64>,
        /// Only runs with timestamp >= this (YYYY-MM-DD or ISO datetime).
        #[arg(long)]
        since: Option<String>,
        /// Only runs with timestamp <= this (YYYY-MM-DD or ISO datetime).
        #[arg(long)]
        until: Option<String>,
        /// Output as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete runs and their observations.
    DeleteRun {
        /// Run ID to delete.
        #[arg(long)]
        run_id: Option<i64>,
        /// Delete the most recent run.
        #[arg(long)]
        latest: bool,
        /// Delete runs with timestamps between the two bounds (YYYY-MM-DD or ISO).
        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        between: Option<Vec<String>>,
    },
    /// Delete all data (prices, runs, hotels) from the database.
    ResetDb {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
        /// Run VACUUM after deletion.
        #[arg(long)]
        vacuum: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cli, cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut cfg: Config) -> Result<()> {
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }

    match cli.command {
        Command::GenerateReport { out_dir } => generate_report(&cfg, out_dir).await,
        Command::IngestCsv { csv, start, end, note, timestamp } => {
            ingest_csv(&cfg, &csv, start, end, note, timestamp).await
        }
        Command::ExportCsv { out, run_id } => export_csv(&cfg, &out, run_id).await,
        Command::FetchParallel { note } => fetch_parallel(&cfg, note).await,
        Command::ShowRuns { limit, since, until, json } => {
            show_runs(&cfg, limit, since, until, json).await
        }
        Command::DeleteRun { run_id, latest, between } => {
            delete_run(&cfg, run_id, latest, between).await
        }
        Command::ResetDb { yes, vacuum } => reset_db(&cfg, yes, vacuum).await,
    }
}

/// Hotel column order: config order first, then any store-only hotels by name.
async fn ordered_hotels(cfg: &Config, store: &RunStore) -> Result<Vec<Hotel>> {
    let db_hotels = store.hotels().await?;
    let mut ordered: Vec<Hotel> = Vec::new();
    for hc in &cfg.hotels {
        if let Some(h) = db_hotels.iter().find(|h| h.name == hc.name) {
            ordered.push(h.clone());
        }
    }
    for h in &db_hotels {
        if !ordered.iter().any(|o| o.id == h.id) {
            ordered.push(h.clone());
        }
    }
    Ok(ordered)
}

async fn generate_report(cfg: &Config, out_dir: Option<PathBuf>) -> Result<()> {
    let params = EngineParams {
        thresholds: cfg.spike_thresholds,
        lookback_days_avg: cfg.lookback_days_avg,
        avg_prev_offset: cfg.avg_prev_offset,
    };
    params.validate()?;

    let store = RunStore::open(&cfg.db_path).await?;
    let needed = cfg.lookback_days_avg.max(cfg.avg_prev_offset) + 1;
    let filter = RunFilter { limit: Some(needed as i64), ..Default::default() };
    let mut runs = store.list_runs(&filter).await?;
    if runs.is_empty() {
        return Err(AppError::Data("no runs found in the database; ingest data first".to_string()));
    }
    runs.reverse(); // engine wants oldest first, current run last

    let hotels = ordered_hotels(cfg, &store).await?;
    let run_ids: Vec<i64> = runs.iter().map(|r| r.id).collect();
    let mut by_run = store.observations_for_runs(&run_ids).await?;
    let run_prices: Vec<RunPrices> = runs
        .into_iter()
        .map(|run| {
            let prices = by_run.remove(&run.id).unwrap_or_default();
            RunPrices { run, prices }
        })
        .collect();

    let matrix = build_matrix(&run_prices, &hotels, cfg.run_window, &params)?;
    let meta = ReportMeta {
        generated_at: Utc::now().naive_utc(),
        window: cfg.run_window,
        lookback_days_avg: cfg.lookback_days_avg,
        avg_prev_offset: cfg.avg_prev_offset,
        thresholds: cfg.spike_thresholds,
    };

    let report_dir = out_dir.unwrap_or_else(|| PathBuf::from(&cfg.report_dir));
    let report_path = write_report(&report_dir, &matrix, &meta)?;
    let index_path = rebuild_index(&report_dir)?;
    info!(
        "Report written to {} ({} date rows); index at {}",
        report_path.display(),
        matrix.rows.len(),
        index_path.display()
    );
    Ok(())
}

async fn ingest_csv(
    cfg: &Config,
    csv_path: &Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    note: Option<String>,
    timestamp: Option<NaiveDateTime>,
) -> Result<()> {
    let text = std::fs::read_to_string(csv_path)?;
    let csv = read_price_csv(&text)?;

    let store = RunStore::open(&cfg.db_path).await?;
    let mut names: Vec<String> = cfg.hotels.iter().map(|h| h.name.clone()).collect();
    for name in &csv.hotel_names {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    let hotel_ids = store.ensure_hotels(&names).await?;

    let currency = Some(cfg.fetch.currency.clone());
    let mut observations = Vec::new();
    for (date, prices) in &csv.rows {
        for (name, price) in csv.hotel_names.iter().zip(prices) {
            let Some(&hotel_id) = hotel_ids.get(name) else { continue };
            observations.push(Observation {
                hotel_id,
                stay_date: *date,
                price: *price,
                currency: currency.clone(),
                source: ObservationSource::Csv,
            });
        }
    }

    let meta = RunMeta {
        timestamp,
        start_date: start.or_else(|| csv.min_date()),
        end_date: end.or_else(|| csv.max_date()),
        note,
    };
    let run_id = store.create_run(&meta, &observations).await?;
    info!(
        "Ingested run {run_id} from {} ({} observations) into {}",
        csv_path.display(),
        observations.len(),
        cfg.db_path
    );
    Ok(())
}

async fn export_csv(cfg: &Config, out: &Path, run_id: Option<i64>) -> Result<()> {
    let store = RunStore::open(&cfg.db_path).await?;
    let run = match run_id {
        Some(id) => store
            .run(id)
            .await?
            .ok_or_else(|| AppError::Data(format!("run {id} not found")))?,
        None => store
            .latest_run()
            .await?
            .ok_or_else(|| AppError::Data("no runs found to export".to_string()))?,
    };

    let hotels = ordered_hotels(cfg, &store).await?;
    let by_run = store.observations_for_runs(&[run.id]).await?;
    let prices = by_run.get(&run.id).cloned().unwrap_or_default();

    // Date span: the run's declared window, else the observed min/max.
    let start = run.start_date.or_else(|| prices.keys().map(|&(_, d)| d).min());
    let end = run.end_date.or_else(|| prices.keys().map(|&(_, d)| d).max());
    let (Some(start), Some(end)) = (start, end) else {
        return Err(AppError::Data(format!("run {} has no observations to export", run.id)));
    };

    let rows = date_range(start, end)
        .into_iter()
        .map(|date| {
            let row = hotels.iter().map(|h| prices.get(&(h.id, date)).copied().flatten()).collect();
            (date, row)
        })
        .collect();
    let csv = PriceCsv { hotel_names: hotels.iter().map(|h| h.name.clone()).collect(), rows };

    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(out, write_price_csv(&csv))?;
    info!("Exported run {} to {}", run.id, out.display());
    Ok(())
}

async fn fetch_parallel(cfg: &Config, note: Option<String>) -> Result<()> {
    if cfg.hotels.is_empty() {
        return Err(AppError::Config("no hotels configured; nothing to fetch".to_string()));
    }

    let store = RunStore::open(&cfg.db_path).await?;
    let names: Vec<String> = cfg.hotels.iter().map(|h| h.name.clone()).collect();
    let hotel_ids = store.ensure_hotels(&names).await?;

    let (observations, stats) = fetch_run(cfg, &hotel_ids).await?;
    let meta = RunMeta {
        timestamp: None,
        start_date: cfg.run_window.start,
        end_date: cfg.run_window.end,
        note: note.or_else(|| Some("api fetch".to_string())),
    };
    let run_id = store.create_run(&meta, &observations).await?;
    info!(
        "Stored run {run_id}: {} rates fetched, {} absent, {} tasks",
        stats.fetched, stats.failed, stats.tasks
    );
    Ok(())
}

async fn show_runs(
    cfg: &Config,
    limit: Option<i64>,
    since: Option<String>,
    until: Option<String>,
    json: bool,
) -> Result<()> {
    let store = RunStore::open(&cfg.db_path).await?;
    let filter = RunFilter {
        since: since.as_deref().map(|s| parse_time_bound(s, false)).transpose()?,
        until: until.as_deref().map(|s| parse_time_bound(s, true)).transpose()?,
        limit,
    };
    let runs = store.list_runs(&filter).await?;
    let run_ids: Vec<i64> = runs.iter().map(|r| r.id).collect();
    let counts = store.price_counts(&run_ids).await?;

    if json {
        let data: Vec<serde_json::Value> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "run_timestamp": r.run_timestamp.format(RUN_TIMESTAMP_FORMAT).to_string(),
                    "start_date": r.start_date,
                    "end_date": r.end_date,
                    "note": r.note,
                    "price_rows": counts.get(&r.id).copied().unwrap_or(0),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }
    let header =
        format!("{:>5}  {:<19}  {:<10}  {:<10}  {:>6}  Note", "ID", "Timestamp", "Start", "End", "Prices");
    println!("{header}");
    println!("{}", "-".repeat(header.len()));
    for r in &runs {
        let ts = r.run_timestamp.format(RUN_TIMESTAMP_FORMAT).to_string();
        let start = r.start_date.map(|d| d.to_string()).unwrap_or_default();
        let end = r.end_date.map(|d| d.to_string()).unwrap_or_default();
        let count = counts.get(&r.id).copied().unwrap_or(0);
        let note = r.note.as_deref().unwrap_or("");
        println!("{:>5}  {ts:<19}  {start:<10}  {end:<10}  {count:>6}  {note}", r.id);
    }
    Ok(())
}

async fn delete_run(
    cfg: &Config,
    run_id: Option<i64>,
    latest: bool,
    between: Option<Vec<String>>,
) -> Result<()> {
    let selectors = usize::from(run_id.is_some()) + usize::from(latest) + usize::from(between.is_some());
    if selectors != 1 {
        return Err(AppError::Config(
            "pass exactly one of --run-id, --latest, --between".to_string(),
        ));
    }

    let store = RunStore::open(&cfg.db_path).await?;
    let ids: Vec<i64> = if let Some(id) = run_id {
        vec![id]
    } else if latest {
        match store.latest_run().await? {
            Some(run) => vec![run.id],
            None => {
                println!("No runs found.");
                return Ok(());
            }
        }
    } else {
        let bounds = between.unwrap_or_default();
        if bounds.len() != 2 {
            return Err(AppError::Config("--between requires START and END".to_string()));
        }
        let since = parse_time_bound(&bounds[0], false)?;
        let until = parse_time_bound(&bounds[1], true)?;
        store.runs_between(since, until).await?
    };

    if ids.is_empty() {
        println!("No matching runs; nothing deleted.");
        return Ok(());
    }
    let (runs_deleted, prices_deleted) = store.delete_runs(&ids).await?;
    info!("Deleted {runs_deleted} runs and {prices_deleted} price rows");
    Ok(())
}

async fn reset_db(cfg: &Config, yes: bool, vacuum: bool) -> Result<()> {
    if !yes {
        println!(
            "About to DELETE ALL DATA from {} (tables: prices, runs, hotels). This cannot be undone.",
            cfg.db_path
        );
        print!("Type 'yes' to confirm: ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        if !line.trim().eq_ignore_ascii_case("yes") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let store = RunStore::open(&cfg.db_path).await?;
    let counts = store.reset(vacuum).await?;
    info!(
        "DB reset complete. Deleted: prices={} runs={} hotels={}",
        counts.prices, counts.runs, counts.hotels
    );
    Ok(())
}

/// Accept `YYYY-MM-DD` or a full ISO datetime. Date-only bounds expand to the
/// start or end of that day depending on which side of the range they sit on.
fn parse_time_bound(s: &str, end_of_day: bool) -> Result<NaiveDateTime> {
    if let Ok(dt) = s.parse::<NaiveDateTime>() {
        return Ok(dt);
    }
    let date: NaiveDate = s.parse().map_err(|_| {
        AppError::Config(format!("invalid timestamp bound {s:?} (want YYYY-MM-DD or ISO datetime)"))
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
            .ok_or_else(|| AppError::Config("invalid end-of-day time".to_string()))?
    } else {
        NaiveTime::MIN
    };
    Ok(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_bounds_expand_date_only_values() {
        let since = parse_time_bound("2026-08-02", false).expect("since");
        assert_eq!(since, "2026-08-02T00:00:00".parse::<NaiveDateTime>().expect("dt"));
        let until = parse_time_bound("2026-08-02", true).expect("until");
        assert_eq!(until, "2026-08-02T23:59:59".parse::<NaiveDateTime>().expect("dt"));
        let exact = parse_time_bound("2026-08-02T10:30:00", true).expect("exact");
        assert_eq!(exact, "2026-08-02T10:30:00".parse::<NaiveDateTime>().expect("dt"));
        assert!(parse_time_bound("yesterday", false).is_err());
    }
}
