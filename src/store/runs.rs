use std::collections::HashMap;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::config::RUN_TIMESTAMP_FORMAT;
use crate::error::Result;
use crate::store::models::{parse_stay_date, HotelRow, PriceRow, RunRow};
use crate::types::{Hotel, Observation, Run, RunMeta};

/// Timestamp-bound filter for run listings. `None` fields are open bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFilter {
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResetCounts {
    pub prices: i64,
    pub runs: i64,
    pub hotels: i64,
}

/// Persistence wrapper around the runs/hotels/prices schema. Runs and their
/// observations are written once, in a single transaction, and only ever
/// deleted as whole runs.
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    pub async fn open(db_path: &str) -> Result<Self> {
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert any missing hotel rows and return the full name → id mapping.
    pub async fn ensure_hotels(&self, names: &[String]) -> Result<HashMap<String, i64>> {
        let mut tx = self.pool.begin().await?;
        for name in names {
            sqlx::query("INSERT OR IGNORE INTO hotels(name) VALUES (?)")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let rows: Vec<HotelRow> = sqlx::query_as("SELECT id, name FROM hotels")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.name, r.id)).collect())
    }

    /// All hotels, alphabetical.
    pub async fn hotels(&self) -> Result<Vec<Hotel>> {
        let rows: Vec<HotelRow> = sqlx::query_as("SELECT id, name FROM hotels ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Hotel::from).collect())
    }

    /// Create a run with its full observation set in one transaction. A crash
    /// mid-write leaves no partially-populated run visible to readers.
    pub async fn create_run(&self, meta: &RunMeta, observations: &[Observation]) -> Result<i64> {
        let ts = meta.timestamp.unwrap_or_else(|| Utc::now().naive_utc());
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "INSERT INTO runs(run_timestamp, start_date, end_date, note) VALUES (?, ?, ?, ?)",
        )
        .bind(ts.format(RUN_TIMESTAMP_FORMAT).to_string())
        .bind(meta.start_date.map(|d| d.to_string()))
        .bind(meta.end_date.map(|d| d.to_string()))
        .bind(meta.note.as_deref())
        .execute(&mut *tx)
        .await?;
        let run_id = res.last_insert_rowid();

        for obs in observations {
            sqlx::query(
                "INSERT OR REPLACE INTO prices(run_id, hotel_id, stay_date, currency, price, source) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(obs.hotel_id)
            .bind(obs.stay_date.to_string())
            .bind(obs.currency.as_deref())
            .bind(obs.price)
            .bind(obs.source.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(run_id)
    }

    /// Runs newest first, optionally bounded by timestamp and count.
    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, run_timestamp, start_date, end_date, note FROM runs WHERE 1=1",
        );
        if let Some(since) = filter.since {
            qb.push(" AND datetime(run_timestamp) >= datetime(");
            qb.push_bind(since.format(RUN_TIMESTAMP_FORMAT).to_string());
            qb.push(")");
        }
        if let Some(until) = filter.until {
            qb.push(" AND datetime(run_timestamp) <= datetime(");
            qb.push_bind(until.format(RUN_TIMESTAMP_FORMAT).to_string());
            qb.push(")");
        }
        qb.push(" ORDER BY datetime(run_timestamp) DESC, id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }

        let rows: Vec<RunRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    pub async fn run(&self, id: i64) -> Result<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT id, run_timestamp, start_date, end_date, note FROM runs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RunRow::into_run).transpose()
    }

    pub async fn latest_run(&self) -> Result<Option<Run>> {
        let filter = RunFilter { limit: Some(1), ..Default::default() };
        Ok(self.list_runs(&filter).await?.pop())
    }

    /// Observation maps for a set of runs: run_id → (hotel_id, stay_date) → price.
    /// A `None` value is a stored absent observation.
    pub async fn observations_for_runs(
        &self,
        run_ids: &[i64],
    ) -> Result<HashMap<i64, HashMap<(i64, NaiveDate), Option<f64>>>> {
        let mut out: HashMap<i64, HashMap<(i64, NaiveDate), Option<f64>>> = HashMap::new();
        if run_ids.is_empty() {
            return Ok(out);
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT run_id, hotel_id, stay_date, price FROM prices WHERE run_id IN (");
        let mut sep = qb.separated(", ");
        for id in run_ids {
            sep.push_bind(*id);
        }
        qb.push(")");

        let rows: Vec<PriceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        for row in rows {
            let date = parse_stay_date(row.run_id, &row.stay_date)?;
            out.entry(row.run_id)
                .or_default()
                .insert((row.hotel_id, date), row.price);
        }
        Ok(out)
    }

    /// Observation row counts per run, for listings.
    pub async fn price_counts(&self, run_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        if run_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT run_id, COUNT(*) FROM prices WHERE run_id IN (");
        let mut sep = qb.separated(", ");
        for id in run_ids {
            sep.push_bind(*id);
        }
        qb.push(") GROUP BY run_id");

        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    /// Ids of runs whose timestamp falls inside the inclusive bounds, oldest first.
    pub async fn runs_between(
        &self,
        since: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM runs \
             WHERE datetime(run_timestamp) BETWEEN datetime(?) AND datetime(?) \
             ORDER BY datetime(run_timestamp), id",
        )
        .bind(since.format(RUN_TIMESTAMP_FORMAT).to_string())
        .bind(until.format(RUN_TIMESTAMP_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Delete runs and their observations together. Prices are removed
    /// explicitly in the same transaction rather than relying on the cascade
    /// pragma being enabled. Returns (runs_deleted, prices_deleted).
    pub async fn delete_runs(&self, run_ids: &[i64]) -> Result<(u64, u64)> {
        if run_ids.is_empty() {
            return Ok((0, 0));
        }
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM prices WHERE run_id IN (");
        let mut sep = qb.separated(", ");
        for id in run_ids {
            sep.push_bind(*id);
        }
        qb.push(")");
        let prices_deleted = qb.build().execute(&mut *tx).await?.rows_affected();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM runs WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in run_ids {
            sep.push_bind(*id);
        }
        qb.push(")");
        let runs_deleted = qb.build().execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;
        Ok((runs_deleted, prices_deleted))
    }

    /// Wipe all data. VACUUM runs outside the transaction (SQLite refuses it
    /// inside one).
    pub async fn reset(&self, vacuum: bool) -> Result<ResetCounts> {
        let counts = ResetCounts {
            prices: self.count("prices").await?,
            runs: self.count("runs").await?,
            hotels: self.count("hotels").await?,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM prices").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM runs").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM hotels").execute(&mut *tx).await?;
        tx.commit().await?;

        if vacuum {
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }
        Ok(counts)
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
