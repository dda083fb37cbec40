//! Persistent sighting history.
//!
//! Aircraft and sightings land in PostgreSQL behind a connection pool. The
//! in-memory tracker stays authoritative: rows arrive over a bounded channel
//! and write failures are logged, never propagated back into the pipeline.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio::sync::mpsc;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::coverage::{self, CoverageReport, CoverageSample};
use crate::geodesy::{haversine_nm, initial_bearing_deg};

/// One persisted aircraft snapshot.
#[derive(Debug, Clone)]
pub struct SightingRow {
    pub icao: String,
    pub callsign: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub speed: Option<i32>,
    pub heading: Option<i32>,
    pub squawk: Option<String>,
    pub signal_strength: Option<f64>,
    pub seen_at: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS aircraft (
    icao            TEXT PRIMARY KEY,
    callsign        TEXT,
    first_seen      TIMESTAMPTZ NOT NULL,
    last_seen       TIMESTAMPTZ NOT NULL,
    sighting_count  BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS aircraft_last_seen_idx ON aircraft (last_seen);

CREATE TABLE IF NOT EXISTS sightings (
    id              BIGSERIAL PRIMARY KEY,
    icao            TEXT NOT NULL,
    callsign        TEXT,
    latitude        DOUBLE PRECISION,
    longitude       DOUBLE PRECISION,
    altitude        INTEGER,
    speed           INTEGER,
    heading         INTEGER,
    squawk          TEXT,
    signal_strength DOUBLE PRECISION,
    seen_at         TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS sightings_icao_idx ON sightings (icao);
CREATE INDEX IF NOT EXISTS sightings_seen_at_idx ON sightings (seen_at);
CREATE INDEX IF NOT EXISTS sightings_icao_seen_at_idx ON sightings (icao, seen_at);
CREATE INDEX IF NOT EXISTS sightings_position_idx ON sightings (latitude, longitude);
CREATE INDEX IF NOT EXISTS sightings_located_idx
    ON sightings (seen_at, latitude, longitude)
    WHERE latitude IS NOT NULL AND longitude IS NOT NULL;
";

/// Parse a `host=... port=... dbname=...` style connection string.
fn parse_db_config(db_url: &str) -> Config {
    let mut config = Config::new();
    for part in db_url.split_whitespace() {
        if let Some((key, value)) = part.split_once('=') {
            match key {
                "host" => config.host = Some(value.to_string()),
                "port" => config.port = value.parse().ok(),
                "dbname" => config.dbname = Some(value.to_string()),
                "user" => config.user = Some(value.to_string()),
                "password" => config.password = Some(value.to_string()),
                _ => {}
            }
        }
    }
    config
}

/// The history store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct History {
    pool: Pool,
}

impl History {
    /// Connect, verify the connection and make sure the schema exists.
    pub async fn connect(db_url: &str) -> Result<Self> {
        let config = parse_db_config(db_url);
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("building connection pool")?;

        let client = pool.get().await.context("connecting to history database")?;
        client.batch_execute(SCHEMA).await.context("creating history schema")?;
        info!("history store ready");

        Ok(Self { pool })
    }

    /// Upsert the aircraft row. Concurrent writers race between the update
    /// and the insert, so a unique-constraint conflict retries the update.
    pub async fn save_aircraft(
        &self,
        icao: &str,
        callsign: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        for _ in 0..2 {
            let updated = client
                .execute(
                    "UPDATE aircraft SET
                        last_seen = $2,
                        callsign = COALESCE($3, callsign),
                        sighting_count = sighting_count + 1
                     WHERE icao = $1",
                    &[&icao, &seen_at, &callsign],
                )
                .await?;
            if updated > 0 {
                return Ok(());
            }

            match client
                .execute(
                    "INSERT INTO aircraft (icao, callsign, first_seen, last_seen, sighting_count)
                     VALUES ($1, $2, $3, $3, 1)",
                    &[&icao, &callsign, &seen_at],
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub async fn save_sighting(&self, row: &SightingRow) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO sightings
                    (icao, callsign, latitude, longitude, altitude,
                     speed, heading, squawk, signal_strength, seen_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &row.icao,
                    &row.callsign,
                    &row.latitude,
                    &row.longitude,
                    &row.altitude,
                    &row.speed,
                    &row.heading,
                    &row.squawk,
                    &row.signal_strength,
                    &row.seen_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// ICAO addresses seen within the last `hours`, for recovery candidates.
    pub async fn recent_icaos(&self, hours: f64) -> Result<Vec<u32>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT icao FROM aircraft WHERE last_seen > now() - $1 * interval '1 hour'",
                &[&hours],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| u32::from_str_radix(r.get::<_, &str>(0), 16).ok())
            .collect())
    }

    /// Position density grid: (lat, lon) rounded to two decimals with counts,
    /// busiest first.
    pub async fn positions(&self, hours: f64, limit: i64) -> Result<Vec<(f64, f64, i64)>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT round(latitude::numeric, 2)::double precision AS lat,
                        round(longitude::numeric, 2)::double precision AS lon,
                        count(*) AS sightings
                 FROM sightings
                 WHERE seen_at > now() - $1 * interval '1 hour'
                   AND latitude IS NOT NULL AND longitude IS NOT NULL
                 GROUP BY 1, 2
                 ORDER BY sightings DESC
                 LIMIT $2",
                &[&hours, &limit],
            )
            .await?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1), r.get(2))).collect())
    }

    /// Latest sightings for one aircraft, newest first.
    pub async fn aircraft_history(&self, icao: &str, limit: i64) -> Result<Vec<SightingRow>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT icao, callsign, latitude, longitude, altitude,
                        speed, heading, squawk, signal_strength, seen_at
                 FROM sightings
                 WHERE icao = $1
                 ORDER BY seen_at DESC
                 LIMIT $2",
                &[&icao, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| SightingRow {
                icao: r.get(0),
                callsign: r.get(1),
                latitude: r.get(2),
                longitude: r.get(3),
                altitude: r.get(4),
                speed: r.get(5),
                heading: r.get(6),
                squawk: r.get(7),
                signal_strength: r.get(8),
                seen_at: r.get(9),
            })
            .collect())
    }

    /// Sighting counts per hour of day (UTC), busiest first.
    pub async fn busiest_hours(&self, days: f64) -> Result<Vec<(i32, i64)>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT extract(hour FROM seen_at)::int AS hour, count(*) AS sightings
                 FROM sightings
                 WHERE seen_at > now() - $1 * interval '1 day'
                 GROUP BY 1
                 ORDER BY sightings DESC",
                &[&days],
            )
            .await?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    /// Project every located sighting in the window onto the receiver and
    /// fold the result into a coverage report.
    pub async fn coverage_analysis(
        &self,
        rx_lat: f64,
        rx_lon: f64,
        hours: f64,
    ) -> Result<CoverageReport> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT latitude, longitude, altitude, signal_strength
                 FROM sightings
                 WHERE seen_at > now() - $1 * interval '1 hour'
                   AND latitude IS NOT NULL AND longitude IS NOT NULL",
                &[&hours],
            )
            .await?;

        let samples: Vec<CoverageSample> = rows
            .iter()
            .map(|r| {
                let lat: f64 = r.get(0);
                let lon: f64 = r.get(1);
                CoverageSample {
                    distance_nm: haversine_nm(rx_lat, rx_lon, lat, lon),
                    bearing_deg: initial_bearing_deg(rx_lat, rx_lon, lat, lon),
                    altitude_ft: r.get(2),
                    signal: r.get(3),
                }
            })
            .collect();

        Ok(coverage::analyze(&samples))
    }
}

/// Drain sighting rows from the tracker into the store. Errors are logged and
/// the row dropped; persistence never blocks or fails the pipeline.
pub async fn run_writer(history: History, mut rx: mpsc::Receiver<SightingRow>) {
    while let Some(row) = rx.recv().await {
        if let Err(e) = history
            .save_aircraft(&row.icao, row.callsign.as_deref(), row.seen_at)
            .await
        {
            warn!(icao = %row.icao, error = %e, "aircraft upsert failed");
            continue;
        }
        if let Err(e) = history.save_sighting(&row).await {
            warn!(icao = %row.icao, error = %e, "sighting insert failed");
        }
    }
    debug!("history writer drained");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_string() {
        let c = parse_db_config("host=localhost port=5433 dbname=modeswatch user=rx password=s3c");
        assert_eq!(c.host.as_deref(), Some("localhost"));
        assert_eq!(c.port, Some(5433));
        assert_eq!(c.dbname.as_deref(), Some("modeswatch"));
        assert_eq!(c.user.as_deref(), Some("rx"));
        assert_eq!(c.password.as_deref(), Some("s3c"));
    }

    #[test]
    fn ignores_unknown_connection_keys() {
        let c = parse_db_config("host=db sslmode=disable");
        assert_eq!(c.host.as_deref(), Some("db"));
        assert_eq!(c.port, None);
    }
}
