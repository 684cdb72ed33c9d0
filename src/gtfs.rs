//! GTFS static table loading.
//!
//! Each table is read with the `csv` crate into an insertion-ordered map
//! keyed by its id column. The feed is assumed well-formed: a repeated id is
//! a data-integrity problem and fails the whole batch.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GtfsError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bad row in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("duplicate id {key:?} in {path}")]
    DuplicateKey { path: PathBuf, key: String },

    #[error("bad date {input:?} in calendar.txt: expected YYYYMMDD")]
    BadDate { input: String },
}

/// Row of `routes.txt`. Only the columns the pipeline consumes are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub route_id: String,
    #[serde(default)]
    pub route_short_name: String,
    #[serde(default)]
    pub route_long_name: String,
}

/// Row of `stops.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: String,
}

/// Row of `trips.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    #[serde(default)]
    pub trip_headsign: String,
}

/// Row of `stop_times.txt`. `arrival_time` stays a string until the pipeline
/// parses it, so a malformed value is reported with its trip context.
#[derive(Debug, Clone, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub arrival_time: String,
    pub stop_sequence: u32,
}

/// Raw row of `calendar.txt`; converted into [`Service`] on load.
#[derive(Debug, Deserialize)]
struct CalendarRow {
    service_id: String,
    monday: u8,
    tuesday: u8,
    wednesday: u8,
    thursday: u8,
    friday: u8,
    saturday: u8,
    sunday: u8,
    start_date: String,
    end_date: String,
}

/// One service's activity window: which weekdays it runs and between which
/// dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub service_id: String,
    /// Monday..Sunday.
    pub weekdays: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Service {
    /// Length of the active date range in days.
    pub fn active_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// 7-bit activity mask, Monday = bit 0 through Sunday = bit 6.
    pub fn weekday_mask(&self) -> u8 {
        self.weekdays
            .iter()
            .enumerate()
            .fold(0, |mask, (i, on)| mask | (u8::from(*on) << i))
    }
}

fn parse_date(input: &str) -> Result<NaiveDate, GtfsError> {
    NaiveDate::parse_from_str(input, "%Y%m%d").map_err(|_| GtfsError::BadDate {
        input: input.to_string(),
    })
}

impl CalendarRow {
    fn into_service(self) -> Result<Service, GtfsError> {
        Ok(Service {
            weekdays: [
                self.monday != 0,
                self.tuesday != 0,
                self.wednesday != 0,
                self.thursday != 0,
                self.friday != 0,
                self.saturday != 0,
                self.sunday != 0,
            ],
            start_date: parse_date(&self.start_date)?,
            end_date: parse_date(&self.end_date)?,
            service_id: self.service_id,
        })
    }
}

/// All id-keyed tables of one feed.
#[derive(Debug)]
pub struct GtfsTables {
    pub routes: IndexMap<String, Route>,
    pub stops: IndexMap<String, Stop>,
    pub trips: IndexMap<String, Trip>,
    pub services: IndexMap<String, Service>,
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, GtfsError> {
    let file = File::open(path).map_err(|source| GtfsError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::Reader::from_reader(file))
}

/// Reads one table into an insertion-ordered map.
///
/// # Errors
///
/// [`GtfsError::DuplicateKey`] when two rows share an id.
fn read_table<T, F>(path: &Path, key: F) -> Result<IndexMap<String, T>, GtfsError>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(&T) -> &str,
{
    let mut reader = open_reader(path)?;
    let mut map = IndexMap::new();

    for row in reader.deserialize() {
        let row: T = row.map_err(|source| GtfsError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let id = key(&row).to_string();
        if map.insert(id.clone(), row).is_some() {
            return Err(GtfsError::DuplicateKey {
                path: path.to_path_buf(),
                key: id,
            });
        }
    }

    Ok(map)
}

/// Loads routes, stops, trips, and calendar from a GTFS directory.
pub fn load_tables(dir: &Path) -> Result<GtfsTables, GtfsError> {
    let routes = read_table(&dir.join("routes.txt"), |r: &Route| &r.route_id)?;
    let stops = read_table(&dir.join("stops.txt"), |s: &Stop| &s.stop_id)?;
    let trips = read_table(&dir.join("trips.txt"), |t: &Trip| &t.trip_id)?;

    let calendar = read_table(&dir.join("calendar.txt"), |c: &CalendarRow| &c.service_id)?;
    let mut services = IndexMap::with_capacity(calendar.len());
    for (service_id, row) in calendar {
        services.insert(service_id, row.into_service()?);
    }

    info!(
        routes = routes.len(),
        stops = stops.len(),
        trips = trips.len(),
        services = services.len(),
        "GTFS tables loaded"
    );

    Ok(GtfsTables {
        routes,
        stops,
        trips,
        services,
    })
}

/// Reads `stop_times.txt` in file order.
pub fn read_stop_times(dir: &Path) -> Result<Vec<StopTime>, GtfsError> {
    let path = dir.join("stop_times.txt");
    let mut reader = open_reader(&path)?;

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.map_err(|source| GtfsError::Csv {
            path: path.clone(),
            source,
        })?);
    }
    Ok(rows)
}
