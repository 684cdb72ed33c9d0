//! The offline batch pipeline: GTFS directory in, compressed store out.
//!
//! `stop_times.txt` rows are streamed in file order, routed into one
//! [`Schedule`] per trip pattern, and compressed in a single pass once
//! ingestion finishes. Everything downstream (printing, SQL, snapshots, the
//! delay overlay) reads the resulting [`Store`].

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::gtfs::{self, GtfsError, Service};
use crate::time::{parse_time, TimeError};
use crate::timetable::{Schedule, StopEntry};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gtfs(#[from] GtfsError),

    #[error("trip {trip_id:?}: {source}")]
    Time {
        trip_id: String,
        source: TimeError,
    },

    #[error("stop_times.txt references unknown trip {0:?}")]
    UnknownTrip(String),

    #[error("stop_times.txt references unknown stop {0:?}")]
    UnknownStop(String),

    #[error("trip {trip_id:?} references unknown route {route_id:?}")]
    UnknownRoute { trip_id: String, route_id: String },

    #[error("trip {trip_id:?} references unknown service {service_id:?}")]
    UnknownService {
        trip_id: String,
        service_id: String,
    },

    #[error("stop {stop_id:?} appears twice in trip {trip_id:?}")]
    DuplicateStop { trip_id: String, stop_id: String },
}

/// Identifies one distinct timetable. The headsign doubles as the direction
/// label throughout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub headsign: String,
    pub route_id: String,
    pub service_id: String,
}

/// The finalized output of one batch run: every trip pattern's compressed
/// schedule in first-seen order, plus the service calendar.
#[derive(Debug)]
pub struct Store {
    pub patterns: IndexMap<PatternKey, Schedule>,
    pub services: IndexMap<String, Service>,
}

/// Counts describing how well the batch compressed, dumped as JSON by the
/// CLI.
#[derive(Debug, Serialize)]
pub struct StoreSummary {
    pub patterns: usize,
    pub stop_schedules: usize,
    pub direct: usize,
    pub references: usize,
    pub pieces: usize,
}

impl Store {
    pub fn summary(&self) -> StoreSummary {
        let mut summary = StoreSummary {
            patterns: self.patterns.len(),
            stop_schedules: 0,
            direct: 0,
            references: 0,
            pieces: 0,
        };

        for schedule in self.patterns.values() {
            for (_, entry) in schedule.entries() {
                summary.stop_schedules += 1;
                match entry {
                    StopEntry::Direct(sched) => {
                        summary.direct += 1;
                        summary.pieces += sched.pieces().len();
                    }
                    StopEntry::DiffReference { .. } => summary.references += 1,
                }
            }
        }

        summary
    }
}

/// Runs the whole ingestion pass over a GTFS directory.
///
/// # Errors
///
/// Any referential failure (unknown trip, stop, route, or service id), a
/// repeated stop within one trip, a repeated id within a table, or a
/// malformed arrival time fails the batch; there is no degraded output.
pub fn build_store(dir: &Path) -> Result<Store, PipelineError> {
    let tables = gtfs::load_tables(dir)?;

    for trip in tables.trips.values() {
        if !tables.routes.contains_key(&trip.route_id) {
            return Err(PipelineError::UnknownRoute {
                trip_id: trip.trip_id.clone(),
                route_id: trip.route_id.clone(),
            });
        }
        if !tables.services.contains_key(&trip.service_id) {
            return Err(PipelineError::UnknownService {
                trip_id: trip.trip_id.clone(),
                service_id: trip.service_id.clone(),
            });
        }
    }

    let stop_times = gtfs::read_stop_times(dir)?;
    info!(rows = stop_times.len(), "stop_times loaded");

    let mut patterns: IndexMap<PatternKey, Schedule> = IndexMap::new();
    let mut seen_stops: HashSet<(String, String)> = HashSet::new();

    for row in &stop_times {
        let trip = tables
            .trips
            .get(&row.trip_id)
            .ok_or_else(|| PipelineError::UnknownTrip(row.trip_id.clone()))?;
        if !tables.stops.contains_key(&row.stop_id) {
            return Err(PipelineError::UnknownStop(row.stop_id.clone()));
        }
        if !seen_stops.insert((row.trip_id.clone(), row.stop_id.clone())) {
            return Err(PipelineError::DuplicateStop {
                trip_id: row.trip_id.clone(),
                stop_id: row.stop_id.clone(),
            });
        }

        let arrival = parse_time(&row.arrival_time).map_err(|source| PipelineError::Time {
            trip_id: row.trip_id.clone(),
            source,
        })?;

        let key = PatternKey {
            headsign: trip.trip_headsign.clone(),
            route_id: trip.route_id.clone(),
            service_id: trip.service_id.clone(),
        };
        patterns.entry(key).or_default().add_time(arrival, &row.stop_id);
    }

    for (key, schedule) in patterns.iter_mut() {
        schedule.compress();
        debug!(
            route = %key.route_id,
            direction = %key.headsign,
            service = %key.service_id,
            stops = schedule.len(),
            "pattern compressed"
        );
    }

    let store = Store {
        patterns,
        services: tables.services,
    };
    let summary = store.summary();
    info!(
        patterns = summary.patterns,
        stop_schedules = summary.stop_schedules,
        references = summary.references,
        "store built"
    );

    Ok(store)
}
