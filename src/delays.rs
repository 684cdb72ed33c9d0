//! Realtime delay overlay.
//!
//! Reads a GTFS-Realtime feed, pulls per-trip delays out of its TripUpdate
//! entities, and adjusts the arrivals stored in a snapshot. This layer only
//! ever reads the finalized schedule data; the batch pipeline never sees it.

use std::collections::HashMap;
use std::fs;

use anyhow::Result;
use indexmap::IndexMap;
use prost::Message;
use tracing::{debug, info};

use crate::canonical::CanonicalEntry;
use crate::gtfs::Trip;
use crate::gtfs_rt::FeedMessage;

/// One stop_time_update worth of delay information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopDelay {
    pub stop_sequence: u32,
    pub stop_id: String,
    pub delay_seconds: i32,
}

/// An arrival at the queried stop with its realtime adjustment applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    pub route_id: String,
    pub direction: String,
    pub scheduled: u32,
    pub adjusted: u32,
    pub delay_seconds: i32,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Loads a feed from a local file path or fetches it over HTTP.
pub fn load_feed(source: &str) -> Result<FeedMessage> {
    let bytes = if source.starts_with("http") {
        let resp = reqwest::blocking::get(source)?;
        resp.bytes()?.to_vec()
    } else {
        fs::read(source)?
    };
    debug!(bytes = bytes.len(), source, "feed bytes received, parsing");
    parse_feed(&bytes)
}

/// Per-trip delay updates in feed order, each trip's updates sorted by
/// stop_sequence.
pub fn extract_delays(feed: &FeedMessage) -> IndexMap<String, Vec<StopDelay>> {
    let mut by_trip: IndexMap<String, Vec<StopDelay>> = IndexMap::new();

    for entity in &feed.entity {
        let Some(update) = &entity.trip_update else {
            continue;
        };
        let trip_id = update.trip.trip_id();
        if trip_id.is_empty() {
            continue;
        }

        let delays = by_trip.entry(trip_id.to_string()).or_default();
        for stu in &update.stop_time_update {
            // updates without arrival delay information carry nothing usable
            let Some(arrival) = &stu.arrival else {
                continue;
            };
            delays.push(StopDelay {
                stop_sequence: stu.stop_sequence(),
                stop_id: stu.stop_id().to_string(),
                delay_seconds: arrival.delay(),
            });
        }
        delays.sort_by_key(|d| d.stop_sequence);
    }

    by_trip
}

/// The delay to apply at `stop_id`: the update naming that stop when one
/// exists, otherwise the trip's last reported update. Zero when the trip has
/// no usable updates.
pub fn delay_at_stop(delays: &[StopDelay], stop_id: &str) -> i32 {
    delays
        .iter()
        .find(|d| d.stop_id == stop_id)
        .or_else(|| delays.last())
        .map_or(0, |d| d.delay_seconds)
}

/// All arrivals at `stop_id` still ahead of `now_seconds`, delay-adjusted
/// and sorted by adjusted time.
///
/// Trips are mapped to their pattern through `trips`; when several trips of
/// one pattern report delays, the last one in feed order wins.
pub fn upcoming_arrivals(
    entries: &[CanonicalEntry],
    trips: &IndexMap<String, Trip>,
    feed: Option<&FeedMessage>,
    stop_id: &str,
    now_seconds: u32,
) -> Vec<Arrival> {
    // (route, direction, service) -> delay at the queried stop
    let mut pattern_delays: HashMap<(String, String, String), i32> = HashMap::new();
    if let Some(feed) = feed {
        let by_trip = extract_delays(feed);
        info!(trips = by_trip.len(), "realtime delays extracted");
        for (trip_id, delays) in &by_trip {
            let Some(trip) = trips.get(trip_id) else {
                debug!(trip = %trip_id, "feed trip not in static data, skipping");
                continue;
            };
            pattern_delays.insert(
                (
                    trip.route_id.clone(),
                    trip.trip_headsign.clone(),
                    trip.service_id.clone(),
                ),
                delay_at_stop(delays, stop_id),
            );
        }
    }

    let mut arrivals = Vec::new();
    for entry in entries {
        let Some(times) = entry.schedule.arrivals_at(stop_id) else {
            continue;
        };
        let delay = pattern_delays
            .get(&(
                entry.route_id.clone(),
                entry.direction.clone(),
                entry.service_id.clone(),
            ))
            .copied()
            .unwrap_or(0);

        for scheduled in times {
            let adjusted = i64::from(scheduled) + i64::from(delay);
            if adjusted > i64::from(now_seconds) {
                arrivals.push(Arrival {
                    route_id: entry.route_id.clone(),
                    direction: entry.direction.clone(),
                    scheduled,
                    adjusted: adjusted as u32,
                    delay_seconds: delay,
                });
            }
        }
    }

    arrivals.sort_by_key(|a| a.adjusted);
    arrivals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{
        trip_update::{StopTimeEvent, StopTimeUpdate},
        FeedEntity, FeedHeader, TripDescriptor, TripUpdate,
    };
    use crate::timetable::Schedule;
    use chrono::NaiveDate;

    fn feed_with(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1234567890),
                ..Default::default()
            },
            entity: entities,
        }
    }

    fn trip_update(trip_id: &str, updates: Vec<StopTimeUpdate>) -> FeedEntity {
        FeedEntity {
            id: trip_id.to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some(trip_id.to_string()),
                    ..Default::default()
                },
                stop_time_update: updates,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn stu(stop_sequence: u32, stop_id: &str, delay: i32) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_sequence: Some(stop_sequence),
            stop_id: Some(stop_id.to_string()),
            arrival: Some(StopTimeEvent {
                delay: Some(delay),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_feed_round_trip() {
        let feed = feed_with(vec![trip_update("t1", vec![stu(1, "alewife", 60)])]);
        let parsed = parse_feed(&feed.encode_to_vec()).unwrap();
        assert_eq!(parsed, feed);
    }

    #[test]
    fn test_parse_invalid_bytes() {
        assert!(parse_feed(&[0xFF, 0xFE, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_extract_delays_sorts_by_sequence() {
        let feed = feed_with(vec![trip_update(
            "t1",
            vec![stu(3, "porter", 120), stu(1, "alewife", 30)],
        )]);
        let delays = extract_delays(&feed);
        assert_eq!(
            delays["t1"]
                .iter()
                .map(|d| d.stop_sequence)
                .collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_extract_skips_updates_without_arrival() {
        let no_arrival = StopTimeUpdate {
            stop_sequence: Some(2),
            stop_id: Some("davis".to_string()),
            ..Default::default()
        };
        let feed = feed_with(vec![trip_update("t1", vec![stu(1, "alewife", 30), no_arrival])]);
        let delays = extract_delays(&feed);
        assert_eq!(delays["t1"].len(), 1);
    }

    #[test]
    fn test_delay_at_stop_prefers_matching_stop() {
        let delays = vec![
            StopDelay {
                stop_sequence: 1,
                stop_id: "alewife".to_string(),
                delay_seconds: 30,
            },
            StopDelay {
                stop_sequence: 2,
                stop_id: "davis".to_string(),
                delay_seconds: 90,
            },
        ];
        assert_eq!(delay_at_stop(&delays, "alewife"), 30);
        assert_eq!(delay_at_stop(&delays, "davis"), 90);
        // unnamed stop falls back to the last update
        assert_eq!(delay_at_stop(&delays, "porter"), 90);
        assert_eq!(delay_at_stop(&[], "porter"), 0);
    }

    fn canonical_entry() -> CanonicalEntry {
        let mut schedule = Schedule::new();
        for t in [28800, 29400, 30000] {
            schedule.add_time(t, "alewife");
        }
        schedule.compress();

        CanonicalEntry {
            route_id: "red".to_string(),
            direction: "Ashmont".to_string(),
            label: "All weekdays".to_string(),
            service_id: "weekday".to_string(),
            weekday_mask: 0b0011111,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            schedule,
        }
    }

    fn trips_table() -> IndexMap<String, Trip> {
        let mut trips = IndexMap::new();
        trips.insert(
            "t1".to_string(),
            Trip {
                trip_id: "t1".to_string(),
                route_id: "red".to_string(),
                service_id: "weekday".to_string(),
                trip_headsign: "Ashmont".to_string(),
            },
        );
        trips
    }

    #[test]
    fn test_upcoming_arrivals_without_feed() {
        let arrivals = upcoming_arrivals(&[canonical_entry()], &trips_table(), None, "alewife", 29000);
        assert_eq!(arrivals.len(), 2);
        assert_eq!(arrivals[0].scheduled, 29400);
        assert_eq!(arrivals[0].delay_seconds, 0);
    }

    #[test]
    fn test_upcoming_arrivals_apply_delay() {
        let feed = feed_with(vec![trip_update("t1", vec![stu(1, "alewife", 300)])]);
        let arrivals = upcoming_arrivals(
            &[canonical_entry()],
            &trips_table(),
            Some(&feed),
            "alewife",
            29000,
        );

        // 28800 is pushed past "now" by its 300s delay and comes back
        assert_eq!(arrivals.len(), 3);
        assert_eq!(arrivals[0].scheduled, 28800);
        assert_eq!(arrivals[0].adjusted, 29100);
        assert_eq!(arrivals[0].delay_seconds, 300);
    }

    #[test]
    fn test_arrivals_sorted_by_adjusted_time() {
        let mut second = canonical_entry();
        second.route_id = "orange".to_string();
        let mut schedule = Schedule::new();
        schedule.add_time(29500, "alewife");
        schedule.compress();
        second.schedule = schedule;

        // red delayed past orange's arrival
        let feed = feed_with(vec![trip_update("t1", vec![stu(1, "alewife", 400)])]);
        let arrivals = upcoming_arrivals(
            &[canonical_entry(), second],
            &trips_table(),
            Some(&feed),
            "alewife",
            29000,
        );

        assert_eq!(
            arrivals.iter().map(|a| a.adjusted).collect::<Vec<_>>(),
            vec![29200, 29500, 29800, 30400]
        );
    }
}
