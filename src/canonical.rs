//! Canonical service selection.
//!
//! GTFS feeds routinely issue several service_ids with the same
//! weekday-activity pattern but different date ranges (seasonal ratings,
//! holiday overlays). For each route/direction only one timetable per weekday
//! pattern is worth keeping: the one whose service covers the longest date
//! range.

use chrono::NaiveDate;
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::warn;

use crate::pipeline::{PatternKey, Store};
use crate::timetable::Schedule;

/// One surviving timetable after duplicate-service elimination.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEntry {
    pub route_id: String,
    /// Trip headsign; doubles as the direction label.
    pub direction: String,
    /// Human-readable weekday label, e.g. "All weekdays" or
    /// "Saturday, Sunday".
    pub label: String,
    pub service_id: String,
    pub weekday_mask: u8,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub schedule: Schedule,
}

/// Formats a Monday..Sunday activity pattern.
///
/// Monday through Friday all active collapses to "All weekdays" no matter
/// what the weekend flags say; anything else lists the active day names in
/// week order.
pub fn weekday_label(weekdays: &[bool; 7]) -> String {
    if weekdays[..5].iter().all(|on| *on) {
        return "All weekdays".to_string();
    }

    const DAYS: [&str; 7] = [
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
        "Sunday",
    ];

    let names: Vec<&str> = weekdays
        .iter()
        .zip(DAYS)
        .filter(|(on, _)| **on)
        .map(|(_, name)| name)
        .collect();
    names.join(", ")
}

/// Picks one service per weekday pattern for every route/direction: the one
/// with the strictly longest active date range, first-seen winning ties.
/// Entries come out grouped by route/direction in first-seen order, one per
/// distinct weekday label.
pub fn select(store: &Store) -> Vec<CanonicalEntry> {
    // (route, direction) -> weekday pattern -> (service_id, range length)
    let mut groups: IndexMap<(String, String), IndexMap<[bool; 7], (String, i64)>> =
        IndexMap::new();

    for key in store.patterns.keys() {
        let Some(service) = store.services.get(&key.service_id) else {
            warn!(service = %key.service_id, "pattern references unknown service, skipping");
            continue;
        };

        let group = groups
            .entry((key.route_id.clone(), key.headsign.clone()))
            .or_default();
        let days = service.active_days();
        match group.entry(service.weekdays) {
            Entry::Occupied(mut best) => {
                // strictly longer only, so ties keep the first-seen service
                if days > best.get().1 {
                    best.insert((key.service_id.clone(), days));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert((key.service_id.clone(), days));
            }
        }
    }

    let mut entries = Vec::new();
    for ((route_id, direction), by_weekday) in groups {
        let mut labels = IndexMap::new();
        for (weekdays, (service_id, _)) in by_weekday {
            let label = weekday_label(&weekdays);
            // "All weekdays" can cover several patterns; keep the first
            if labels.contains_key(&label) {
                continue;
            }

            let key = PatternKey {
                headsign: direction.clone(),
                route_id: route_id.clone(),
                service_id: service_id.clone(),
            };
            let (Some(schedule), Some(service)) =
                (store.patterns.get(&key), store.services.get(&service_id))
            else {
                continue;
            };

            labels.insert(
                label.clone(),
                CanonicalEntry {
                    route_id: route_id.clone(),
                    direction: direction.clone(),
                    label,
                    service_id,
                    weekday_mask: service.weekday_mask(),
                    start_date: service.start_date,
                    end_date: service.end_date,
                    schedule: schedule.clone(),
                },
            );
        }
        entries.extend(labels.into_values());
    }

    entries
}
