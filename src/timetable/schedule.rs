//! Cross-stop redundancy elimination for one trip pattern.

use std::fmt;

use indexmap::IndexMap;

use crate::timetable::StopSchedule;

/// What a stop's timetable compressed down to.
///
/// Most stops along a route run a fixed travel time after an earlier stop, so
/// after compression only the first stop of each shape keeps its full piece
/// list; the rest carry a reference and per-piece start-time deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopEntry {
    Direct(StopSchedule),
    DiffReference { source_stop: String, deltas: Vec<i32> },
}

/// All stop timetables for one trip pattern, in first-visitation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    entries: IndexMap<String, StopEntry>,
    /// Stops whose schedule established a distinct piece shape, in
    /// registration order.
    representatives: Vec<String>,
    compressed: bool,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: IndexMap<String, StopEntry>) -> Self {
        let representatives = entries
            .iter()
            .filter(|(_, e)| matches!(e, StopEntry::Direct(_)))
            .map(|(stop, _)| stop.clone())
            .collect();
        Schedule {
            entries,
            representatives,
            compressed: true,
        }
    }

    /// Routes an arrival time to `stop`'s schedule, creating it on first
    /// sight so stops keep their visitation order.
    pub fn add_time(&mut self, arrival_time: u32, stop: &str) {
        let entry = self
            .entries
            .entry(stop.to_string())
            .or_insert_with(|| StopEntry::Direct(StopSchedule::new(stop)));
        if let StopEntry::Direct(sched) = entry {
            sched.add_time(arrival_time);
        }
    }

    /// Compresses every stop's schedule, then replaces any schedule matching
    /// an earlier group representative's piece shape with a reference plus
    /// deltas. The first representative to match wins; a schedule matching
    /// none becomes a representative itself. After this the schedule is
    /// final.
    pub fn compress(&mut self) {
        if self.compressed {
            return;
        }
        self.compressed = true;

        let stops: Vec<String> = self.entries.keys().cloned().collect();
        for stop in stops {
            if let Some(StopEntry::Direct(sched)) = self.entries.get_mut(&stop) {
                sched.compress();
            }

            let Some(StopEntry::Direct(current)) = self.entries.get(&stop) else {
                continue;
            };

            let mut matched = None;
            for rep_stop in &self.representatives {
                if let Some(StopEntry::Direct(rep)) = self.entries.get(rep_stop) {
                    if let Some(deltas) = rep.diff(current) {
                        matched = Some((rep_stop.clone(), deltas));
                        break;
                    }
                }
            }

            match matched {
                Some((source_stop, deltas)) => {
                    // insert on an existing key keeps its position
                    self.entries
                        .insert(stop, StopEntry::DiffReference { source_stop, deltas });
                }
                None => self.representatives.push(stop),
            }
        }
    }

    /// Stop ids in first-visitation order.
    pub fn stops(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &StopEntry)> {
        self.entries.iter().map(|(stop, e)| (stop.as_str(), e))
    }

    pub fn entry(&self, stop: &str) -> Option<&StopEntry> {
        self.entries.get(stop)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The full sorted arrival list for one stop, resolving a reference
    /// through its representative.
    pub fn arrivals_at(&self, stop: &str) -> Option<Vec<u32>> {
        match self.entries.get(stop)? {
            StopEntry::Direct(sched) => Some(sched.expand()),
            StopEntry::DiffReference { source_stop, deltas } => {
                let StopEntry::Direct(source) = self.entries.get(source_stop)? else {
                    return None;
                };
                Some(
                    source
                        .pieces()
                        .iter()
                        .zip(deltas)
                        .flat_map(|(p, d)| {
                            p.events()
                                .map(move |t| (i64::from(t) + i64::from(*d)) as u32)
                        })
                        .collect(),
                )
            }
        }
    }
}

/// Renders a delta list in minutes when every entry is a whole number of
/// minutes, in seconds otherwise.
fn deltas_to_string(deltas: &[i32]) -> String {
    match deltas {
        [] => String::new(),
        [single] if single % 60 == 0 => format!("{} minutes", single / 60),
        [single] => format!("{single} seconds"),
        _ => {
            if deltas.iter().all(|d| d % 60 == 0) {
                let minutes: Vec<String> = deltas.iter().map(|d| (d / 60).to_string()).collect();
                format!("[{}] minutes", minutes.join(", "))
            } else {
                let seconds: Vec<String> = deltas.iter().map(|d| d.to_string()).collect();
                format!("[{}] seconds", seconds.join(", "))
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (stop, entry) in &self.entries {
            match entry {
                StopEntry::Direct(sched) => {
                    writeln!(f, "    Stop: {stop}")?;
                    write!(f, "{sched}")?;
                }
                StopEntry::DiffReference { source_stop, deltas } => {
                    writeln!(
                        f,
                        "    whole schedule for '{stop}' is exactly {} from '{source_stop}'",
                        deltas_to_string(deltas)
                    )?;
                }
            }
        }
        Ok(())
    }
}
