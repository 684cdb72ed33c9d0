//! Seconds-since-midnight arrival times.
//!
//! GTFS writes times as "HH:MM:SS" where the hour may reach 24 and beyond for
//! trips that run past midnight; those stay above 86400 with no wraparound so
//! they sort after every same-day arrival.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed time {input:?}: expected HH:MM:SS")]
pub struct TimeError {
    pub input: String,
}

/// Parses "HH:MM:SS" into seconds from the beginning of the day.
///
/// # Errors
///
/// [`TimeError`] when the string is not three colon-separated numeric fields.
pub fn parse_time(s: &str) -> Result<u32, TimeError> {
    let bad = || TimeError {
        input: s.to_string(),
    };

    let mut fields = s.split(':');
    let hour: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minute: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let second: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if fields.next().is_some() {
        return Err(bad());
    }

    Ok(second + 60 * minute + 60 * 60 * hour)
}

/// Formats seconds from the beginning of the day as zero-padded HH:MM:SS.
/// Hours past 23 are kept as-is, mirroring next-day arrival times.
pub fn time_to_string(time: u32) -> String {
    let hour = time / (60 * 60);
    let minute = time % (60 * 60) / 60;
    let second = time % 60;

    format!("{hour:02}:{minute:02}:{second:02}")
}
