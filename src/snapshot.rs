//! Binary serialization of compressed schedules.
//!
//! Two layers: the pieces block (one stop's piece list, also embedded in SQL
//! blob columns) and the snapshot file, which packs the whole canonical
//! selection so the delay overlay can read schedules back without touching
//! the GTFS feed again.
//!
//! Snapshot layout, all through the codec's primitives:
//!
//! ```text
//! magic "GSPK" (length-prefixed)   version byte   uint16 entry count
//! per entry:
//!   route id, direction, weekday label, service id   (length-prefixed)
//!   weekday mask byte   int32 start date   int32 end date   (YYYYMMDD)
//!   uint16 stop count
//!   per stop: stop id (length-prefixed), tag byte
//!     tag 0: pieces block (byte count, then per piece int32 start,
//!            int32 increment, uint16 repeat count)
//!     tag 1: source stop id (length-prefixed), int32 array of deltas
//! ```

use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::info;

use crate::blob::{BlobReader, BlobWriter, CodecError};
use crate::canonical::CanonicalEntry;
use crate::timetable::{Piece, Schedule, StopEntry, StopSchedule};

const MAGIC: &[u8] = b"GSPK";
const VERSION: u8 = 1;

const TAG_DIRECT: u8 = 0;
const TAG_DIFF_REFERENCE: u8 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("not a schedule snapshot")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    BadVersion(u8),

    #[error("unknown stop entry tag {0}")]
    BadTag(u8),

    #[error("snapshot string is not valid UTF-8")]
    BadString,

    #[error("bad date {0} in snapshot")]
    BadDate(i32),

    #[error("{0} unread bytes after the last entry")]
    TrailingBytes(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encodes one stop's piece list.
///
/// # Errors
///
/// [`CodecError::Range`] when a schedule has more than 255 pieces or a piece
/// repeats more than 65535 times.
pub fn append_pieces(writer: &mut BlobWriter, pieces: &[Piece]) -> Result<(), CodecError> {
    writer.append_byte(pieces.len() as u32)?;
    for piece in pieces {
        writer.append_int32(piece.start_time as i32);
        writer.append_int32(piece.increment as i32);
        writer.append_uint16(piece.count)?;
    }
    Ok(())
}

pub fn read_pieces(reader: &mut BlobReader<'_>) -> Result<Vec<Piece>, CodecError> {
    let count = reader.read_byte()?;
    let mut pieces = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start_time = reader.read_int32()? as u32;
        let increment = reader.read_int32()? as u32;
        let count = u32::from(reader.read_uint16()?);
        pieces.push(Piece {
            start_time,
            increment,
            count,
        });
    }
    Ok(pieces)
}

/// One stop's pieces block as a standalone blob, for SQL embedding.
pub fn pieces_blob(pieces: &[Piece]) -> Result<BlobWriter, CodecError> {
    let mut writer = BlobWriter::new();
    append_pieces(&mut writer, pieces)?;
    Ok(writer)
}

fn date_to_int(date: NaiveDate) -> i32 {
    date.year() * 10000 + date.month() as i32 * 100 + date.day() as i32
}

fn int_to_date(v: i32) -> Result<NaiveDate, SnapshotError> {
    NaiveDate::from_ymd_opt(v / 10000, (v / 100 % 100) as u32, (v % 100) as u32)
        .ok_or(SnapshotError::BadDate(v))
}

fn read_string(reader: &mut BlobReader<'_>) -> Result<String, SnapshotError> {
    let bytes = reader.read_length_prefixed_bytes()?;
    String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::BadString)
}

pub fn encode(entries: &[CanonicalEntry]) -> Result<Vec<u8>, SnapshotError> {
    let mut writer = BlobWriter::new();
    writer.append_length_prefixed_bytes(MAGIC)?;
    writer.append_byte(u32::from(VERSION))?;
    writer.append_uint16(entries.len() as u32)?;

    for entry in entries {
        writer.append_length_prefixed_bytes(entry.route_id.as_bytes())?;
        writer.append_length_prefixed_bytes(entry.direction.as_bytes())?;
        writer.append_length_prefixed_bytes(entry.label.as_bytes())?;
        writer.append_length_prefixed_bytes(entry.service_id.as_bytes())?;
        writer.append_byte(u32::from(entry.weekday_mask))?;
        writer.append_int32(date_to_int(entry.start_date));
        writer.append_int32(date_to_int(entry.end_date));

        writer.append_uint16(entry.schedule.len() as u32)?;
        for (stop, stop_entry) in entry.schedule.entries() {
            writer.append_length_prefixed_bytes(stop.as_bytes())?;
            match stop_entry {
                StopEntry::Direct(sched) => {
                    writer.append_byte(u32::from(TAG_DIRECT))?;
                    append_pieces(&mut writer, sched.pieces())?;
                }
                StopEntry::DiffReference { source_stop, deltas } => {
                    writer.append_byte(u32::from(TAG_DIFF_REFERENCE))?;
                    writer.append_length_prefixed_bytes(source_stop.as_bytes())?;
                    writer.append_int32_array(deltas);
                }
            }
        }
    }

    Ok(writer.into_bytes())
}

pub fn decode(bytes: &[u8]) -> Result<Vec<CanonicalEntry>, SnapshotError> {
    let mut reader = BlobReader::new(bytes);

    if reader.read_length_prefixed_bytes()? != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = reader.read_byte()?;
    if version != VERSION {
        return Err(SnapshotError::BadVersion(version));
    }

    let entry_count = reader.read_uint16()?;
    let mut entries = Vec::with_capacity(entry_count as usize);

    for _ in 0..entry_count {
        let route_id = read_string(&mut reader)?;
        let direction = read_string(&mut reader)?;
        let label = read_string(&mut reader)?;
        let service_id = read_string(&mut reader)?;
        let weekday_mask = reader.read_byte()?;
        let start_date = int_to_date(reader.read_int32()?)?;
        let end_date = int_to_date(reader.read_int32()?)?;

        let stop_count = reader.read_uint16()?;
        let mut stops = IndexMap::with_capacity(stop_count as usize);
        for _ in 0..stop_count {
            let stop = read_string(&mut reader)?;
            let entry = match reader.read_byte()? {
                TAG_DIRECT => {
                    let pieces = read_pieces(&mut reader)?;
                    StopEntry::Direct(StopSchedule::from_pieces(stop.clone(), pieces))
                }
                TAG_DIFF_REFERENCE => StopEntry::DiffReference {
                    source_stop: read_string(&mut reader)?,
                    deltas: reader.read_int32_array()?,
                },
                tag => return Err(SnapshotError::BadTag(tag)),
            };
            stops.insert(stop, entry);
        }

        entries.push(CanonicalEntry {
            route_id,
            direction,
            label,
            service_id,
            weekday_mask,
            start_date,
            end_date,
            schedule: Schedule::from_entries(stops),
        });
    }

    if !reader.at_end() {
        return Err(SnapshotError::TrailingBytes(reader.remaining()));
    }
    Ok(entries)
}

/// Writes the snapshot through a temp file so a failed run leaves no partial
/// artifact behind.
pub fn write_file(path: &Path, entries: &[CanonicalEntry]) -> Result<(), SnapshotError> {
    let bytes = encode(entries)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), bytes = bytes.len(), entries = entries.len(), "snapshot written");
    Ok(())
}

pub fn read_file(path: &Path) -> Result<Vec<CanonicalEntry>, SnapshotError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}
