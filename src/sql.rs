//! SQL statement generation for the compressed store.
//!
//! Emits `CREATE TABLE IF NOT EXISTS` plus `INSERT` statements as plain text,
//! suitable for piping into sqlite3. Piece lists and delta lists are embedded
//! as hex blob literals; identical delta lists are written once and shared
//! through the `diff` table.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::info;

use crate::blob::CodecError;
use crate::canonical::CanonicalEntry;
use crate::snapshot::pieces_blob;
use crate::timetable::StopEntry;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("output file {0} already exists, delete it and try again")]
    OutputExists(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Doubles embedded single quotes for SQL string literals.
fn escaped(s: &str) -> String {
    s.replace('\'', "''")
}

fn date_int(date: chrono::NaiveDate) -> i32 {
    use chrono::Datelike;
    date.year() * 10000 + date.month() as i32 * 100 + date.day() as i32
}

fn write_service_table(sql: &mut String, entries: &[CanonicalEntry]) -> IndexMap<String, usize> {
    sql.push_str(
        "CREATE TABLE IF NOT EXISTS service (id INTEGER PRIMARY KEY, \
         days_of_week INTEGER, start_date INTEGER, end_date INTEGER);\n",
    );

    let mut ids = IndexMap::new();
    for entry in entries {
        if ids.contains_key(&entry.service_id) {
            continue;
        }
        let id = ids.len();
        sql.push_str(&format!(
            "INSERT INTO service VALUES ({id}, {}, {}, {});\n",
            entry.weekday_mask,
            date_int(entry.start_date),
            date_int(entry.end_date),
        ));
        ids.insert(entry.service_id.clone(), id);
    }
    ids
}

fn write_direction_table(sql: &mut String, entries: &[CanonicalEntry]) -> IndexMap<String, usize> {
    sql.push_str(
        "CREATE TABLE IF NOT EXISTS direction (id INTEGER PRIMARY KEY, title TEXT);\n",
    );

    let mut ids = IndexMap::new();
    for entry in entries {
        if ids.contains_key(&entry.direction) {
            continue;
        }
        let id = ids.len();
        sql.push_str(&format!(
            "INSERT INTO direction VALUES ({id}, '{}');\n",
            escaped(&entry.direction)
        ));
        ids.insert(entry.direction.clone(), id);
    }
    ids
}

fn write_schedule_table(
    sql: &mut String,
    entries: &[CanonicalEntry],
    service_ids: &IndexMap<String, usize>,
    direction_ids: &IndexMap<String, usize>,
) {
    sql.push_str(
        "CREATE TABLE IF NOT EXISTS schedule (id INTEGER PRIMARY KEY, \
         route_id TEXT, direction_id INTEGER, service_id INTEGER);\n",
    );

    for (id, entry) in entries.iter().enumerate() {
        sql.push_str(&format!(
            "INSERT INTO schedule VALUES ({id}, '{}', {}, {});\n",
            escaped(&entry.route_id),
            direction_ids[&entry.direction],
            service_ids[&entry.service_id],
        ));
    }
}

/// Emits one `stop_schedule` row per stop; direct schedules carry their
/// pieces block inline, diff-referenced stops carry NULL and get their blob
/// through the `diff` table. Returns each row's id keyed by (schedule index,
/// stop id).
fn write_stop_schedule_table(
    sql: &mut String,
    entries: &[CanonicalEntry],
) -> Result<IndexMap<(usize, String), usize>, CodecError> {
    sql.push_str(
        "CREATE TABLE IF NOT EXISTS stop_schedule (id INTEGER PRIMARY KEY, \
         schedule_id INTEGER, stop_id TEXT, pieces BLOB);\n",
    );

    let mut ids = IndexMap::new();
    for (schedule_id, entry) in entries.iter().enumerate() {
        for (stop, stop_entry) in entry.schedule.entries() {
            let id = ids.len();
            let pieces = match stop_entry {
                StopEntry::Direct(sched) => pieces_blob(sched.pieces())?.to_blob_literal(),
                StopEntry::DiffReference { .. } => "NULL".to_string(),
            };
            sql.push_str(&format!(
                "INSERT INTO stop_schedule VALUES ({id}, {schedule_id}, '{}', {pieces});\n",
                escaped(stop),
            ));
            ids.insert((schedule_id, stop.to_string()), id);
        }
    }
    Ok(ids)
}

/// Deduplicates delta lists: every distinct list is written once as an int32
/// array blob.
fn write_diff_table(sql: &mut String, entries: &[CanonicalEntry]) -> IndexMap<Vec<i32>, usize> {
    sql.push_str("CREATE TABLE IF NOT EXISTS diff (id INTEGER PRIMARY KEY, deltas BLOB);\n");

    let mut ids = IndexMap::new();
    for entry in entries {
        for (_, stop_entry) in entry.schedule.entries() {
            if let StopEntry::DiffReference { deltas, .. } = stop_entry {
                if ids.contains_key(deltas) {
                    continue;
                }
                let id = ids.len();
                let mut blob = crate::blob::BlobWriter::new();
                blob.append_int32_array(deltas);
                sql.push_str(&format!(
                    "INSERT INTO diff VALUES ({id}, {});\n",
                    blob.to_blob_literal()
                ));
                ids.insert(deltas.clone(), id);
            }
        }
    }
    ids
}

fn write_stop_schedule_diff_table(
    sql: &mut String,
    entries: &[CanonicalEntry],
    stop_row_ids: &IndexMap<(usize, String), usize>,
    diff_ids: &IndexMap<Vec<i32>, usize>,
) {
    sql.push_str(
        "CREATE TABLE IF NOT EXISTS stop_schedule_diff (stop_schedule_id INTEGER, \
         source_stop_schedule_id INTEGER, diff_id INTEGER);\n",
    );

    for (schedule_id, entry) in entries.iter().enumerate() {
        for (stop, stop_entry) in entry.schedule.entries() {
            if let StopEntry::DiffReference { source_stop, deltas } = stop_entry {
                let row = stop_row_ids[&(schedule_id, stop.to_string())];
                let source = stop_row_ids[&(schedule_id, source_stop.clone())];
                sql.push_str(&format!(
                    "INSERT INTO stop_schedule_diff VALUES ({row}, {source}, {});\n",
                    diff_ids[deltas],
                ));
            }
        }
    }
}

/// Renders the full statement stream for a canonical selection.
pub fn generate(entries: &[CanonicalEntry]) -> Result<String, CodecError> {
    let mut sql = String::new();

    let service_ids = write_service_table(&mut sql, entries);
    let direction_ids = write_direction_table(&mut sql, entries);
    write_schedule_table(&mut sql, entries, &service_ids, &direction_ids);
    let stop_row_ids = write_stop_schedule_table(&mut sql, entries)?;
    let diff_ids = write_diff_table(&mut sql, entries);
    write_stop_schedule_diff_table(&mut sql, entries, &stop_row_ids, &diff_ids);

    Ok(sql)
}

/// Generates and writes the statement file. Refuses to clobber an existing
/// file, and goes through a temp file so an aborted run leaves nothing
/// half-written.
pub fn write_file(path: &Path, entries: &[CanonicalEntry]) -> Result<(), SqlError> {
    if path.exists() {
        return Err(SqlError::OutputExists(path.to_path_buf()));
    }

    let sql = generate(entries)?;
    let tmp = path.with_extension("sql.tmp");
    fs::write(&tmp, &sql)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), bytes = sql.len(), "SQL written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::Schedule;
    use chrono::NaiveDate;

    fn entry_with(direction: &str, schedule: Schedule) -> CanonicalEntry {
        CanonicalEntry {
            route_id: "red".to_string(),
            direction: direction.to_string(),
            label: "All weekdays".to_string(),
            service_id: "weekday".to_string(),
            weekday_mask: 0b0011111,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            schedule,
        }
    }

    fn sample_schedule() -> Schedule {
        let mut schedule = Schedule::new();
        for t in [28800, 29400, 30000] {
            schedule.add_time(t, "alewife");
        }
        for t in [28920, 29520, 30120] {
            schedule.add_time(t, "davis");
        }
        schedule.compress();
        schedule
    }

    #[test]
    fn test_generate_emits_all_tables() {
        let sql = generate(&[entry_with("Ashmont", sample_schedule())]).unwrap();

        for table in [
            "service",
            "direction",
            "schedule",
            "stop_schedule",
            "diff",
            "stop_schedule_diff",
        ] {
            assert!(
                sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")),
                "missing table {table}"
            );
        }

        assert!(sql.contains("INSERT INTO service VALUES (0, 31, 20260101, 20260601);"));
        assert!(sql.contains("INSERT INTO schedule VALUES (0, 'red', 0, 0);"));
        // alewife keeps its pieces, davis is stored as a diff row
        assert!(sql.contains("'alewife', X'"));
        assert!(sql.contains("'davis', NULL"));
        assert!(sql.contains("INSERT INTO stop_schedule_diff VALUES (1, 0, 0);"));
    }

    #[test]
    fn test_single_quotes_are_escaped() {
        let mut schedule = Schedule::new();
        schedule.add_time(100, "st");
        schedule.compress();
        let mut entry = entry_with("Wonderland via O'Hare", schedule);
        entry.route_id = "blue'line".to_string();

        let sql = generate(&[entry]).unwrap();
        assert!(sql.contains("'Wonderland via O''Hare'"));
        assert!(sql.contains("'blue''line'"));
    }

    #[test]
    fn test_identical_delta_lists_share_one_diff_row() {
        // Three stops, the second and third both 120s after the first:
        // both references carry the same delta list
        let mut schedule = Schedule::new();
        for t in [28800, 29400] {
            schedule.add_time(t, "a");
        }
        for t in [28920, 29520] {
            schedule.add_time(t, "b");
        }
        for t in [28920, 29520] {
            schedule.add_time(t, "c");
        }
        schedule.compress();

        let sql = generate(&[entry_with("Ashmont", schedule)]).unwrap();
        let diff_rows = sql
            .lines()
            .filter(|l| l.starts_with("INSERT INTO diff "))
            .count();
        assert_eq!(diff_rows, 1);
    }

    #[test]
    fn test_services_and_directions_deduplicate() {
        let entries = vec![
            entry_with("Ashmont", sample_schedule()),
            entry_with("Ashmont", sample_schedule()),
        ];
        let sql = generate(&entries).unwrap();

        let service_rows = sql
            .lines()
            .filter(|l| l.starts_with("INSERT INTO service "))
            .count();
        let direction_rows = sql
            .lines()
            .filter(|l| l.starts_with("INSERT INTO direction "))
            .count();
        let schedule_rows = sql
            .lines()
            .filter(|l| l.starts_with("INSERT INTO schedule "))
            .count();
        assert_eq!(service_rows, 1);
        assert_eq!(direction_rows, 1);
        assert_eq!(schedule_rows, 2);
    }

    #[test]
    fn test_write_file_refuses_existing_output() {
        let path = std::env::temp_dir().join("gtfs_schedule_packer_sql_test.sql");
        let _ = fs::remove_file(&path);

        write_file(&path, &[entry_with("Ashmont", sample_schedule())]).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("CREATE TABLE"));

        assert!(matches!(
            write_file(&path, &[]),
            Err(SqlError::OutputExists(_))
        ));

        fs::remove_file(&path).unwrap();
    }
}
