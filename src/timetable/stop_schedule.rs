//! Run-length compression of one stop's arrival times.

use std::fmt;

use crate::time::time_to_string;
use crate::timetable::Piece;

/// A compressed schedule for a single stop.
///
/// Times arrive in any order via [`add_time`](StopSchedule::add_time), which
/// only keeps the list sorted; the actual folding into progressions happens in
/// one [`compress`](StopSchedule::compress) pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSchedule {
    stop_id: String,
    pieces: Vec<Piece>,
}

impl StopSchedule {
    pub fn new(stop_id: impl Into<String>) -> Self {
        StopSchedule {
            stop_id: stop_id.into(),
            pieces: Vec::new(),
        }
    }

    pub(crate) fn from_pieces(stop_id: impl Into<String>, pieces: Vec<Piece>) -> Self {
        StopSchedule {
            stop_id: stop_id.into(),
            pieces,
        }
    }

    pub fn stop_id(&self) -> &str {
        &self.stop_id
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Inserts an arrival as a trivial piece, before the first piece that
    /// starts later. Merging is deferred to [`compress`](Self::compress).
    pub fn add_time(&mut self, arrival_time: u32) {
        let pos = self
            .pieces
            .iter()
            .position(|p| p.start_time > arrival_time)
            .unwrap_or(self.pieces.len());
        self.pieces.insert(pos, Piece::single(arrival_time));
    }

    /// Folds sorted trivial pieces into maximal arithmetic progressions.
    ///
    /// A time extends the previous piece only when it is exactly the next
    /// term of the established progression; a time equal to the previous
    /// piece's last arrival is a duplicate and is coalesced. Idempotent:
    /// compressing an already-compressed schedule changes nothing.
    pub fn compress(&mut self) {
        let mut out: Vec<Piece> = Vec::with_capacity(self.pieces.len());

        for piece in self.pieces.drain(..) {
            let Some(last) = out.last_mut() else {
                out.push(piece);
                continue;
            };

            // Only fresh single-time pieces are candidates for folding
            if !piece.is_single() {
                out.push(piece);
                continue;
            }

            let t = piece.start_time;
            if t == last.last_time() {
                // duplicate arrival, drop it
            } else if last.is_single() {
                last.increment = t - last.start_time;
                last.count = 1;
            } else if t - last.last_time() == last.increment {
                last.count += 1;
            } else {
                out.push(piece);
            }
        }

        self.pieces = out;
    }

    /// Per-piece start-time deltas from `self` to `other`, when the two
    /// schedules have identical piece shape: same piece count (at least one)
    /// and equal (increment, count) at every index. `None` otherwise.
    pub fn diff(&self, other: &StopSchedule) -> Option<Vec<i32>> {
        if self.pieces.is_empty() || self.pieces.len() != other.pieces.len() {
            return None;
        }

        let mut deltas = Vec::with_capacity(self.pieces.len());
        for (ours, theirs) in self.pieces.iter().zip(other.pieces.iter()) {
            if ours.increment != theirs.increment || ours.count != theirs.count {
                return None;
            }
            deltas.push((i64::from(theirs.start_time) - i64::from(ours.start_time)) as i32);
        }
        Some(deltas)
    }

    /// Re-expands every piece into the full sorted arrival list.
    pub fn expand(&self) -> Vec<u32> {
        self.pieces.iter().flat_map(|p| p.events()).collect()
    }
}

impl fmt::Display for StopSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for piece in &self.pieces {
            writeln!(
                f,
                "        start at {}, repeat every {} minutes {} times",
                time_to_string(piece.start_time),
                piece.increment / 60,
                piece.count
            )?;
        }
        Ok(())
    }
}
