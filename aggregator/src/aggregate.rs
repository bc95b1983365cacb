//! Aggregation of completed frames into profile rows
//!
//! Each pass reads the completed slot of every track in a domain and folds
//! resolved sections into a fixed-capacity table keyed by
//! `(meter name, section name, tag)`.

use loadmeter_shared::meter::{Cursor, Track};
use loadmeter_shared::ProfileSection;
use tracing::warn;

/// Counts from one aggregation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Sections folded into rows
    pub folded: u64,

    /// Sections skipped because they had no resolved timestamps
    pub unresolved: u64,

    /// Sections lost because the table had no room for their key
    pub dropped: u64,
}

/// Fixed-capacity table of aggregate rows
#[derive(Debug, Clone)]
pub struct ProfileTable {
    rows: Vec<ProfileSection>,
    capacity: usize,
    /// Frame last folded in, per track position
    folded_frames: Vec<Option<u64>>,
    /// Write position of each track at the last `clear`; anything recorded
    /// before it is never folded
    cleared_at: Vec<Option<Cursor>>,
    dropped: u64,
}

impl ProfileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
            folded_frames: Vec::new(),
            cleared_at: Vec::new(),
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rows(&self) -> &[ProfileSection] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sections lost to a full table since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drop all rows and ignore every section recorded so far
    ///
    /// `tracks` must be in the same order as in `aggregate`. Sections already
    /// in a track's active slot, and frames still waiting for GPU results,
    /// stay out of the table.
    pub fn clear<'a, I>(&mut self, tracks: I)
    where
        I: IntoIterator<Item = &'a dyn Track>,
    {
        self.rows.clear();
        self.cleared_at = tracks.into_iter().map(|track| Some(track.cursor())).collect();
    }

    /// Drop all rows and forget which frames were folded
    ///
    /// Positions recorded by `clear` still apply.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.folded_frames.clear();
    }

    /// Fold one elapsed time into the row for its key
    ///
    /// Returns `false` when the key is new and the table is full.
    pub fn record(
        &mut self,
        meter_name: &str,
        section_name: Option<&str>,
        tag: u32,
        elapsed_ns: u64,
    ) -> bool {
        if let Some(row) = self
            .rows
            .iter_mut()
            .find(|row| row.is_key(meter_name, section_name, tag))
        {
            row.record(elapsed_ns);
            return true;
        }

        if self.rows.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }

        let mut row = ProfileSection::new(meter_name, section_name, tag);
        row.record(elapsed_ns);
        self.rows.push(row);
        true
    }

    /// Union of every row passing the filter
    ///
    /// `None` names and a zero tag are wildcards. The result carries the
    /// filter values as its key; with no match it is all zeros.
    pub fn find(
        &self,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> ProfileSection {
        let mut result = ProfileSection::new(meter_name.unwrap_or_default(), section_name, tag);
        for row in self
            .rows
            .iter()
            .filter(|row| row.matches(meter_name, section_name, tag))
        {
            result.merge(row);
        }
        result
    }

    fn already_folded(&mut self, track: usize, frame: u64) -> bool {
        if self.folded_frames.len() <= track {
            self.folded_frames.resize(track + 1, None);
        }
        let seen = self.folded_frames[track].map_or(false, |last| last >= frame);
        if !seen {
            self.folded_frames[track] = Some(frame);
        }
        seen
    }

    /// Leading sections of `frame` on a track that predate the last `clear`
    fn skipped(&self, track: usize, frame: u64) -> usize {
        self.cleared_at
            .get(track)
            .copied()
            .flatten()
            .map_or(0, |cursor| cursor.sections_before(frame))
    }
}

/// Fold the completed frame of every track into `table`
///
/// Track positions must be stable across calls; a track whose completed
/// frame was already folded into the table is skipped, so a GPU frame that
/// stays readable for several rotations is counted once.
pub fn aggregate<'a, I>(table: &mut ProfileTable, tracks: I) -> PassSummary
where
    I: IntoIterator<Item = &'a dyn Track>,
{
    let mut summary = PassSummary::default();

    for (position, track) in tracks.into_iter().enumerate() {
        let Some(completed) = track.completed() else {
            continue;
        };
        if table.already_folded(position, completed.frame) {
            continue;
        }

        let skipped = table.skipped(position, completed.frame);
        for section in completed.sections.iter().skip(skipped) {
            let Some(ticks) = section.elapsed() else {
                summary.unresolved += 1;
                continue;
            };
            let elapsed_ns = track.ticks_to_nanos(ticks);
            if table.record(track.name(), section.name, section.tag, elapsed_ns) {
                summary.folded += 1;
            } else {
                summary.dropped += 1;
            }
        }
    }

    if summary.dropped > 0 {
        warn!(
            "Aggregate table full ({} rows), {} section(s) dropped",
            table.capacity(),
            summary.dropped
        );
    }
    summary
}
