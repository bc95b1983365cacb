//! Multi-buffered recording tracks
//!
//! A `Meter` owns `buffer_count` fixed-capacity slots of sections. One slot is
//! active for writing; `next()` retires it and clears the following slot,
//! which then becomes active. Readers only ever look at retired slots.
//!
//! Meters do no locking. Exactly one execution context may record on a given
//! meter at a time; `&mut self` on every recording method makes that the
//! borrow checker's job.

pub mod cpu;
pub mod frame;

pub use cpu::{CpuMeter, ScopedMeasure};
pub use frame::FrameMeter;

use tracing::warn;

use crate::types::section::{Color, Section};
use crate::utils::time::Tick;

/// Smallest supported number of slots per meter
pub const MIN_BUFFER_COUNT: usize = 2;

/// Per-meter diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterStats {
    /// Begins that found the active slot full
    pub dropped: u64,

    /// Ends without a matching open begin
    pub unmatched_end: u64,

    /// Sections still open when their slot was retired
    pub unclosed: u64,
}

/// One frame's worth of sections
#[derive(Debug, Clone)]
pub struct Slot {
    sections: Vec<Section>,
    frame: Option<u64>,
}

impl Slot {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            sections: Vec::with_capacity(capacity),
            frame: None,
        }
    }

    fn reset(&mut self) {
        self.sections.clear();
        self.frame = None;
    }

    /// Recorded sections, in begin order
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Mutable access for late timestamp resolution
    pub fn sections_mut(&mut self) -> &mut [Section] {
        &mut self.sections
    }

    /// Frame number this slot was retired with (`None` while active or unused)
    pub fn frame(&self) -> Option<u64> {
        self.frame
    }
}

/// A retired slot exposed for aggregation
#[derive(Debug, Clone, Copy)]
pub struct CompletedFrame<'a> {
    pub frame: u64,
    pub sections: &'a [Section],
}

/// Write position of a meter: the frame the active slot will be stamped
/// with and the number of sections recorded in it so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub frame: u64,
    pub sections: usize,
}

impl Cursor {
    /// How many leading sections of `frame` were recorded before this cursor
    pub fn sections_before(&self, frame: u64) -> usize {
        match frame.cmp(&self.frame) {
            std::cmp::Ordering::Less => usize::MAX,
            std::cmp::Ordering::Equal => self.sections,
            std::cmp::Ordering::Greater => 0,
        }
    }
}

/// Read side of a meter, as seen by the aggregation engine
pub trait Track {
    /// Meter name used as the first grouping key
    fn name(&self) -> &str;

    /// The most recent retired slot that is safe to read, if any
    fn completed(&self) -> Option<CompletedFrame<'_>>;

    /// Convert this track's ticks to nanoseconds
    fn ticks_to_nanos(&self, ticks: Tick) -> u64;

    /// Current write position
    fn cursor(&self) -> Cursor;
}

/// Fixed-capacity, multi-buffered section recorder
#[derive(Debug, Clone)]
pub struct Meter {
    name: String,
    capacity: usize,
    slots: Vec<Slot>,
    active: usize,
    frame: u64,
    /// Indices of open sections, innermost last; `None` marks a dropped begin
    open: Vec<Option<usize>>,
    color: Color,
    enabled: bool,
    warned_full: bool,
    stats: MeterStats,
}

impl Meter {
    /// Create a meter holding `capacity` sections in each of `buffer_count` slots
    pub fn new(name: impl Into<String>, capacity: usize, buffer_count: usize) -> Self {
        debug_assert!(
            buffer_count >= MIN_BUFFER_COUNT,
            "a meter needs at least {} slots",
            MIN_BUFFER_COUNT
        );
        let buffer_count = buffer_count.max(MIN_BUFFER_COUNT);

        Self {
            name: name.into(),
            capacity,
            slots: (0..buffer_count)
                .map(|_| Slot::with_capacity(capacity))
                .collect(),
            active: 0,
            frame: 0,
            open: Vec::with_capacity(capacity),
            color: Color::default(),
            enabled: true,
            warned_full: false,
            stats: MeterStats::default(),
        }
    }

    /// Bytes of section storage a meter with this shape reserves
    pub fn calculate_buffer_size(capacity: usize, buffer_count: usize) -> usize {
        let buffer_count = buffer_count.max(MIN_BUFFER_COUNT);
        std::mem::size_of::<Section>() * capacity * buffer_count
            + std::mem::size_of::<Option<usize>>() * capacity
            + std::mem::size_of::<Slot>() * buffer_count
    }

    /// Alignment required by section storage
    pub fn buffer_alignment() -> usize {
        std::mem::align_of::<Section>()
            .max(std::mem::align_of::<Option<usize>>())
            .max(std::mem::align_of::<Slot>())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Sections per slot
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// Color copied into subsequently opened sections
    pub fn set_color(&mut self, color: Color) {
        if self.enabled {
            self.color = color;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabled meters ignore begin/end/color calls
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn stats(&self) -> MeterStats {
        self.stats
    }

    /// Number of the frame currently being recorded
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Frame number and section count of the active slot
    pub fn cursor(&self) -> Cursor {
        Cursor {
            frame: self.frame,
            sections: self.slots[self.active].sections.len(),
        }
    }

    /// Number of sections opened and not yet ended
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Open a section in the active slot
    ///
    /// Returns the section's index in the slot, or `None` when the meter is
    /// disabled or the slot is full. A dropped begin still pairs with its end.
    pub fn begin(
        &mut self,
        name: Option<&'static str>,
        tag: u32,
        begin: Option<Tick>,
    ) -> Option<usize> {
        if !self.enabled {
            return None;
        }

        let depth = self.open.len().min(u16::MAX as usize) as u16;
        let slot = &mut self.slots[self.active];
        if slot.sections.len() >= self.capacity {
            self.stats.dropped += 1;
            if !self.warned_full {
                self.warned_full = true;
                warn!(
                    "Meter '{}' is full ({} sections), dropping measurements for frame {}",
                    self.name, self.capacity, self.frame
                );
            }
            self.open.push(None);
            return None;
        }

        let index = slot.sections.len();
        slot.sections.push(Section::open(name, tag, begin, self.color, depth));
        self.open.push(Some(index));
        Some(index)
    }

    /// Close the most recently opened section
    ///
    /// Returns the closed section's index, or `None` when disabled, when the
    /// matching begin was dropped, or when nothing is open.
    pub fn end(&mut self, end: Option<Tick>) -> Option<usize> {
        if !self.enabled {
            return None;
        }

        let Some(entry) = self.open.pop() else {
            self.stats.unmatched_end += 1;
            warn!("Meter '{}': end without a matching begin", self.name);
            if cfg!(debug_assertions) {
                panic!("end on meter '{}' without a matching begin", self.name);
            }
            return None;
        };

        let index = entry?;
        let section = &mut self.slots[self.active].sections[index];
        section.end = end;
        Some(index)
    }

    /// Retire the active slot and start recording into the next one
    ///
    /// Returns the index of the retired slot.
    pub fn next(&mut self) -> usize {
        if !self.open.is_empty() {
            self.stats.unclosed += self.open.len() as u64;
            warn!(
                "Meter '{}': {} section(s) still open at the end of frame {}",
                self.name,
                self.open.len(),
                self.frame
            );
            self.open.clear();
        }

        let retired = self.active;
        self.slots[retired].frame = Some(self.frame);
        self.frame += 1;
        self.warned_full = false;

        self.active = (self.active + 1) % self.slots.len();
        self.slots[self.active].reset();
        retired
    }

    /// Index of the slot being written
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// Sections recorded so far in the active slot
    pub fn active_sections(&self) -> &[Section] {
        &self.slots[self.active].sections
    }

    /// Mutable view of the active slot's sections
    pub fn active_sections_mut(&mut self) -> &mut [Section] {
        &mut self.slots[self.active].sections
    }

    /// The slot retired by the most recent `next()`
    pub fn last_completed(&self) -> Option<&Slot> {
        let n = self.slots.len();
        let slot = &self.slots[(self.active + n - 1) % n];
        slot.frame.map(|_| slot)
    }

    /// Indices of retired slots, newest first
    pub fn history_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.slots.len();
        (1..n)
            .map(move |k| (self.active + n - k) % n)
            .filter(move |&i| self.slots[i].frame.is_some())
    }

    /// Retired slots, newest first
    pub fn history(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.history_indices().map(move |i| &self.slots[i])
    }
}
