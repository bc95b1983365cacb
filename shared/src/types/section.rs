//! Section records
//!
//! A section is one timed interval recorded on a meter. Names and tags are
//! opaque grouping keys; the color is carried for visualization only.

use serde::{Deserialize, Serialize};

use crate::utils::time::Tick;

/// Display color attached to recorded sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);

    /// Opaque color from its components
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// One recorded measurement interval
///
/// `begin` and `end` stay `None` until the corresponding timestamp is known.
/// CPU sections get `begin` immediately and `end` when closed; GPU sections
/// get both once the query results have been read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Optional name key (`None` never matches a named query)
    pub name: Option<&'static str>,

    /// Integer key, `0` means "unset"
    pub tag: u32,

    /// Start timestamp in the source's ticks
    pub begin: Option<Tick>,

    /// End timestamp in the source's ticks
    pub end: Option<Tick>,

    /// Display color copied from the meter when the section was opened
    pub color: Color,

    /// Number of sections still open on the meter when this one was opened
    pub depth: u16,
}

impl Section {
    /// Create an open section
    pub fn open(
        name: Option<&'static str>,
        tag: u32,
        begin: Option<Tick>,
        color: Color,
        depth: u16,
    ) -> Self {
        Self {
            name,
            tag,
            begin,
            end: None,
            color,
            depth,
        }
    }

    /// Both timestamps are known
    pub fn is_resolved(&self) -> bool {
        self.begin.is_some() && self.end.is_some()
    }

    /// Elapsed ticks, if resolved
    ///
    /// A resolved section never reports a negative interval: an end that
    /// precedes the begin (e.g. a counter reset) yields zero.
    pub fn elapsed(&self) -> Option<Tick> {
        Some(self.end?.saturating_sub(self.begin?))
    }
}
