//! Aggregate profile rows
//!
//! A `ProfileSection` folds every section sharing a `(meter, name, tag)` key
//! into call count and total/min/max elapsed time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Measurement domain an aggregate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Cpu,
    Gpu,
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Cpu => f.write_str("cpu"),
            Unit::Gpu => f.write_str("gpu"),
        }
    }
}

impl std::str::FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Unit::Cpu),
            "gpu" => Ok(Unit::Gpu),
            _ => Err(format!("Invalid unit: {}", s)),
        }
    }
}

/// Aggregated statistics for one grouping key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSection {
    /// Name of the meter the sections were recorded on
    pub meter_name: String,

    /// Section name (`None` for unnamed sections)
    pub section_name: Option<String>,

    /// Section tag
    pub tag: u32,

    /// Number of folded sections
    pub call_count: u64,

    /// Sum of elapsed times in nanoseconds
    pub elapsed_ns: u64,

    /// Largest elapsed time in nanoseconds
    pub max_elapsed_ns: u64,

    /// Smallest elapsed time in nanoseconds (0 while `call_count == 0`)
    pub min_elapsed_ns: u64,
}

impl ProfileSection {
    /// Create an empty row for a grouping key
    pub fn new(meter_name: &str, section_name: Option<&str>, tag: u32) -> Self {
        Self {
            meter_name: meter_name.to_string(),
            section_name: section_name.map(str::to_string),
            tag,
            ..Self::default()
        }
    }

    /// Whether this row belongs to the given key
    pub fn is_key(&self, meter_name: &str, section_name: Option<&str>, tag: u32) -> bool {
        self.tag == tag
            && self.meter_name == meter_name
            && self.section_name.as_deref() == section_name
    }

    /// Whether this row passes a query filter
    ///
    /// `None` names and a zero tag match anything.
    pub fn matches(&self, meter_name: Option<&str>, section_name: Option<&str>, tag: u32) -> bool {
        meter_name.map_or(true, |m| self.meter_name == m)
            && section_name.map_or(true, |s| self.section_name.as_deref() == Some(s))
            && (tag == 0 || self.tag == tag)
    }

    /// Fold one elapsed time into the row
    pub fn record(&mut self, elapsed_ns: u64) {
        if self.call_count == 0 {
            self.max_elapsed_ns = elapsed_ns;
            self.min_elapsed_ns = elapsed_ns;
        } else {
            self.max_elapsed_ns = self.max_elapsed_ns.max(elapsed_ns);
            self.min_elapsed_ns = self.min_elapsed_ns.min(elapsed_ns);
        }
        self.call_count += 1;
        self.elapsed_ns = self.elapsed_ns.saturating_add(elapsed_ns);
    }

    /// Fold another row's statistics into this one
    pub fn merge(&mut self, other: &ProfileSection) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 {
            self.max_elapsed_ns = other.max_elapsed_ns;
            self.min_elapsed_ns = other.min_elapsed_ns;
        } else {
            self.max_elapsed_ns = self.max_elapsed_ns.max(other.max_elapsed_ns);
            self.min_elapsed_ns = self.min_elapsed_ns.min(other.min_elapsed_ns);
        }
        self.call_count += other.call_count;
        self.elapsed_ns = self.elapsed_ns.saturating_add(other.elapsed_ns);
    }

    /// Total elapsed time
    pub fn elapsed_time(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns)
    }

    /// Longest single elapsed time
    pub fn max_elapsed_time(&self) -> Duration {
        Duration::from_nanos(self.max_elapsed_ns)
    }

    /// Shortest single elapsed time
    pub fn min_elapsed_time(&self) -> Duration {
        Duration::from_nanos(self.min_elapsed_ns)
    }

    /// Mean elapsed time, zero when nothing was recorded
    pub fn average_elapsed_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.elapsed_ns / self.call_count)
        }
    }
}
