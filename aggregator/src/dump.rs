//! Human-readable rendering of aggregate tables

use loadmeter_shared::utils::format_millis;
use loadmeter_shared::{ProfileSection, Unit};
use std::io::{self, Write};
use tracing::info;

fn section_label(row: &ProfileSection) -> &str {
    row.section_name.as_deref().unwrap_or("<unnamed>")
}

/// Write one table with a heading line
pub fn write_table<W: Write>(out: &mut W, unit: Unit, rows: &[ProfileSection]) -> io::Result<()> {
    writeln!(out, "=== {} ({} rows) ===", unit.to_string().to_uppercase(), rows.len())?;
    if rows.is_empty() {
        return Ok(());
    }

    writeln!(
        out,
        "  {:<16} {:<24} {:>6} {:>8} {:>12} {:>12} {:>12} {:>12}",
        "METER", "SECTION", "TAG", "CALLS", "TOTAL (ms)", "AVG (ms)", "MIN (ms)", "MAX (ms)"
    )?;
    for row in rows {
        writeln!(
            out,
            "  {:<16} {:<24} {:>6} {:>8} {:>12} {:>12} {:>12} {:>12}",
            row.meter_name,
            section_label(row),
            row.tag,
            row.call_count,
            format_millis(row.elapsed_time()),
            format_millis(row.average_elapsed_time()),
            format_millis(row.min_elapsed_time()),
            format_millis(row.max_elapsed_time()),
        )?;
    }
    Ok(())
}

/// Emit one log line per row
pub fn log_table(unit: Unit, rows: &[ProfileSection]) {
    for row in rows {
        info!(
            "[{}] {} / {} (tag {}): calls={} total={}ms avg={}ms min={}ms max={}ms",
            unit,
            row.meter_name,
            section_label(row),
            row.tag,
            row.call_count,
            format_millis(row.elapsed_time()),
            format_millis(row.average_elapsed_time()),
            format_millis(row.min_elapsed_time()),
            format_millis(row.max_elapsed_time()),
        );
    }
}
