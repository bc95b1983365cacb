//! Prometheus counters for measurement loss

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_gauge, Counter, Encoder, Gauge, TextEncoder};

// ── Recording ────────────────────────────────────────────────────────────────

pub static SECTIONS_DROPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadmeter_sections_dropped_total",
        "Sections dropped because a meter slot was full"
    )
    .unwrap()
});

pub static UNMATCHED_ENDS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadmeter_unmatched_end_total",
        "End calls without a matching begin"
    )
    .unwrap()
});

pub static UNCLOSED_SECTIONS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadmeter_unclosed_sections_total",
        "Sections still open when their frame ended"
    )
    .unwrap()
});

pub static GPU_PENDING_DISCARDED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadmeter_gpu_pending_discarded_total",
        "GPU sections whose results never arrived before their slot was reused"
    )
    .unwrap()
});

// ── Aggregation ──────────────────────────────────────────────────────────────

pub static ROWS_DROPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadmeter_rows_dropped_total",
        "Sections not aggregated because the profile table was full"
    )
    .unwrap()
});

pub static LAST_FRAME_SECONDS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "loadmeter_last_frame_seconds",
        "Duration of the most recently completed frame"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_counters() {
        SECTIONS_DROPPED.inc_by(0.0);
        ROWS_DROPPED.inc_by(0.0);
        let text = encode_metrics().unwrap();
        assert!(text.contains("loadmeter_sections_dropped_total"));
        assert!(text.contains("loadmeter_rows_dropped_total"));
    }
}
