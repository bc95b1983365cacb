//! Utility functions and helpers

pub mod time;

use std::time::Duration;

/// Render a duration as milliseconds with microsecond precision (e.g. "2.500")
pub fn format_millis(duration: Duration) -> String {
    format!("{:.3}", duration.as_nanos() as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(Duration::from_micros(2500)), "2.500");
        assert_eq!(format_millis(Duration::ZERO), "0.000");
        assert_eq!(format_millis(Duration::from_nanos(1_234_567)), "1.235");
    }
}
