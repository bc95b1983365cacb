//! Output formatting utilities for CLI commands

use colored::Colorize;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a section heading
pub fn heading(msg: &str) {
    println!("\n{}", msg.bold().underline());
}

/// Print an aligned `label: value` line
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<28} {}", format!("{}:", label).dimmed(), value);
}
