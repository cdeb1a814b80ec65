//! Status messages and build summaries on stderr.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use owo_colors::OwoColorize;

static COLORS: AtomicBool = AtomicBool::new(true);
static QUIET: AtomicBool = AtomicBool::new(false);

/// Whether color output should be enabled, from `NO_COLOR`, `FORCE_COLOR`
/// and terminal detection.
pub fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::user_attended_stderr()
}

pub fn init(no_color: bool, quiet: bool) {
    COLORS.store(!no_color && should_use_color(), Ordering::Relaxed);
    QUIET.store(quiet, Ordering::Relaxed);
}

fn colors() -> bool {
    COLORS.load(Ordering::Relaxed)
}

fn quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

pub fn success(message: &str) {
    if quiet() {
        return;
    }
    if colors() {
        eprintln!("{} {}", "✓".green().bold(), message);
    } else {
        eprintln!("✓ {message}");
    }
}

pub fn info(message: &str) {
    if quiet() {
        return;
    }
    if colors() {
        eprintln!("{} {}", "ℹ".blue().bold(), message);
    } else {
        eprintln!("ℹ {message}");
    }
}

pub fn warning(message: &str) {
    if quiet() {
        return;
    }
    if colors() {
        eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
    } else {
        eprintln!("⚠ {message}");
    }
}

/// Errors are printed even in quiet mode.
pub fn error(message: &str) {
    if colors() {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    } else {
        eprintln!("✗ {message}");
    }
}

/// Human readable byte size, e.g. `1.50 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

/// Human readable duration: `50ms`, `1.50s`, `1m 30s`.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1000 {
        format!("{total_ms}ms")
    } else if total_ms < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// One line per written file, then a total.
pub fn print_summary(files: &[(String, u64)], elapsed: Duration) {
    if quiet() {
        return;
    }
    let width = files.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, size) in files {
        let size = format_size(*size);
        if colors() {
            eprintln!("  {:<width$}  {}", name.cyan(), size.dimmed());
        } else {
            eprintln!("  {name:<width$}  {size}");
        }
    }
    let total: u64 = files.iter().map(|(_, size)| size).sum();
    success(&format!(
        "Wrote {} file{} ({}) in {}",
        files.len(),
        if files.len() == 1 { "" } else { "s" },
        format_size(total),
        format_duration(elapsed)
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1_048_576), "1.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
    }
}
