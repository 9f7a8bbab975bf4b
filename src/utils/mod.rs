//! Formatting and file system helpers shared by the CLI and the pipeline

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Time and duration utilities
pub mod time {
    use super::*;

    /// Format duration as human-readable string
    ///
    /// # Arguments
    /// * `duration` - Duration to format
    ///
    /// # Returns
    /// * `String` - Formatted duration (e.g., "1h 30m 45s")
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();

        if secs == 0 {
            return format!("{}ms", millis);
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        let mut parts = Vec::new();

        if hours > 0 {
            parts.push(format!("{}h", hours));
        }
        if minutes > 0 {
            parts.push(format!("{}m", minutes));
        }
        if seconds > 0 || parts.is_empty() {
            parts.push(format!("{}s", seconds));
        }

        parts.join(" ")
    }

    /// Rows per second over `elapsed`, zero for an empty interval
    pub fn rate_per_sec(rows: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 { rows as f64 / secs } else { 0.0 }
    }
}

/// File system utilities
pub mod fs {
    use super::*;

    /// Expand home directory in path
    ///
    /// # Arguments
    /// * `path` - Path potentially starting with ~
    ///
    /// # Returns
    /// * `PathBuf` - Expanded path
    pub fn expand_home(path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        path.to_path_buf()
    }
}

/// Conversion utilities
pub mod convert {
    /// Format a count with thousands separators (e.g., "1,234,567")
    pub fn format_count(n: u64) -> String {
        let digits = n.to_string();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push(',');
            }
            out.push(c);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(time::format_duration(Duration::from_secs(0)), "0ms");
        assert_eq!(time::format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(time::format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(time::format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_rate_per_sec() {
        assert_eq!(time::rate_per_sec(1000, Duration::from_secs(2)), 500.0);
        assert_eq!(time::rate_per_sec(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_format_count() {
        assert_eq!(convert::format_count(0), "0");
        assert_eq!(convert::format_count(999), "999");
        assert_eq!(convert::format_count(1_000), "1,000");
        assert_eq!(convert::format_count(250_000), "250,000");
        assert_eq!(convert::format_count(12_345_678), "12,345,678");
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("batch_data");
        assert_eq!(fs::expand_home(plain), PathBuf::from("batch_data"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(fs::expand_home(Path::new("~/out")), home.join("out"));
        }
    }
}
