use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();
static VERBOSE_OVERRIDE: AtomicBool = AtomicBool::new(false);

fn base_debug_enabled() -> bool {
    *DEBUG_ENABLED.get_or_init(|| {
        cfg!(debug_assertions) || std::env::var("MCPDIFF_DEBUG").as_deref() == Ok("1")
    })
}

/// Forces debug logging on for the rest of the process, as `--verbose` does.
pub fn set_verbose(enabled: bool) {
    VERBOSE_OVERRIDE.store(enabled, Ordering::Relaxed);
}

fn is_debug_enabled() -> bool {
    base_debug_enabled() || VERBOSE_OVERRIDE.load(Ordering::Relaxed)
}

/// Prints a debug message to stderr, prefixed, when debug logging is enabled
/// (debug build, `MCPDIFF_DEBUG=1`, or `--verbose`).
pub fn debug_log(msg: &str) {
    if is_debug_enabled() {
        eprintln!("[mcpdiff] {msg}");
    }
}

/// Current UTC time as ISO-8601 with millisecond precision and a `Z` suffix.
pub fn now_iso8601_millis() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Hexadecimal representation of the current Unix epoch time in nanoseconds,
/// used as a uniqueness suffix for reject-path snapshot filenames.
pub fn hex_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{:x}", now.as_nanos())
}

/// Parses a time filter like `30s`, `5m`, `2d`, or `3d1h` into a duration.
/// Accepts a concatenation of `<digits><unit>` pairs (`s`/`m`/`h`/`d`), summing
/// their seconds. Returns `None` if the string contains no valid pair.
pub fn parse_time_filter(time_str: &str) -> Option<std::time::Duration> {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| regex::Regex::new(r"(\d+)\s*([smhd])").unwrap());

    let mut seconds: u64 = 0;
    let mut matched_any = false;
    for caps in pattern.captures_iter(time_str) {
        matched_any = true;
        let value: u64 = caps[1].parse().ok()?;
        let unit = &caps[2];
        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86400,
            _ => unreachable!("regex only captures s/m/h/d"),
        };
        seconds = seconds.saturating_add(value.saturating_mul(multiplier));
    }

    if matched_any {
        Some(std::time::Duration::from_secs(seconds))
    } else {
        debug_log(&format!("invalid time filter format: {time_str}"));
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_unit() {
        assert_eq!(parse_time_filter("30s").unwrap().as_secs(), 30);
        assert_eq!(parse_time_filter("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_time_filter("2d").unwrap().as_secs(), 172800);
    }

    #[test]
    fn parses_compound_unit() {
        assert_eq!(parse_time_filter("3d1h").unwrap().as_secs(), 3 * 86400 + 3600);
    }

    #[test]
    fn rejects_invalid_format() {
        assert!(parse_time_filter("banana").is_none());
    }

    #[test]
    fn hex_timestamp_is_lowercase_hex() {
        let a = hex_timestamp();
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn iso_timestamp_has_millis_and_z_suffix() {
        let ts = now_iso8601_millis();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('.'));
    }
}
