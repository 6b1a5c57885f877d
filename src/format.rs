//! Human readable sizes and durations for API responses.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count using binary multiples, e.g. `1.5 KB`
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    // 1023.95 and up would print as "1024.0"
    if (value * 10.0).round() >= 10240.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a duration given in seconds using its two largest components
pub fn format_duration(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let (major, major_unit, minor, minor_unit) = if seconds >= DAY {
        (seconds / DAY, "d", (seconds % DAY) / HOUR, "h")
    } else if seconds >= HOUR {
        (seconds / HOUR, "h", (seconds % HOUR) / MINUTE, "m")
    } else if seconds >= MINUTE {
        (seconds / MINUTE, "m", seconds % MINUTE, "s")
    } else {
        return format!("{}s", seconds);
    };

    if minor == 0 {
        format!("{}{}", major, major_unit)
    } else {
        format!("{}{} {}{}", major, major_unit, minor, minor_unit)
    }
}
