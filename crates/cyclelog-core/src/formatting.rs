//! Number and duration formatting for reports.

/// Format `value` with thousands separators and `decimals` fixed places.
///
/// ```
/// use cyclelog_core::formatting::format_number;
///
/// assert_eq!(format_number(1234.5, 1), "1,234.5");
/// assert_eq!(format_number(-4352.0, 0), "-4,352");
/// ```
pub fn format_number(value: f64, decimals: u32) -> String {
    let fixed = format!("{:.prec$}", round_to(value.abs(), decimals), prec = decimals as usize);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };
    let mut out = String::with_capacity(fixed.len() + int_part.len() / 3 + 1);
    if value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    // Nudge by a relative epsilon so values like 1.005 round up.
    let nudge = f64::EPSILON * value.abs() * factor;
    ((value * factor) + nudge.copysign(value)).round() / factor
}

/// Render a span of seconds as `"3d 4h 5m"`, omitting leading zero units.
///
/// ```
/// use cyclelog_core::formatting::format_duration;
///
/// assert_eq!(format_duration(59.0), "0m");
/// assert_eq!(format_duration(3_900.0), "1h 5m");
/// assert_eq!(format_duration(90_000.0), "1d 1h 0m");
/// ```
pub fn format_duration(seconds: f64) -> String {
    let total_mins = (seconds.max(0.0) / 60.0).floor() as u64;
    let days = total_mins / 1_440;
    let hours = (total_mins % 1_440) / 60;
    let mins = total_mins % 60;
    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}

/// `part / whole` as a percentage rounded to `decimals`; `0.0` when
/// `whole` is zero.
pub fn percentage(part: f64, whole: f64, decimals: u32) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    round_to(part / whole * 100.0, decimals)
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i != 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
