const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// Format a byte count as a human-readable size.
///
/// Sub-TB values render as integers ("500 KB", "10 GB"); TB values carry
/// `precision` fractional digits plus the integer gigabyte equivalent in
/// parentheses, matching the legacy shell output: "2.5 TB (2560 GB)".
pub fn format_size(bytes: u64) -> String {
    format_size_with_precision(bytes, 1)
}

pub fn format_size_with_precision(bytes: u64, precision: usize) -> String {
    if bytes < KIB {
        format!("{bytes} Bytes")
    } else if bytes < MIB {
        format!("{} KB", bytes / KIB)
    } else if bytes < GIB {
        format!("{} MB", bytes / MIB)
    } else if bytes < TIB {
        format!("{} GB", bytes / GIB)
    } else {
        let tb = bytes as f64 / TIB as f64;
        let gb = bytes / GIB;
        format!("{tb:.precision$} TB ({gb} GB)")
    }
}

/// Format a transfer rate in bytes per second.
///
/// Mirrors [`format_size`] unit thresholds with a "/s" suffix; Bytes/s is an
/// integer, every other unit keeps one fractional digit ("45.0 MB/s").
pub fn format_rate(bytes_per_second: f64) -> String {
    let rate = bytes_per_second.max(0.0);
    if rate < KIB as f64 {
        format!("{} Bytes/s", rate as u64)
    } else if rate < MIB as f64 {
        format!("{:.1} KB/s", rate / KIB as f64)
    } else if rate < GIB as f64 {
        format!("{:.1} MB/s", rate / MIB as f64)
    } else if rate < TIB as f64 {
        format!("{:.1} GB/s", rate / GIB as f64)
    } else {
        format!("{:.1} TB/s", rate / TIB as f64)
    }
}

/// Format a duration in seconds as the two most significant non-zero
/// components ("1h 1m", "2d 1h"). Sub-second precision is dropped.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;

    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;

    let components = [
        (days, "d"),
        (hours, "h"),
        (minutes, "m"),
        (secs, "s"),
    ];

    let parts: Vec<String> = components
        .iter()
        .filter(|(value, _)| *value > 0)
        .take(2)
        .map(|(value, suffix)| format!("{value}{suffix}"))
        .collect();

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}
