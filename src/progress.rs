use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::sampler::DiskSample;

/// Default number of recent samples used for the moving-average rate.
pub const DEFAULT_RATE_WINDOW: usize = 3;

/// Progress metrics derived from a baseline and the most recent sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressData {
    pub percent: f64,
    pub remaining_bytes: u64,
    pub moved_bytes: u64,
    pub total_bytes: u64,
    pub rate_bytes_per_second: f64,
    pub etc: Option<DateTime<Utc>>,
}

/// Percentage of the baseline moved so far, clamped to [0, 100].
///
/// A zero baseline means there was nothing to move (100%). A current usage
/// at or above the baseline means no progress has been observed yet (0%).
pub fn calculate_progress(baseline: u64, current: u64) -> f64 {
    if baseline == 0 {
        return 100.0;
    }
    if current >= baseline {
        return 0.0;
    }
    let percent = (baseline - current) as f64 / baseline as f64 * 100.0;
    percent.clamp(0.0, 100.0)
}

/// Bytes still to be moved: `current` while it stays within the baseline.
/// Usage above the baseline means the delta is meaningless (data was added
/// mid-cycle), so nothing is reported as remaining.
pub fn calculate_remaining(baseline: u64, current: u64) -> u64 {
    if current > baseline {
        0
    } else {
        current
    }
}

/// Moving-average transfer rate in bytes per second over the last
/// `window_size` samples.
///
/// Pairs where disk usage stayed flat or grew, or where timestamps do not
/// advance, carry no information about the mover and are skipped. Returns
/// 0.0 when fewer than two samples exist or no pair is valid.
pub fn calculate_rate(samples: &[DiskSample], window_size: usize) -> Result<f64> {
    if window_size < 2 {
        return Err(Error::invalid_argument("window_size must be at least 2"));
    }
    if samples.len() < 2 {
        return Ok(0.0);
    }

    let start = samples.len().saturating_sub(window_size);
    let window = &samples[start..];

    let mut rates = Vec::with_capacity(window.len() - 1);
    for pair in window.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let elapsed = (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            continue;
        }
        if next.bytes_used >= prev.bytes_used {
            continue;
        }
        let moved = (prev.bytes_used - next.bytes_used) as f64;
        rates.push(moved / elapsed);
    }

    if rates.is_empty() {
        return Ok(0.0);
    }
    Ok(rates.iter().sum::<f64>() / rates.len() as f64)
}

/// Estimated time of completion: now + remaining / rate.
///
/// A zero rate yields no estimate; a negative rate is a contract violation.
pub fn calculate_etc(remaining: u64, rate: f64) -> Result<Option<DateTime<Utc>>> {
    if rate < 0.0 {
        return Err(Error::invalid_argument("rate must be non-negative"));
    }
    if rate == 0.0 {
        return Ok(None);
    }
    let seconds = remaining as f64 / rate;
    let millis = (seconds * 1000.0).round() as i64;
    Ok(Some(Utc::now() + Duration::milliseconds(millis)))
}

/// Compose the calculators into a full [`ProgressData`] for one sample tick.
pub fn calculate_progress_data(
    baseline: u64,
    current: u64,
    samples: &[DiskSample],
    window_size: usize,
) -> Result<ProgressData> {
    let percent = calculate_progress(baseline, current);
    let remaining_bytes = calculate_remaining(baseline, current);
    let moved_bytes = baseline.saturating_sub(current);
    let rate = calculate_rate(samples, window_size)?;
    let etc = calculate_etc(remaining_bytes, rate)?;

    Ok(ProgressData {
        percent,
        remaining_bytes,
        moved_bytes,
        total_bytes: baseline,
        rate_bytes_per_second: rate,
        etc,
    })
}

/// Smallest configured threshold crossed by `current_percent` that has not
/// fired yet this cycle. Ascending firing order follows from always picking
/// the smallest.
pub fn evaluate_threshold_crossed(
    current_percent: f64,
    thresholds: &[f64],
    notified: &[f64],
) -> Option<f64> {
    let mut candidates: Vec<f64> = thresholds
        .iter()
        .copied()
        .filter(|t| current_percent >= *t && !notified.contains(t))
        .collect();
    candidates.sort_by(|a, b| a.partial_cmp(b).expect("thresholds are finite"));
    candidates.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(offset_secs: i64, bytes_used: u64) -> DiskSample {
        let base = DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        DiskSample {
            timestamp: base + Duration::seconds(offset_secs),
            bytes_used,
            path_label: "/mnt/cache".to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // calculate_progress
    // -----------------------------------------------------------------------

    #[test]
    fn progress_standard_cases() {
        assert_eq!(calculate_progress(1000, 500), 50.0);
        assert_eq!(calculate_progress(1000, 0), 100.0);
        assert_eq!(calculate_progress(1000, 1000), 0.0);
        assert_eq!(calculate_progress(1000, 250), 75.0);
        assert_eq!(calculate_progress(1024, 768), 25.0);
    }

    #[test]
    fn progress_zero_baseline_means_done() {
        assert_eq!(calculate_progress(0, 0), 100.0);
    }

    #[test]
    fn progress_growth_means_none() {
        assert_eq!(calculate_progress(100, 150), 0.0);
        assert_eq!(calculate_progress(500, 600), 0.0);
    }

    #[test]
    fn progress_always_in_range() {
        for (baseline, current) in [(1u64, 0u64), (u64::MAX, 0), (1024, 1), (7, 6)] {
            let p = calculate_progress(baseline, current);
            assert!((0.0..=100.0).contains(&p), "{baseline}/{current} -> {p}");
        }
    }

    // -----------------------------------------------------------------------
    // calculate_remaining
    // -----------------------------------------------------------------------

    #[test]
    fn remaining_standard_cases() {
        assert_eq!(calculate_remaining(1000, 400), 400);
        assert_eq!(calculate_remaining(1000, 0), 0);
        assert_eq!(calculate_remaining(100, 150), 0);
        assert_eq!(calculate_remaining(0, 0), 0);
    }

    #[test]
    fn moved_plus_remaining_equals_baseline() {
        // Holds whenever current stays within the baseline.
        for (baseline, current) in [(1000u64, 400u64), (1000, 0), (1000, 1000), (1024, 768)] {
            let remaining = calculate_remaining(baseline, current);
            let moved = baseline - current;
            assert_eq!(moved + remaining, baseline);
        }
    }

    // -----------------------------------------------------------------------
    // calculate_rate
    // -----------------------------------------------------------------------

    #[test]
    fn rate_single_interval() {
        let samples = vec![sample(0, 1000), sample(10, 900)];
        let rate = calculate_rate(&samples, DEFAULT_RATE_WINDOW).unwrap();
        assert!((rate - 10.0).abs() < 0.01);
    }

    #[test]
    fn rate_is_mean_over_window() {
        let samples = vec![
            sample(0, 1000),
            sample(10, 800), // 20 B/s
            sample(20, 700), // 10 B/s
        ];
        let rate = calculate_rate(&samples, 3).unwrap();
        assert!((rate - 15.0).abs() < 0.01);
    }

    #[test]
    fn rate_window_limits_samples_used() {
        let samples = vec![
            sample(0, 1000),
            sample(10, 900),
            sample(20, 800),
            sample(30, 600), // last pair: 20 B/s
        ];
        let rate = calculate_rate(&samples, 2).unwrap();
        assert!((rate - 20.0).abs() < 0.01);
    }

    #[test]
    fn rate_skips_flat_and_growing_pairs() {
        let samples = vec![
            sample(0, 1000),
            sample(10, 1100), // grew, skipped
            sample(20, 900),  // 1100 -> 900 over 10s = 20 B/s
        ];
        let rate = calculate_rate(&samples, 3).unwrap();
        assert!((rate - 20.0).abs() < 0.01);
    }

    #[test]
    fn rate_skips_zero_time_delta() {
        let samples = vec![
            sample(0, 1000),
            sample(0, 900),  // same timestamp, skipped
            sample(10, 800), // 900 -> 800 over 10s = 10 B/s
        ];
        let rate = calculate_rate(&samples, 3).unwrap();
        assert!((rate - 10.0).abs() < 0.01);
    }

    #[test]
    fn rate_zero_when_no_valid_pair() {
        let samples = vec![sample(0, 1000), sample(10, 1100), sample(10, 1200)];
        assert_eq!(calculate_rate(&samples, 3).unwrap(), 0.0);
    }

    #[test]
    fn rate_zero_on_insufficient_samples() {
        assert_eq!(calculate_rate(&[], 2).unwrap(), 0.0);
        assert_eq!(calculate_rate(&[sample(0, 1000)], 2).unwrap(), 0.0);
    }

    #[test]
    fn rate_rejects_window_below_two() {
        let samples = vec![sample(0, 1000), sample(10, 900)];
        let err = calculate_rate(&samples, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rate_realistic_45_mb_per_second() {
        let step = 1024 * 1024 * 45u64;
        let start = 1024u64.pow(3);
        let samples = vec![
            sample(0, start),
            sample(1, start - step),
            sample(2, start - step * 2),
        ];
        let rate = calculate_rate(&samples, 3).unwrap();
        assert!((rate - step as f64).abs() / (step as f64) < 0.01);
        assert_eq!(crate::format::format_rate(rate), "45.0 MB/s");
    }

    // -----------------------------------------------------------------------
    // calculate_etc
    // -----------------------------------------------------------------------

    #[test]
    fn etc_standard_case() {
        let before = Utc::now();
        let etc = calculate_etc(1000, 10.0).unwrap().unwrap();
        let expected = before + Duration::seconds(100);
        assert!((etc - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn etc_zero_rate_is_none() {
        assert!(calculate_etc(1000, 0.0).unwrap().is_none());
    }

    #[test]
    fn etc_negative_rate_is_error() {
        assert!(matches!(
            calculate_etc(1000, -1.0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn etc_zero_remaining_is_now() {
        let before = Utc::now();
        let etc = calculate_etc(0, 10.0).unwrap().unwrap();
        assert!((etc - before).num_seconds().abs() < 2);
    }

    // -----------------------------------------------------------------------
    // calculate_progress_data
    // -----------------------------------------------------------------------

    #[test]
    fn progress_data_full_scenario() {
        let samples = vec![
            sample(0, 1000),
            sample(10, 900),
            sample(20, 800),
            sample(30, 700),
        ];
        let data = calculate_progress_data(1000, 500, &samples, 3).unwrap();
        assert!((data.percent - 50.0).abs() < 0.01);
        assert_eq!(data.remaining_bytes, 500);
        assert_eq!(data.moved_bytes, 500);
        assert_eq!(data.total_bytes, 1000);
        assert!((data.rate_bytes_per_second - 10.0).abs() < 0.01);
        assert!(data.etc.is_some());
    }

    #[test]
    fn progress_data_without_rate_has_no_etc() {
        let samples = vec![sample(0, 1000)];
        let data = calculate_progress_data(1000, 500, &samples, 3).unwrap();
        assert_eq!(data.rate_bytes_per_second, 0.0);
        assert!(data.etc.is_none());
    }

    #[test]
    fn progress_data_when_usage_grew() {
        let samples = vec![sample(0, 1000), sample(10, 1200)];
        let data = calculate_progress_data(1000, 1200, &samples, 3).unwrap();
        assert_eq!(data.percent, 0.0);
        assert_eq!(data.remaining_bytes, 0);
        assert_eq!(data.moved_bytes, 0);
        assert_eq!(data.total_bytes, 1000);
    }

    // -----------------------------------------------------------------------
    // evaluate_threshold_crossed
    // -----------------------------------------------------------------------

    #[test]
    fn threshold_picks_smallest_unnotified() {
        let thresholds = [25.0, 50.0, 75.0, 100.0];
        assert_eq!(evaluate_threshold_crossed(40.0, &thresholds, &[]), Some(25.0));
        assert_eq!(
            evaluate_threshold_crossed(60.0, &thresholds, &[25.0]),
            Some(50.0)
        );
        assert_eq!(
            evaluate_threshold_crossed(60.0, &thresholds, &[25.0, 50.0]),
            None
        );
    }

    #[test]
    fn threshold_zero_fires_immediately() {
        let thresholds = [0.0, 25.0, 50.0, 75.0, 100.0];
        assert_eq!(evaluate_threshold_crossed(0.0, &thresholds, &[]), Some(0.0));
    }

    #[test]
    fn threshold_fires_at_most_once() {
        let thresholds = [25.0];
        assert_eq!(evaluate_threshold_crossed(30.0, &thresholds, &[]), Some(25.0));
        assert_eq!(evaluate_threshold_crossed(90.0, &thresholds, &[25.0]), None);
    }
}
