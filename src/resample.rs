//! Resampling onto the uniform night grid
//!
//! This module aligns irregular per-device sensor samples onto a fixed grid:
//! - Implausible values are dropped (never clamped) before anything else
//! - Overlapping device reports are resolved by declared precision
//! - Gaps up to a configured maximum are linearly interpolated and marked
//!   imputed; anything longer stays missing and surfaces as reduced coverage

use crate::config::EngineConfig;
use crate::error::ScoreError;
use crate::types::{GridPoint, MetricKind, NightWindow, ResampledSignal, SensorSeries};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Resampling result plus the bookkeeping the caller records as quality flags
#[derive(Debug, Clone)]
pub struct ResampleOutput {
    pub signal: ResampledSignal,
    /// Samples rejected by the plausibility filter
    pub dropped_implausible: usize,
}

/// Resampler for a single metric over one night window
pub struct Resampler;

impl Resampler {
    /// Align all series of `metric` onto the night grid.
    ///
    /// Fails with `InvalidWindow` when the window has non-positive duration
    /// and with `EmptySeries` when no usable samples remain after filtering;
    /// an all-missing signal is not an acceptable substitute for the latter.
    pub fn resample(
        metric: MetricKind,
        series: &[SensorSeries],
        window: NightWindow,
        config: &EngineConfig,
    ) -> Result<ResampleOutput, ScoreError> {
        let duration_secs = window.duration().num_seconds();
        if duration_secs <= 0 {
            return Err(ScoreError::InvalidWindow(format!(
                "night window has non-positive duration ({duration_secs}s)"
            )));
        }
        if config.grid_step_secs == 0 {
            return Err(ScoreError::InvalidWindow("grid step must be positive".into()));
        }

        let (low, high) = config.plausible.get(metric);
        let mut dropped = 0usize;
        let mut observed: Vec<(DateTime<Utc>, f64, u8)> = Vec::new();

        for s in series.iter().filter(|s| s.metric == metric) {
            for sample in &s.samples {
                if !window.contains(sample.timestamp) {
                    continue;
                }
                if !sample.value.is_finite() || sample.value < low || sample.value > high {
                    dropped += 1;
                    continue;
                }
                observed.push((sample.timestamp, sample.value, s.device.precision));
            }
        }

        if dropped > 0 {
            debug!(metric = metric.as_str(), dropped, "dropped implausible samples");
        }

        let merged = merge_devices(observed);
        if merged.is_empty() {
            return Err(ScoreError::EmptySeries(metric.as_str().to_string()));
        }

        let step = config.grid_step_secs as i64;
        let n = (duration_secs / step) as usize;
        let half_step_ms = step * 1000 / 2;
        let max_gap_ms = config.max_gap_secs as i64 * 1000;

        let mut points = Vec::with_capacity(n);
        for k in 0..n {
            let ts = window.sleep_onset + Duration::seconds(k as i64 * step);
            points.push(grid_point(ts, &merged, half_step_ms, max_gap_ms));
        }

        let signal = ResampledSignal {
            metric,
            step_secs: config.grid_step_secs,
            points,
        };
        Ok(ResampleOutput { signal, dropped_implausible: dropped })
    }
}

/// Resolve same-timestamp reports across devices: highest declared precision
/// wins, ties are averaged. Output timestamps are strictly increasing.
fn merge_devices(mut observed: Vec<(DateTime<Utc>, f64, u8)>) -> Vec<(DateTime<Utc>, f64)> {
    observed.sort_by(|a, b| a.0.cmp(&b.0).then(b.2.cmp(&a.2)));

    let mut merged: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(observed.len());
    let mut i = 0;
    while i < observed.len() {
        let ts = observed[i].0;
        let best_precision = observed[i].2;
        let mut sum = 0.0;
        let mut count = 0usize;
        while i < observed.len() && observed[i].0 == ts {
            if observed[i].2 == best_precision {
                sum += observed[i].1;
                count += 1;
            }
            i += 1;
        }
        merged.push((ts, sum / count as f64));
    }
    merged
}

/// Fill one grid point from the merged sample sequence
fn grid_point(
    ts: DateTime<Utc>,
    merged: &[(DateTime<Utc>, f64)],
    half_step_ms: i64,
    max_gap_ms: i64,
) -> GridPoint {
    let idx = merged.partition_point(|(t, _)| *t < ts);

    // Nearest sample within half a step counts as an observation
    let before = idx.checked_sub(1).map(|i| merged[i]);
    let after = merged.get(idx).copied();
    let nearest = match (before, after) {
        (Some(b), Some(a)) => {
            let db = (ts - b.0).num_milliseconds().abs();
            let da = (a.0 - ts).num_milliseconds().abs();
            if db <= da {
                Some((b, db))
            } else {
                Some((a, da))
            }
        }
        (Some(b), None) => Some((b, (ts - b.0).num_milliseconds().abs())),
        (None, Some(a)) => Some((a, (a.0 - ts).num_milliseconds().abs())),
        (None, None) => None,
    };

    if let Some(((_, value), dist)) = nearest {
        if dist <= half_step_ms {
            return GridPoint { timestamp: ts, value: Some(value), imputed: false };
        }
    }

    // Otherwise interpolate across the surrounding gap, if it is short enough
    if let (Some(prev), Some(next)) = (before, after) {
        let gap_ms = (next.0 - prev.0).num_milliseconds();
        if gap_ms > 0 && gap_ms <= max_gap_ms {
            let frac = (ts - prev.0).num_milliseconds() as f64 / gap_ms as f64;
            let value = prev.1 + (next.1 - prev.1) * frac;
            return GridPoint { timestamp: ts, value: Some(value), imputed: true };
        }
    }

    GridPoint { timestamp: ts, value: None, imputed: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SensorSample, SourceDevice};
    use chrono::TimeZone;

    fn onset() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 5, 22, 0, 0).unwrap()
    }

    fn window(minutes: i64) -> NightWindow {
        NightWindow {
            sleep_onset: onset(),
            wake_time: onset() + Duration::minutes(minutes),
        }
    }

    fn series(
        metric: MetricKind,
        precision: u8,
        samples: &[(i64, f64)],
    ) -> SensorSeries {
        SensorSeries {
            metric,
            device: SourceDevice { device_id: format!("dev-p{precision}"), precision },
            samples: samples
                .iter()
                .map(|(offset_secs, value)| SensorSample {
                    timestamp: onset() + Duration::seconds(*offset_secs),
                    value: *value,
                })
                .collect(),
        }
    }

    #[test]
    fn zero_gap_input_has_no_imputation_and_exact_length() {
        let samples: Vec<(i64, f64)> = (0..60).map(|i| (i * 60, 60.0 + i as f64 * 0.1)).collect();
        let s = series(MetricKind::HeartRate, 1, &samples);
        let config = EngineConfig::default();

        let out = Resampler::resample(MetricKind::HeartRate, &[s], window(60), &config).unwrap();
        assert_eq!(out.signal.points.len(), 60);
        assert!(out.signal.points.iter().all(|p| !p.imputed && p.value.is_some()));
    }

    #[test]
    fn resampling_on_grid_input_is_idempotent() {
        let samples: Vec<(i64, f64)> = (0..30).map(|i| (i * 60, 55.0 + i as f64)).collect();
        let s = series(MetricKind::HeartRate, 1, &samples);
        let config = EngineConfig::default();

        let first = Resampler::resample(MetricKind::HeartRate, &[s], window(30), &config)
            .unwrap()
            .signal;

        // Feed the grid back in as a series at the same step
        let regridded = SensorSeries {
            metric: MetricKind::HeartRate,
            device: SourceDevice { device_id: "grid".into(), precision: 1 },
            samples: first
                .points
                .iter()
                .map(|p| SensorSample { timestamp: p.timestamp, value: p.value.unwrap() })
                .collect(),
        };
        let second =
            Resampler::resample(MetricKind::HeartRate, &[regridded], window(30), &config)
                .unwrap()
                .signal;

        assert_eq!(first, second);
    }

    #[test]
    fn short_gaps_are_interpolated_and_marked() {
        // Samples at minutes 0, 1, 2, then a 3-minute gap to minute 5
        let s = series(
            MetricKind::HeartRate,
            1,
            &[(0, 60.0), (60, 60.0), (120, 60.0), (300, 66.0)],
        );
        let config = EngineConfig::default();

        let out = Resampler::resample(MetricKind::HeartRate, &[s], window(6), &config).unwrap();
        let points = &out.signal.points;

        assert!(!points[2].imputed);
        // Minutes 3 and 4 sit inside a 180s gap (<= 300s max): interpolated
        assert!(points[3].imputed);
        assert!((points[3].value.unwrap() - 62.0).abs() < 1e-9);
        assert!(points[4].imputed);
        assert!((points[4].value.unwrap() - 64.0).abs() < 1e-9);
        assert!(!points[5].imputed);
        assert_eq!(points[5].value, Some(66.0));
    }

    #[test]
    fn long_gaps_stay_missing() {
        // 10-minute gap, beyond the 5-minute default
        let s = series(MetricKind::HeartRate, 1, &[(0, 60.0), (600, 70.0)]);
        let config = EngineConfig::default();

        let out = Resampler::resample(MetricKind::HeartRate, &[s], window(11), &config).unwrap();
        let points = &out.signal.points;

        assert_eq!(points[0].value, Some(60.0));
        for p in &points[1..10] {
            assert_eq!(p.value, None);
            assert!(!p.imputed);
        }
        assert_eq!(points[10].value, Some(70.0));
    }

    #[test]
    fn implausible_values_are_dropped_not_clamped() {
        let s = series(
            MetricKind::HeartRate,
            1,
            &[(0, 60.0), (60, 300.0), (120, 10.0), (180, 62.0)],
        );
        let config = EngineConfig::default();

        let out = Resampler::resample(MetricKind::HeartRate, &[s], window(4), &config).unwrap();
        assert_eq!(out.dropped_implausible, 2);
        // Dropped points are bridged by interpolation, not clamped copies
        assert!(out.signal.points[1].imputed);
        assert!((out.signal.points[1].value.unwrap() - 60.666666).abs() < 1e-3);
    }

    #[test]
    fn higher_precision_device_wins_the_merge() {
        let coarse = series(MetricKind::HeartRate, 1, &[(0, 80.0), (60, 80.0)]);
        let fine = series(MetricKind::HeartRate, 3, &[(0, 60.0), (60, 62.0)]);
        let config = EngineConfig::default();

        let out =
            Resampler::resample(MetricKind::HeartRate, &[coarse, fine], window(2), &config)
                .unwrap();
        assert_eq!(out.signal.points[0].value, Some(60.0));
        assert_eq!(out.signal.points[1].value, Some(62.0));
    }

    #[test]
    fn equal_precision_devices_are_averaged() {
        let a = series(MetricKind::HeartRate, 2, &[(0, 60.0)]);
        let b = series(MetricKind::HeartRate, 2, &[(0, 64.0)]);
        let config = EngineConfig::default();

        let out = Resampler::resample(MetricKind::HeartRate, &[a, b], window(1), &config).unwrap();
        assert_eq!(out.signal.points[0].value, Some(62.0));
    }

    #[test]
    fn non_positive_window_is_rejected() {
        let s = series(MetricKind::HeartRate, 1, &[(0, 60.0)]);
        let config = EngineConfig::default();
        let bad = NightWindow { sleep_onset: onset(), wake_time: onset() };

        let err = Resampler::resample(MetricKind::HeartRate, &[s], bad, &config).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidWindow(_)));
    }

    #[test]
    fn all_filtered_input_is_an_empty_series_error() {
        // Every sample implausible: the caller must be told, not handed an
        // all-missing signal
        let s = series(MetricKind::Spo2, 1, &[(0, 20.0), (60, 150.0)]);
        let config = EngineConfig::default();

        let err = Resampler::resample(MetricKind::Spo2, &[s], window(5), &config).unwrap_err();
        assert!(matches!(err, ScoreError::EmptySeries(_)));
    }
}
