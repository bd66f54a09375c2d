//! Feature extraction
//!
//! Derives the fixed-schema feature vector from resampled signals and the
//! stage summary. Every computation skips missing grid points rather than
//! treating them as zero, carries its own coverage, and marks a feature
//! missing when the underlying coverage falls below the configured
//! threshold. Population z-scoring happens here so the scorer stays
//! model-agnostic.

use crate::config::EngineConfig;
use crate::types::{
    FeatureName, FeatureValue, FeatureVector, ResampledSignal, SignalSet, SleepStage,
    StageSummary,
};

/// Feature extractor for one night
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Compute the schema-version-1 feature vector
    pub fn extract(
        signals: &SignalSet,
        stages: &StageSummary,
        config: &EngineConfig,
    ) -> FeatureVector {
        let mut fv = FeatureVector::new();

        let hr = signals.heart_rate.as_ref();
        put(&mut fv, config, FeatureName::HrMean, mean_feature(hr, config));
        put(
            &mut fv,
            config,
            FeatureName::HrRecoverySlope,
            recovery_slope(hr, config),
        );

        let hrv = signals.hrv.as_ref();
        put(&mut fv, config, FeatureName::HrvMean, mean_feature(hrv, config));
        put(
            &mut fv,
            config,
            FeatureName::HrvVariability,
            coefficient_of_variation(hrv, config),
        );

        let spo2 = signals.spo2.as_ref();
        put(&mut fv, config, FeatureName::Spo2Mean, mean_feature(spo2, config));
        put(
            &mut fv,
            config,
            FeatureName::DesaturationEventCount,
            desaturation_events(spo2, config),
        );

        put(
            &mut fv,
            config,
            FeatureName::TempDelta,
            temp_delta(signals.wrist_temp.as_ref(), config),
        );

        let stage_coverage = stages.coverage();
        for (name, stage) in [
            (FeatureName::DeepPct, SleepStage::Deep),
            (FeatureName::RemPct, SleepStage::Rem),
            (FeatureName::LightPct, SleepStage::Light),
            (FeatureName::AwakePct, SleepStage::Awake),
        ] {
            let raw = if stage_coverage >= config.min_feature_coverage {
                stages.stage_pct(stage)
            } else {
                None
            };
            put(&mut fv, config, name, (raw, stage_coverage));
        }

        let frag = if stage_coverage >= config.min_feature_coverage {
            Some(f64::from(stages.fragmentation_index))
        } else {
            None
        };
        put(&mut fv, config, FeatureName::FragmentationIndex, (frag, stage_coverage));

        fv
    }
}

/// Insert a feature, attaching its population z-score when present
fn put(
    fv: &mut FeatureVector,
    config: &EngineConfig,
    name: FeatureName,
    (raw, coverage): (Option<f64>, f64),
) {
    let normalized = match raw {
        Some(v) => config.reference_range(name).map(|r| r.z_score(v)),
        None => None,
    };
    fv.insert(name, FeatureValue { raw, normalized, coverage });
}

/// Mean over present grid points, gated on signal coverage
fn mean_feature(signal: Option<&ResampledSignal>, config: &EngineConfig) -> (Option<f64>, f64) {
    let Some(signal) = signal else {
        return (None, 0.0);
    };
    let coverage = signal.coverage();
    if coverage < config.min_feature_coverage {
        return (None, coverage);
    }
    let values: Vec<f64> = signal.values().collect();
    if values.is_empty() {
        return (None, coverage);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (Some(mean), coverage)
}

/// Least-squares HR slope (bpm/min) over the first onset-window minutes,
/// a proxy for parasympathetic recovery after sleep onset
fn recovery_slope(signal: Option<&ResampledSignal>, config: &EngineConfig) -> (Option<f64>, f64) {
    let Some(signal) = signal else {
        return (None, 0.0);
    };
    let window_points =
        (config.onset_window_minutes as usize * 60 / signal.step_secs.max(1) as usize).max(1);
    let slice = &signal.points[..window_points.min(signal.points.len())];
    if slice.is_empty() {
        return (None, 0.0);
    }

    let present: Vec<(f64, f64)> = slice
        .iter()
        .enumerate()
        .filter_map(|(k, p)| {
            p.value
                .map(|v| (k as f64 * signal.step_secs as f64 / 60.0, v))
        })
        .collect();
    let coverage = present.len() as f64 / slice.len() as f64;
    if coverage < config.min_feature_coverage || present.len() < 2 {
        return (None, coverage);
    }

    let n = present.len() as f64;
    let mean_x = present.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = present.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in &present {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    if den <= 0.0 {
        return (None, coverage);
    }
    (Some(num / den), coverage)
}

/// Coefficient of variation across the night: sd / mean
fn coefficient_of_variation(
    signal: Option<&ResampledSignal>,
    config: &EngineConfig,
) -> (Option<f64>, f64) {
    let Some(signal) = signal else {
        return (None, 0.0);
    };
    let coverage = signal.coverage();
    if coverage < config.min_feature_coverage {
        return (None, coverage);
    }
    let values: Vec<f64> = signal.values().collect();
    if values.len() < 2 {
        return (None, coverage);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return (None, coverage);
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    (Some(variance.sqrt() / mean), coverage)
}

/// Count contiguous runs below the desaturation threshold lasting at least
/// the configured minimum. A missing grid point terminates a run: continuity
/// cannot be confirmed from absent data.
fn desaturation_events(
    signal: Option<&ResampledSignal>,
    config: &EngineConfig,
) -> (Option<f64>, f64) {
    let Some(signal) = signal else {
        return (None, 0.0);
    };
    let coverage = signal.coverage();
    if coverage < config.min_feature_coverage {
        return (None, coverage);
    }

    let min_points =
        (config.desat_min_minutes as usize * 60 / signal.step_secs.max(1) as usize).max(1);
    let mut events = 0u32;
    let mut run = 0usize;
    for p in &signal.points {
        let in_dip = matches!(p.value, Some(v) if v < config.desat_threshold_pct);
        if in_dip {
            run += 1;
        } else {
            if run >= min_points {
                events += 1;
            }
            run = 0;
        }
    }
    if run >= min_points {
        events += 1;
    }
    (Some(f64::from(events)), coverage)
}

/// Max absolute deviation from the pre-sleep baseline, taken as the mean of
/// the first baseline-window minutes of the temperature grid
fn temp_delta(signal: Option<&ResampledSignal>, config: &EngineConfig) -> (Option<f64>, f64) {
    let Some(signal) = signal else {
        return (None, 0.0);
    };
    let coverage = signal.coverage();
    if coverage < config.min_feature_coverage {
        return (None, coverage);
    }

    let baseline_points =
        (config.temp_baseline_minutes as usize * 60 / signal.step_secs.max(1) as usize).max(1);
    let baseline_values: Vec<f64> = signal.points[..baseline_points.min(signal.points.len())]
        .iter()
        .filter_map(|p| p.value)
        .collect();
    if baseline_values.is_empty() {
        return (None, coverage);
    }
    let baseline = baseline_values.iter().sum::<f64>() / baseline_values.len() as f64;

    let delta = signal
        .values()
        .map(|v| (v - baseline).abs())
        .fold(0.0f64, f64::max);
    (Some(delta), coverage)
}
