//! Pipeline orchestration
//!
//! This module provides the public API of nightscore. One `process` call
//! runs a night's bundle through the full chain: resampling → stage
//! segmentation → feature extraction → scoring → insight derivation, and
//! assembles the serializable report. The engine holds only read-only
//! configuration and model parameters, so it can score many nights
//! concurrently from shared references with no coordination.

use crate::config::EngineConfig;
use crate::error::ScoreError;
use crate::features::FeatureExtractor;
use crate::insights::Explainer;
use crate::resample::Resampler;
use crate::scorer::ScoreModel;
use crate::stages::StageSegmenter;
use crate::types::{
    EngineInfo, MetricKind, NightBundle, NightReport, QualityFlag, SignalSet,
};
use crate::{ENGINE_NAME, ENGINE_VERSION};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Score a night with default configuration and the rule-based model
pub fn score_night(bundle: &NightBundle) -> Result<NightReport, ScoreError> {
    NightEngine::new().process(bundle)
}

/// Night-scoring engine with fixed configuration and scoring model.
///
/// Construction is the only mutation point; `process` takes `&self` and
/// per-night runs share nothing mutable.
pub struct NightEngine {
    config: EngineConfig,
    model: ScoreModel,
    instance_id: String,
}

impl Default for NightEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NightEngine {
    /// Engine with default configuration and the rule-based model
    pub fn new() -> Self {
        Self::with_model(EngineConfig::default(), ScoreModel::default())
    }

    /// Engine with a custom configuration and the rule-based model
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_model(config, ScoreModel::default())
    }

    /// Engine with a custom configuration and scoring model
    pub fn with_model(config: EngineConfig, model: ScoreModel) -> Self {
        Self {
            config,
            model,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one night through the full pipeline.
    ///
    /// An empty series for a single metric is recorded as a quality flag and
    /// reduced coverage rather than failing the night; window and stage
    /// contract violations, a scorer coverage-floor breach, and schema
    /// mismatches propagate as errors.
    pub fn process(&self, bundle: &NightBundle) -> Result<NightReport, ScoreError> {
        if bundle.window.duration().num_seconds() <= 0 {
            return Err(ScoreError::InvalidWindow(
                "night window has non-positive duration".into(),
            ));
        }

        let mut signals = SignalSet::default();
        let mut quality_flags = Vec::new();

        for metric in MetricKind::ALL {
            match Resampler::resample(metric, &bundle.series, bundle.window, &self.config) {
                Ok(out) => {
                    if out.dropped_implausible > 0 {
                        push_flag(&mut quality_flags, QualityFlag::DroppedImplausibleSamples);
                    }
                    if out.signal.imputed_count() > 0 {
                        push_flag(&mut quality_flags, QualityFlag::ImputedGaps);
                    }
                    signals.set(out.signal);
                }
                Err(ScoreError::EmptySeries(_)) => {
                    warn!(metric = metric.as_str(), "no usable samples for metric");
                    push_flag(&mut quality_flags, missing_flag(metric));
                }
                Err(e) => return Err(e),
            }
        }

        let stages = StageSegmenter::segment(&bundle.stages, bundle.window)?;
        if stages.unscored_minutes > 0.0 {
            push_flag(&mut quality_flags, QualityFlag::PartialStageCoverage);
        }

        let features = FeatureExtractor::extract(&signals, &stages, &self.config);
        debug!(coverage = features.coverage(), "extracted feature vector");

        let score = self.model.predict(&features, self.config.coverage_floor)?;
        let insights = Explainer::explain(&features, &score, &self.config)?;

        Ok(NightReport {
            engine: EngineInfo {
                name: ENGINE_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            window: bundle.window,
            computed_at: Utc::now(),
            signals,
            stages,
            features,
            score,
            insights,
            quality_flags,
        })
    }
}

fn push_flag(flags: &mut Vec<QualityFlag>, flag: QualityFlag) {
    if !flags.contains(&flag) {
        flags.push(flag);
    }
}

fn missing_flag(metric: MetricKind) -> QualityFlag {
    match metric {
        MetricKind::HeartRate => QualityFlag::MissingHeartRate,
        MetricKind::Hrv => QualityFlag::MissingHrv,
        MetricKind::Spo2 => QualityFlag::MissingSpo2,
        MetricKind::WristTemp => QualityFlag::MissingWristTemp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FeatureName, InsightTag, NightWindow, SensorSample, SensorSeries, SleepStage,
        SourceDevice, StageInterval,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn onset() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 5, 22, 0, 0).unwrap()
    }

    fn night_window() -> NightWindow {
        NightWindow {
            sleep_onset: onset(),
            wake_time: onset() + Duration::minutes(480),
        }
    }

    fn minute_series(metric: MetricKind, values: &[f64]) -> SensorSeries {
        SensorSeries {
            metric,
            device: SourceDevice { device_id: "watch-1".into(), precision: 2 },
            samples: values
                .iter()
                .enumerate()
                .map(|(k, v)| SensorSample {
                    timestamp: onset() + Duration::minutes(k as i64),
                    value: *v,
                })
                .collect(),
        }
    }

    fn iv(stage: SleepStage, start_min: i64, end_min: i64) -> StageInterval {
        StageInterval {
            stage,
            start: onset() + Duration::minutes(start_min),
            end: onset() + Duration::minutes(end_min),
        }
    }

    /// Full-coverage good night: fast HR recovery after onset, healthy HRV,
    /// no desaturations, 25% deep / 20% REM / 45% light / 10% awake.
    fn good_night_bundle() -> NightBundle {
        let hr: Vec<f64> = (0..480)
            .map(|k| if k < 30 { 75.0 - 0.8 * k as f64 } else { 52.0 })
            .collect();
        let hrv: Vec<f64> = (0..480).map(|k| 65.0 + 10.0 * (0.1 * k as f64).sin()).collect();
        let spo2 = vec![97.0; 480];
        let temp: Vec<f64> = (0..480)
            .map(|k| if (300..360).contains(&k) { 36.2 } else { 36.5 })
            .collect();

        let stages = vec![
            iv(SleepStage::Awake, 0, 10),
            iv(SleepStage::Light, 10, 100),
            iv(SleepStage::Deep, 100, 220),
            iv(SleepStage::Light, 220, 300),
            iv(SleepStage::Rem, 300, 396),
            iv(SleepStage::Light, 396, 442),
            iv(SleepStage::Awake, 442, 480),
        ];

        NightBundle {
            window: night_window(),
            series: vec![
                minute_series(MetricKind::HeartRate, &hr),
                minute_series(MetricKind::Hrv, &hrv),
                minute_series(MetricKind::Spo2, &spo2),
                minute_series(MetricKind::WristTemp, &temp),
            ],
            stages,
        }
    }

    /// Same night except for 3 desaturation dips and deep sleep cut to 5%
    fn poor_night_bundle() -> NightBundle {
        let mut bundle = good_night_bundle();

        let mut spo2 = vec![97.0; 480];
        for start in [120usize, 200, 280] {
            for v in spo2.iter_mut().skip(start).take(3) {
                *v = 88.0;
            }
        }
        bundle.series[2] = minute_series(MetricKind::Spo2, &spo2);

        bundle.stages = vec![
            iv(SleepStage::Awake, 0, 10),
            iv(SleepStage::Light, 10, 100),
            iv(SleepStage::Deep, 100, 124),
            iv(SleepStage::Light, 124, 300),
            iv(SleepStage::Rem, 300, 396),
            iv(SleepStage::Light, 396, 442),
            iv(SleepStage::Awake, 442, 480),
        ];
        bundle
    }

    #[test]
    fn good_night_scores_in_the_good_band() {
        let report = score_night(&good_night_bundle()).unwrap();

        assert!(
            report.score.score >= 75.0,
            "expected good band, got {}",
            report.score.score
        );
        assert_eq!(report.score.coverage, 1.0);
        assert_eq!(report.insights, vec![]);
        assert_eq!(report.quality_flags, vec![]);

        // Feature sanity
        assert!((report.features.raw(FeatureName::DeepPct).unwrap() - 0.25).abs() < 1e-9);
        assert!((report.features.raw(FeatureName::HrRecoverySlope).unwrap() + 0.8).abs() < 1e-9);
        assert_eq!(report.features.raw(FeatureName::DesaturationEventCount), Some(0.0));
        assert_eq!(report.stages.fragmentation_index, 2);
    }

    #[test]
    fn desaturations_and_low_deep_sleep_lower_the_score_with_insights() {
        let engine = NightEngine::new();
        let good = engine.process(&good_night_bundle()).unwrap();
        let poor = engine.process(&poor_night_bundle()).unwrap();

        assert!(poor.score.score < good.score.score);
        assert_eq!(poor.features.raw(FeatureName::DesaturationEventCount), Some(3.0));
        assert!((poor.features.raw(FeatureName::DeepPct).unwrap() - 0.05).abs() < 1e-9);

        let tags: Vec<InsightTag> = poor.insights.iter().map(|i| i.tag).collect();
        assert!(tags.contains(&InsightTag::LowDeepSleep));
        assert!(tags.contains(&InsightTag::DesaturationEvents));

        // Ranked by |component| descending
        let magnitude = |tag: InsightTag| {
            let insight = poor.insights.iter().find(|i| i.tag == tag).unwrap();
            poor.score.components[&insight.features[0]].abs()
        };
        assert!(poor.insights.len() >= 2);
        assert!(magnitude(poor.insights[0].tag) >= magnitude(poor.insights[1].tag));
    }

    #[test]
    fn duplicated_stage_interval_fails_the_night() {
        let mut bundle = good_night_bundle();
        // 02:00-02:10 reported twice
        bundle.stages.push(iv(SleepStage::Deep, 240, 250));
        bundle.stages.push(iv(SleepStage::Deep, 240, 250));

        let err = score_night(&bundle).unwrap_err();
        assert!(matches!(err, ScoreError::OverlappingIntervals(_)));
    }

    #[test]
    fn missing_metric_reduces_coverage_without_failing() {
        let mut bundle = good_night_bundle();
        bundle.series.retain(|s| s.metric != MetricKind::Spo2);

        let report = score_night(&bundle).unwrap();
        assert!(report.quality_flags.contains(&QualityFlag::MissingSpo2));
        assert_eq!(report.features.raw(FeatureName::Spo2Mean), None);
        assert_eq!(report.features.raw(FeatureName::DesaturationEventCount), None);
        // 10 of 12 features remain
        assert!((report.score.coverage - 10.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn empty_bundle_cannot_be_scored() {
        let bundle = NightBundle {
            window: night_window(),
            series: vec![],
            stages: vec![],
        };

        let err = score_night(&bundle).unwrap_err();
        assert!(matches!(err, ScoreError::InsufficientData { .. }));
    }

    #[test]
    fn invalid_window_is_rejected_before_any_work() {
        let mut bundle = good_night_bundle();
        bundle.window.wake_time = bundle.window.sleep_onset;

        let err = score_night(&bundle).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidWindow(_)));
    }

    #[test]
    fn report_round_trips_losslessly_through_json() {
        let report = score_night(&good_night_bundle()).unwrap();

        let json = serde_json::to_string(&report).unwrap();
        let loaded: NightReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, loaded);
        assert_eq!(loaded.features.schema_version, report.features.schema_version);
    }

    #[test]
    fn identical_bundles_yield_identical_scores() {
        let engine = NightEngine::new();
        let a = engine.process(&good_night_bundle()).unwrap();
        let b = engine.process(&good_night_bundle()).unwrap();

        assert_eq!(a.score, b.score);
        assert_eq!(a.features, b.features);
        assert_eq!(a.insights, b.insights);
    }

    #[test]
    fn unscored_stage_gaps_are_flagged() {
        let mut bundle = good_night_bundle();
        // Drop the final light interval, leaving 46 unknown minutes
        bundle.stages.remove(5);

        let report = score_night(&bundle).unwrap();
        assert!(report.quality_flags.contains(&QualityFlag::PartialStageCoverage));
        assert_eq!(report.stages.unscored_minutes, 46.0);
    }
}
