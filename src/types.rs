//! Core types for the nightscore pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw sensor series, resampled signals, stage summaries, feature
//! vectors, and the scored night report.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the feature schema shared between extractor, scorer and
/// explainer. A model trained against a different version must be rejected.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Biometric stream kinds produced by the watch for one night
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HeartRate,
    Hrv,
    Spo2,
    WristTemp,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Hrv => "hrv",
            MetricKind::Spo2 => "spo2",
            MetricKind::WristTemp => "wrist_temp",
        }
    }

    /// All metric kinds, in canonical order
    pub const ALL: [MetricKind; 4] = [
        MetricKind::HeartRate,
        MetricKind::Hrv,
        MetricKind::Spo2,
        MetricKind::WristTemp,
    ];
}

/// Reporting device. `precision` is the vendor-declared measurement
/// precision rank; a higher value wins when two devices report the same
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDevice {
    pub device_id: String,
    pub precision: u8,
}

/// A single timestamped measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Ordered samples for one metric from one device, restricted to one night
/// window. Timestamps are strictly increasing within a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSeries {
    pub metric: MetricKind,
    pub device: SourceDevice,
    pub samples: Vec<SensorSample>,
}

/// One night window `[sleep_onset, wake_time)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    pub sleep_onset: DateTime<Utc>,
    pub wake_time: DateTime<Utc>,
}

impl NightWindow {
    pub fn duration(&self) -> Duration {
        self.wake_time - self.sleep_onset
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration().num_seconds() as f64 / 60.0
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.sleep_onset && t < self.wake_time
    }
}

/// Sleep stage classification from the on-device classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
}

impl SleepStage {
    pub fn is_sleep(&self) -> bool {
        !matches!(self, SleepStage::Awake)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Awake => "awake",
            SleepStage::Light => "light",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
        }
    }
}

/// One classified stage interval, `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInterval {
    pub stage: SleepStage,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StageInterval {
    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 60.0
    }
}

/// One point on the uniform night grid. A `None` value means the point is
/// missing; values are never fabricated to stand in for absent data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub imputed: bool,
}

/// Fixed-frequency signal over the night grid: exactly one point per grid
/// step, length = night duration / grid step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledSignal {
    pub metric: MetricKind,
    pub step_secs: u32,
    pub points: Vec<GridPoint>,
}

impl ResampledSignal {
    /// Fraction of grid points carrying a value
    pub fn coverage(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let present = self.points.iter().filter(|p| p.value.is_some()).count();
        present as f64 / self.points.len() as f64
    }

    /// Present values in grid order
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().filter_map(|p| p.value)
    }

    /// Number of imputed points
    pub fn imputed_count(&self) -> usize {
        self.points.iter().filter(|p| p.imputed).count()
    }
}

/// Resampled signals for one night, one slot per metric. An empty slot means
/// the metric had no usable data; downstream features derived from it are
/// marked missing, never computed as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub heart_rate: Option<ResampledSignal>,
    pub hrv: Option<ResampledSignal>,
    pub spo2: Option<ResampledSignal>,
    pub wrist_temp: Option<ResampledSignal>,
}

impl SignalSet {
    pub fn get(&self, metric: MetricKind) -> Option<&ResampledSignal> {
        match metric {
            MetricKind::HeartRate => self.heart_rate.as_ref(),
            MetricKind::Hrv => self.hrv.as_ref(),
            MetricKind::Spo2 => self.spo2.as_ref(),
            MetricKind::WristTemp => self.wrist_temp.as_ref(),
        }
    }

    pub fn set(&mut self, signal: ResampledSignal) {
        match signal.metric {
            MetricKind::HeartRate => self.heart_rate = Some(signal),
            MetricKind::Hrv => self.hrv = Some(signal),
            MetricKind::Spo2 => self.spo2 = Some(signal),
            MetricKind::WristTemp => self.wrist_temp = Some(signal),
        }
    }
}

/// Per-night stage durations and continuity summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub awake_minutes: f64,
    pub light_minutes: f64,
    pub deep_minutes: f64,
    pub rem_minutes: f64,
    /// Night time not covered by any interval (unknown stage)
    pub unscored_minutes: f64,
    /// Full night duration, including unscored time
    pub total_minutes: f64,
    /// Count of awake↔sleep flips between consecutive intervals
    pub fragmentation_index: u32,
}

impl StageSummary {
    /// Time covered by classified intervals (proportion denominator)
    pub fn scored_minutes(&self) -> f64 {
        self.awake_minutes + self.light_minutes + self.deep_minutes + self.rem_minutes
    }

    /// Stage proportion of scored time, `None` when nothing was scored
    pub fn stage_pct(&self, stage: SleepStage) -> Option<f64> {
        let scored = self.scored_minutes();
        if scored <= 0.0 {
            return None;
        }
        let minutes = match stage {
            SleepStage::Awake => self.awake_minutes,
            SleepStage::Light => self.light_minutes,
            SleepStage::Deep => self.deep_minutes,
            SleepStage::Rem => self.rem_minutes,
        };
        Some(minutes / scored)
    }

    /// Fraction of the night covered by classified intervals
    pub fn coverage(&self) -> f64 {
        if self.total_minutes <= 0.0 {
            return 0.0;
        }
        self.scored_minutes() / self.total_minutes
    }
}

/// Closed set of features in schema version 1. The declaration order is the
/// canonical feature order used for deterministic iteration and tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    HrMean,
    HrRecoverySlope,
    HrvMean,
    HrvVariability,
    Spo2Mean,
    DesaturationEventCount,
    TempDelta,
    DeepPct,
    RemPct,
    LightPct,
    AwakePct,
    FragmentationIndex,
}

impl FeatureName {
    /// All required features in schema version 1
    pub const ALL: [FeatureName; 12] = [
        FeatureName::HrMean,
        FeatureName::HrRecoverySlope,
        FeatureName::HrvMean,
        FeatureName::HrvVariability,
        FeatureName::Spo2Mean,
        FeatureName::DesaturationEventCount,
        FeatureName::TempDelta,
        FeatureName::DeepPct,
        FeatureName::RemPct,
        FeatureName::LightPct,
        FeatureName::AwakePct,
        FeatureName::FragmentationIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::HrMean => "hr_mean",
            FeatureName::HrRecoverySlope => "hr_recovery_slope",
            FeatureName::HrvMean => "hrv_mean",
            FeatureName::HrvVariability => "hrv_variability",
            FeatureName::Spo2Mean => "spo2_mean",
            FeatureName::DesaturationEventCount => "desaturation_event_count",
            FeatureName::TempDelta => "temp_delta",
            FeatureName::DeepPct => "deep_pct",
            FeatureName::RemPct => "rem_pct",
            FeatureName::LightPct => "light_pct",
            FeatureName::AwakePct => "awake_pct",
            FeatureName::FragmentationIndex => "fragmentation_index",
        }
    }
}

/// One feature slot. `raw`/`normalized` are `None` when the underlying
/// signal coverage fell below the configured threshold; missing is always
/// distinguishable from computed-as-zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub raw: Option<f64>,
    /// Population z-score of `raw` against the reference range
    pub normalized: Option<f64>,
    /// Fraction of the feature's own input window that was present
    pub coverage: f64,
}

impl FeatureValue {
    pub fn missing(coverage: f64) -> Self {
        Self { raw: None, normalized: None, coverage }
    }

    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }
}

/// Fixed-schema feature vector for one night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    pub values: BTreeMap<FeatureName, FeatureValue>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: FeatureName, value: FeatureValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: FeatureName) -> Option<&FeatureValue> {
        self.values.get(&name)
    }

    pub fn raw(&self, name: FeatureName) -> Option<f64> {
        self.values.get(&name).and_then(|v| v.raw)
    }

    pub fn normalized(&self, name: FeatureName) -> Option<f64> {
        self.values.get(&name).and_then(|v| v.normalized)
    }

    /// Fraction of required features present
    pub fn coverage(&self) -> f64 {
        let present = FeatureName::ALL
            .iter()
            .filter(|n| self.values.get(n).map(|v| v.is_present()).unwrap_or(false))
            .count();
        present as f64 / FeatureName::ALL.len() as f64
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::new()
    }
}

/// Scored night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepScoreResult {
    /// Sleep quality score, 0-100
    pub score: f64,
    /// Fraction of required features that were present
    pub coverage: f64,
    /// Signed per-feature contribution to the score
    pub components: BTreeMap<FeatureName, f64>,
    pub schema_version: u32,
}

/// Insight severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Moderate,
    High,
}

/// Insight tags emitted by the explainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightTag {
    LowDeepSleep,
    LowRemSleep,
    ElevatedAwakeTime,
    DesaturationEvents,
    LowBloodOxygen,
    LowHrv,
    PoorHeartRateRecovery,
    ElevatedHeartRate,
    FragmentedSleep,
    TemperatureDeviation,
}

/// A human-readable finding tied to the features that support it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub tag: InsightTag,
    pub severity: Severity,
    pub features: Vec<FeatureName>,
}

/// Non-fatal conditions recorded in the report instead of being logged and
/// discarded, so consumers can audit low-coverage scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    MissingHeartRate,
    MissingHrv,
    MissingSpo2,
    MissingWristTemp,
    ImputedGaps,
    DroppedImplausibleSamples,
    PartialStageCoverage,
}

/// Engine provenance embedded in every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Per-night input bundle handed over by the ingestion collaborator:
/// time-zone-normalized series restricted to the night window, plus the
/// authoritative stage intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightBundle {
    pub window: NightWindow,
    pub series: Vec<SensorSeries>,
    pub stages: Vec<StageInterval>,
}

/// Complete output for one night. Plain structured data: resampled signals
/// for charting, the feature vector for model training, score and insights
/// for presentation. Round-trips losslessly through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightReport {
    pub engine: EngineInfo,
    pub window: NightWindow,
    pub computed_at: DateTime<Utc>,
    pub signals: SignalSet,
    pub stages: StageSummary,
    pub features: FeatureVector,
    pub score: SleepScoreResult,
    pub insights: Vec<Insight>,
    pub quality_flags: Vec<QualityFlag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_coverage_counts_only_present_values() {
        let mut fv = FeatureVector::new();
        fv.insert(
            FeatureName::HrMean,
            FeatureValue { raw: Some(55.0), normalized: Some(-0.6), coverage: 1.0 },
        );
        fv.insert(FeatureName::HrvMean, FeatureValue::missing(0.2));

        // 1 present out of 12 required
        assert!((fv.coverage() - 1.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn stage_pct_excludes_unscored_time() {
        let summary = StageSummary {
            awake_minutes: 30.0,
            light_minutes: 150.0,
            deep_minutes: 60.0,
            rem_minutes: 60.0,
            unscored_minutes: 60.0,
            total_minutes: 360.0,
            fragmentation_index: 2,
        };

        // Denominator is scored time (300), not total (360)
        assert!((summary.stage_pct(SleepStage::Deep).unwrap() - 0.2).abs() < 1e-12);
        assert!((summary.coverage() - 300.0 / 360.0).abs() < 1e-12);
    }

    #[test]
    fn signal_coverage_ignores_missing_points() {
        let t0 = Utc::now();
        let signal = ResampledSignal {
            metric: MetricKind::HeartRate,
            step_secs: 60,
            points: vec![
                GridPoint { timestamp: t0, value: Some(60.0), imputed: false },
                GridPoint {
                    timestamp: t0 + Duration::seconds(60),
                    value: None,
                    imputed: false,
                },
            ],
        };
        assert!((signal.coverage() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn night_bundle_round_trips_and_compares_equal() {
        let t0 = Utc::now();
        let window = NightWindow { sleep_onset: t0, wake_time: t0 + Duration::hours(8) };
        let bundle = NightBundle {
            window,
            series: vec![SensorSeries {
                metric: MetricKind::HeartRate,
                device: SourceDevice { device_id: "watch-1".into(), precision: 1 },
                samples: vec![SensorSample { timestamp: t0, value: 58.0 }],
            }],
            stages: vec![StageInterval {
                stage: SleepStage::Light,
                start: t0,
                end: t0 + Duration::hours(8),
            }],
        };

        assert_eq!(bundle, bundle.clone());

        let json = serde_json::to_string(&bundle).unwrap();
        let loaded: NightBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(bundle, loaded);
    }

    #[test]
    fn feature_values_survive_json_with_full_float_precision() {
        // Values like this one differ in the last ULP under lossy float
        // parsing, which would break report equality after a round trip.
        let value = FeatureValue {
            raw: Some(62.444_588_979_731_684),
            normalized: Some(0.691_365_498_873_426_9),
            coverage: 0.983_333_333_333_333_3,
        };
        let json = serde_json::to_string(&value).unwrap();
        let loaded: FeatureValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, loaded);
    }
}
