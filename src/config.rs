//! Engine configuration
//!
//! All thresholds the pipeline depends on live here with documented
//! defaults: grid geometry, plausibility ranges, per-feature population
//! reference ranges used for z-scoring, and the insight bands used by the
//! explainer. The configuration is read-only once the engine is built and
//! passed explicitly into each component, keeping per-night processing
//! side-effect-free and safe to run in parallel.

use crate::error::ScoreError;
use crate::types::{FeatureName, InsightTag, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default grid step: one point per minute
pub const DEFAULT_GRID_STEP_SECS: u32 = 60;

/// Default maximum gap bridged by linear interpolation: 5 minutes
pub const DEFAULT_MAX_GAP_SECS: u32 = 300;

/// Default sleep-onset window for the HR recovery slope: 30 minutes
pub const DEFAULT_ONSET_WINDOW_MINUTES: u32 = 30;

/// Default window used as the pre-sleep temperature baseline: 30 minutes
pub const DEFAULT_TEMP_BASELINE_MINUTES: u32 = 30;

/// Default SpO2 desaturation threshold: below 90%
pub const DEFAULT_DESAT_THRESHOLD_PCT: f64 = 90.0;

/// Default minimum desaturation duration: 2 minutes
pub const DEFAULT_DESAT_MIN_MINUTES: u32 = 2;

/// Default per-feature coverage threshold below which a feature is marked
/// missing instead of computed from insufficient data
pub const DEFAULT_MIN_FEATURE_COVERAGE: f64 = 0.5;

/// Default scorer hard floor: below this feature coverage no score is
/// produced at all
pub const DEFAULT_COVERAGE_FLOOR: f64 = 0.40;

/// Physiologically plausible value ranges per metric. Values outside are
/// dropped before interpolation, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlausibleRanges {
    /// Heart rate, bpm
    pub heart_rate: (f64, f64),
    /// HRV (RMSSD), ms
    pub hrv: (f64, f64),
    /// Blood oxygen saturation, percent
    pub spo2: (f64, f64),
    /// Wrist temperature, celsius
    pub wrist_temp: (f64, f64),
}

impl Default for PlausibleRanges {
    fn default() -> Self {
        Self {
            heart_rate: (25.0, 220.0),
            hrv: (1.0, 350.0),
            spo2: (50.0, 100.0),
            wrist_temp: (30.0, 42.0),
        }
    }
}

impl PlausibleRanges {
    pub fn get(&self, metric: MetricKind) -> (f64, f64) {
        match metric {
            MetricKind::HeartRate => self.heart_rate,
            MetricKind::Hrv => self.hrv,
            MetricKind::Spo2 => self.spo2,
            MetricKind::WristTemp => self.wrist_temp,
        }
    }
}

/// Population reference range for one feature, used for z-scoring in the
/// feature extractor. Per-user baselines can be supplied by swapping this
/// table in a custom config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub mean: f64,
    pub sd: f64,
}

impl ReferenceRange {
    pub fn z_score(&self, raw: f64) -> f64 {
        if self.sd <= 0.0 {
            return 0.0;
        }
        (raw - self.mean) / self.sd
    }
}

/// Which side of an insight band is the concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandKind {
    BelowIsConcern,
    AboveIsConcern,
}

/// Fixed reference band the explainer compares a raw feature value against.
/// Crossing `moderate` emits an insight; crossing `severe` raises its
/// severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsightBand {
    pub feature: FeatureName,
    pub tag: InsightTag,
    pub kind: BandKind,
    pub moderate: f64,
    pub severe: f64,
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resampling grid step, seconds
    pub grid_step_secs: u32,
    /// Largest gap between observed samples bridged by interpolation, seconds
    pub max_gap_secs: u32,
    /// Window after sleep onset over which the HR recovery slope is fit, minutes
    pub onset_window_minutes: u32,
    /// Window whose mean temperature serves as the pre-sleep baseline, minutes
    pub temp_baseline_minutes: u32,
    /// SpO2 value below which a point counts toward a desaturation run
    pub desat_threshold_pct: f64,
    /// Minimum contiguous run length for a desaturation event, minutes
    pub desat_min_minutes: u32,
    /// Signal coverage below which a feature is marked missing
    pub min_feature_coverage: f64,
    /// Feature-vector coverage below which no score is produced
    pub coverage_floor: f64,
    pub plausible: PlausibleRanges,
    pub reference_ranges: BTreeMap<FeatureName, ReferenceRange>,
    pub insight_bands: Vec<InsightBand>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_step_secs: DEFAULT_GRID_STEP_SECS,
            max_gap_secs: DEFAULT_MAX_GAP_SECS,
            onset_window_minutes: DEFAULT_ONSET_WINDOW_MINUTES,
            temp_baseline_minutes: DEFAULT_TEMP_BASELINE_MINUTES,
            desat_threshold_pct: DEFAULT_DESAT_THRESHOLD_PCT,
            desat_min_minutes: DEFAULT_DESAT_MIN_MINUTES,
            min_feature_coverage: DEFAULT_MIN_FEATURE_COVERAGE,
            coverage_floor: DEFAULT_COVERAGE_FLOOR,
            plausible: PlausibleRanges::default(),
            reference_ranges: default_reference_ranges(),
            insight_bands: default_insight_bands(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ScoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to JSON
    pub fn to_json(&self) -> Result<String, ScoreError> {
        serde_json::to_string(self).map_err(ScoreError::JsonError)
    }

    pub fn reference_range(&self, feature: FeatureName) -> Option<&ReferenceRange> {
        self.reference_ranges.get(&feature)
    }
}

/// Adult nocturnal population reference ranges. Stage proportions follow
/// typical hypnogram composition; HR/HRV/SpO2 ranges reflect sleeping
/// wrist-sensor values.
pub fn default_reference_ranges() -> BTreeMap<FeatureName, ReferenceRange> {
    let mut ranges = BTreeMap::new();
    ranges.insert(FeatureName::HrMean, ReferenceRange { mean: 60.0, sd: 8.0 });
    // bpm per minute of decline after onset; more negative = faster recovery
    ranges.insert(FeatureName::HrRecoverySlope, ReferenceRange { mean: -0.2, sd: 0.25 });
    ranges.insert(FeatureName::HrvMean, ReferenceRange { mean: 50.0, sd: 18.0 });
    ranges.insert(FeatureName::HrvVariability, ReferenceRange { mean: 0.12, sd: 0.06 });
    ranges.insert(FeatureName::Spo2Mean, ReferenceRange { mean: 96.0, sd: 1.2 });
    ranges.insert(FeatureName::DesaturationEventCount, ReferenceRange { mean: 1.0, sd: 1.5 });
    ranges.insert(FeatureName::TempDelta, ReferenceRange { mean: 0.3, sd: 0.2 });
    ranges.insert(FeatureName::DeepPct, ReferenceRange { mean: 0.15, sd: 0.06 });
    ranges.insert(FeatureName::RemPct, ReferenceRange { mean: 0.18, sd: 0.06 });
    ranges.insert(FeatureName::LightPct, ReferenceRange { mean: 0.50, sd: 0.12 });
    ranges.insert(FeatureName::AwakePct, ReferenceRange { mean: 0.10, sd: 0.06 });
    ranges.insert(FeatureName::FragmentationIndex, ReferenceRange { mean: 10.0, sd: 6.0 });
    ranges
}

/// Default insight bands for the explainer
pub fn default_insight_bands() -> Vec<InsightBand> {
    vec![
        InsightBand {
            feature: FeatureName::DeepPct,
            tag: InsightTag::LowDeepSleep,
            kind: BandKind::BelowIsConcern,
            moderate: 0.10,
            severe: 0.04,
        },
        InsightBand {
            feature: FeatureName::RemPct,
            tag: InsightTag::LowRemSleep,
            kind: BandKind::BelowIsConcern,
            moderate: 0.12,
            severe: 0.06,
        },
        InsightBand {
            feature: FeatureName::AwakePct,
            tag: InsightTag::ElevatedAwakeTime,
            kind: BandKind::AboveIsConcern,
            moderate: 0.20,
            severe: 0.35,
        },
        InsightBand {
            feature: FeatureName::DesaturationEventCount,
            tag: InsightTag::DesaturationEvents,
            kind: BandKind::AboveIsConcern,
            moderate: 1.0,
            severe: 4.0,
        },
        InsightBand {
            feature: FeatureName::Spo2Mean,
            tag: InsightTag::LowBloodOxygen,
            kind: BandKind::BelowIsConcern,
            moderate: 94.0,
            severe: 92.0,
        },
        InsightBand {
            feature: FeatureName::HrvMean,
            tag: InsightTag::LowHrv,
            kind: BandKind::BelowIsConcern,
            moderate: 30.0,
            severe: 20.0,
        },
        InsightBand {
            feature: FeatureName::HrRecoverySlope,
            tag: InsightTag::PoorHeartRateRecovery,
            kind: BandKind::AboveIsConcern,
            moderate: -0.05,
            severe: 0.10,
        },
        InsightBand {
            feature: FeatureName::HrMean,
            tag: InsightTag::ElevatedHeartRate,
            kind: BandKind::AboveIsConcern,
            moderate: 75.0,
            severe: 85.0,
        },
        InsightBand {
            feature: FeatureName::FragmentationIndex,
            tag: InsightTag::FragmentedSleep,
            kind: BandKind::AboveIsConcern,
            moderate: 15.0,
            severe: 25.0,
        },
        InsightBand {
            feature: FeatureName::TempDelta,
            tag: InsightTag::TemperatureDeviation,
            kind: BandKind::AboveIsConcern,
            moderate: 0.8,
            severe: 1.2,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_feature() {
        let config = EngineConfig::default();
        for feature in FeatureName::ALL {
            assert!(
                config.reference_range(feature).is_some(),
                "missing reference range for {}",
                feature.as_str()
            );
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        let loaded = EngineConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn malformed_config_json_surfaces_score_error() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ScoreError::JsonError(_)));
    }

    #[test]
    fn z_score_uses_reference_mean_and_sd() {
        let range = ReferenceRange { mean: 60.0, sd: 8.0 };
        assert!((range.z_score(68.0) - 1.0).abs() < 1e-12);
        assert!((range.z_score(52.0) + 1.0).abs() < 1e-12);
    }
}
