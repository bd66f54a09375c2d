//! Sleep scoring
//!
//! Maps a feature vector to a 0-100 score with per-feature signed
//! contributions. Two interchangeable strategies sit behind one closed enum:
//! a rule-based weighted combination with fixed documented weights, and a
//! frozen linear regressor trained offline and consumed here only through
//! its inference contract. Both gate on the feature schema version and on a
//! hard coverage floor; below the floor no score is produced at all.

use crate::error::ScoreError;
use crate::types::{FeatureName, FeatureVector, SleepScoreResult, FEATURE_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a feature's z-score relates to sleep quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
    /// Deviation in either direction is the concern (e.g. light-sleep share)
    NearTargetIsBetter,
}

/// One entry in the rule-based weight table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleWeight {
    pub feature: FeatureName,
    pub weight: f64,
    pub direction: Direction,
}

/// Rule-based scorer: weighted combination of per-feature unit scores.
///
/// A present feature's z-score maps to a unit score in [0,1]
/// (`0.5 + z/3` oriented by direction, `1 - |z|/3` for near-target
/// features), so an average night lands near 50 and ±3 SD saturates the
/// scale. The weighted mean is renormalized over present features; missing
/// features shift weight instead of dragging the score toward zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleModel {
    pub schema_version: u32,
    pub weights: Vec<RuleWeight>,
}

impl Default for RuleModel {
    fn default() -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            weights: default_rule_weights(),
        }
    }
}

/// Documented default weights, summing to 1.0. Deep-sleep share and the
/// post-onset HR recovery slope carry the most weight as the strongest
/// restorative-sleep markers; temperature and light-sleep share the least.
pub fn default_rule_weights() -> Vec<RuleWeight> {
    use Direction::{HigherIsBetter, LowerIsBetter, NearTargetIsBetter};
    vec![
        RuleWeight { feature: FeatureName::DeepPct, weight: 0.18, direction: HigherIsBetter },
        RuleWeight { feature: FeatureName::HrRecoverySlope, weight: 0.15, direction: LowerIsBetter },
        RuleWeight { feature: FeatureName::RemPct, weight: 0.12, direction: HigherIsBetter },
        RuleWeight { feature: FeatureName::HrvMean, weight: 0.10, direction: HigherIsBetter },
        RuleWeight { feature: FeatureName::DesaturationEventCount, weight: 0.10, direction: LowerIsBetter },
        RuleWeight { feature: FeatureName::Spo2Mean, weight: 0.08, direction: HigherIsBetter },
        RuleWeight { feature: FeatureName::AwakePct, weight: 0.08, direction: LowerIsBetter },
        RuleWeight { feature: FeatureName::FragmentationIndex, weight: 0.07, direction: LowerIsBetter },
        RuleWeight { feature: FeatureName::HrMean, weight: 0.05, direction: LowerIsBetter },
        RuleWeight { feature: FeatureName::HrvVariability, weight: 0.03, direction: HigherIsBetter },
        RuleWeight { feature: FeatureName::TempDelta, weight: 0.02, direction: LowerIsBetter },
        RuleWeight { feature: FeatureName::LightPct, weight: 0.02, direction: NearTargetIsBetter },
    ]
}

/// Frozen linear regressor artifact produced by offline training. Loaded
/// read-only; training itself is an external collaborator's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub schema_version: u32,
    pub intercept: f64,
    pub coefficients: BTreeMap<FeatureName, f64>,
}

impl LinearModel {
    /// Load a frozen model from JSON, rejecting malformed artifacts
    pub fn from_json(json: &str) -> Result<Self, ScoreError> {
        let model: LinearModel = serde_json::from_str(json)?;
        if !model.intercept.is_finite() {
            return Err(ScoreError::ModelError("non-finite intercept".into()));
        }
        if let Some((name, _)) = model
            .coefficients
            .iter()
            .find(|(_, c)| !c.is_finite())
        {
            return Err(ScoreError::ModelError(format!(
                "non-finite coefficient for {}",
                name.as_str()
            )));
        }
        Ok(model)
    }

    pub fn to_json(&self) -> Result<String, ScoreError> {
        serde_json::to_string(self).map_err(ScoreError::JsonError)
    }
}

/// Closed set of scoring strategies behind one predict entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScoreModel {
    Rule(RuleModel),
    Learned(LinearModel),
}

impl Default for ScoreModel {
    fn default() -> Self {
        ScoreModel::Rule(RuleModel::default())
    }
}

impl ScoreModel {
    pub fn schema_version(&self) -> u32 {
        match self {
            ScoreModel::Rule(m) => m.schema_version,
            ScoreModel::Learned(m) => m.schema_version,
        }
    }

    /// Score a feature vector.
    ///
    /// Fails with `SchemaMismatch` for an unrecognized schema version and
    /// with `InsufficientData` when feature coverage is below
    /// `coverage_floor`; a low-confidence number is never returned silently.
    pub fn predict(
        &self,
        features: &FeatureVector,
        coverage_floor: f64,
    ) -> Result<SleepScoreResult, ScoreError> {
        let expected = self.schema_version();
        if features.schema_version != expected {
            return Err(ScoreError::SchemaMismatch {
                got: features.schema_version,
                expected,
            });
        }

        let coverage = features.coverage();
        if coverage < coverage_floor {
            return Err(ScoreError::InsufficientData { got: coverage, floor: coverage_floor });
        }

        match self {
            ScoreModel::Rule(model) => rule_predict(model, features, coverage),
            ScoreModel::Learned(model) => linear_predict(model, features, coverage),
        }
    }
}

fn unit_score(z: f64, direction: Direction) -> f64 {
    match direction {
        Direction::HigherIsBetter => (0.5 + z / 3.0).clamp(0.0, 1.0),
        Direction::LowerIsBetter => (0.5 - z / 3.0).clamp(0.0, 1.0),
        Direction::NearTargetIsBetter => (1.0 - z.abs() / 3.0).clamp(0.0, 1.0),
    }
}

fn rule_predict(
    model: &RuleModel,
    features: &FeatureVector,
    coverage: f64,
) -> Result<SleepScoreResult, ScoreError> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut components = BTreeMap::new();

    for entry in &model.weights {
        let Some(z) = features.normalized(entry.feature) else {
            continue;
        };
        let u = unit_score(z, entry.direction);
        weighted_sum += entry.weight * u;
        weight_total += entry.weight;
        components.insert(entry.feature, entry.weight * (u - 0.5));
    }

    if weight_total <= 0.0 {
        return Err(ScoreError::ModelError(
            "weight table covers no present feature".into(),
        ));
    }

    let score = 100.0 * (weighted_sum / weight_total).clamp(0.0, 1.0);
    Ok(SleepScoreResult {
        score,
        coverage,
        components,
        schema_version: model.schema_version,
    })
}

fn linear_predict(
    model: &LinearModel,
    features: &FeatureVector,
    coverage: f64,
) -> Result<SleepScoreResult, ScoreError> {
    let mut score = model.intercept;
    let mut components = BTreeMap::new();

    for (feature, coefficient) in &model.coefficients {
        let Some(z) = features.normalized(*feature) else {
            continue;
        };
        let contribution = coefficient * z;
        score += contribution;
        components.insert(*feature, contribution);
    }

    Ok(SleepScoreResult {
        score: score.clamp(0.0, 100.0),
        coverage,
        components,
        schema_version: model.schema_version,
    })
}
