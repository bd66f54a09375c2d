//! Insight derivation
//!
//! Compares raw feature values against fixed reference bands and ranks the
//! resulting findings by the magnitude of each feature's contribution to
//! the score. Deterministic given identical inputs: no randomness, no
//! hidden state, ties broken by canonical feature order.

use crate::config::{BandKind, EngineConfig, InsightBand};
use crate::error::ScoreError;
use crate::types::{
    FeatureVector, Insight, Severity, SleepScoreResult, FEATURE_SCHEMA_VERSION,
};

/// Explainer for scored nights
pub struct Explainer;

impl Explainer {
    /// Derive ranked insights from a feature vector and its score.
    ///
    /// Rejects vectors of an unrecognized schema version, like the scorer
    /// does: bands tuned for one schema must not be applied to another.
    pub fn explain(
        features: &FeatureVector,
        score: &SleepScoreResult,
        config: &EngineConfig,
    ) -> Result<Vec<Insight>, ScoreError> {
        if features.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ScoreError::SchemaMismatch {
                got: features.schema_version,
                expected: FEATURE_SCHEMA_VERSION,
            });
        }
        if score.schema_version != features.schema_version {
            return Err(ScoreError::SchemaMismatch {
                got: score.schema_version,
                expected: features.schema_version,
            });
        }

        let mut ranked: Vec<(f64, Insight)> = Vec::new();
        for band in &config.insight_bands {
            // A missing feature cannot support a finding
            let Some(raw) = features.raw(band.feature) else {
                continue;
            };
            let Some(severity) = band_severity(band, raw) else {
                continue;
            };
            let magnitude = score
                .components
                .get(&band.feature)
                .map(|c| c.abs())
                .unwrap_or(0.0);
            ranked.push((
                magnitude,
                Insight { tag: band.tag, severity, features: vec![band.feature] },
            ));
        }

        ranked.sort_by(|(ma, ia), (mb, ib)| {
            mb.partial_cmp(ma)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.features.cmp(&ib.features))
        });
        Ok(ranked.into_iter().map(|(_, insight)| insight).collect())
    }
}

fn band_severity(band: &InsightBand, raw: f64) -> Option<Severity> {
    match band.kind {
        BandKind::BelowIsConcern => {
            if raw < band.severe {
                Some(Severity::High)
            } else if raw < band.moderate {
                Some(Severity::Moderate)
            } else {
                None
            }
        }
        BandKind::AboveIsConcern => {
            if raw > band.severe {
                Some(Severity::High)
            } else if raw > band.moderate {
                Some(Severity::Moderate)
            } else {
                None
            }
        }
    }
}
