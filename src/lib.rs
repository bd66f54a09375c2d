//! nightscore - per-night sleep-quality scoring for wrist-wearable biometrics
//!
//! Transforms one night of raw watch streams (heart rate, HRV, SpO2, wrist
//! temperature, sleep stages) into a 0-100 sleep-quality score with
//! per-feature contributions and ranked insights, through a deterministic
//! pipeline: resampling → stage segmentation → feature extraction →
//! scoring → insight derivation.
//!
//! ## Modules
//!
//! - **resample**: irregular multi-device samples onto the uniform night grid
//! - **stages**: stage intervals into durations and a fragmentation index
//! - **features**: the fixed-schema, z-normalized feature vector
//! - **scorer**: rule-based or frozen learned model behind one interface
//! - **insights**: reference-band findings ranked by score contribution
//! - **pipeline**: the `NightEngine` tying it all together
//!
//! Scores of 75 and above are the documented "good sleep" band; 50-75 is
//! fair; below 50 is poor. Missing data is carried as explicit optional
//! values end to end, so a low score can always be distinguished from a
//! low-coverage one.

pub mod config;
pub mod error;
pub mod features;
pub mod insights;
pub mod pipeline;
pub mod resample;
pub mod scorer;
pub mod stages;
pub mod types;

pub use config::EngineConfig;
pub use error::ScoreError;
pub use pipeline::{score_night, NightEngine};
pub use scorer::{LinearModel, RuleModel, ScoreModel};
pub use types::{
    FeatureName, FeatureVector, NightBundle, NightReport, SleepScoreResult,
    FEATURE_SCHEMA_VERSION,
};

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name embedded in every report
pub const ENGINE_NAME: &str = "nightscore";
