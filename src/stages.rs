//! Stage segmentation
//!
//! Converts the on-device classifier's stage intervals into per-stage
//! durations and a fragmentation index. Stage data is authoritative:
//! overlapping intervals are a contract violation and are never silently
//! resolved. Gaps between intervals are reported as unscored time, excluded
//! from proportion denominators but included in the total.

use crate::error::ScoreError;
use crate::types::{NightWindow, SleepStage, StageInterval, StageSummary};
use tracing::debug;

/// Segmenter for one night's stage intervals
pub struct StageSegmenter;

impl StageSegmenter {
    /// Summarize validated stage intervals over the night window.
    ///
    /// Intervals must each have `end > start`, lie inside the window, and be
    /// mutually non-overlapping. The stage-duration sum plus unscored time
    /// equals the night duration exactly.
    pub fn segment(
        intervals: &[StageInterval],
        window: NightWindow,
    ) -> Result<StageSummary, ScoreError> {
        let total_minutes = window.duration_minutes();
        if total_minutes <= 0.0 {
            return Err(ScoreError::InvalidWindow(
                "night window has non-positive duration".into(),
            ));
        }

        for iv in intervals {
            if iv.end <= iv.start {
                return Err(ScoreError::InvalidWindow(format!(
                    "stage interval ends at or before its start ({} at {})",
                    iv.stage.as_str(),
                    iv.start
                )));
            }
            if iv.start < window.sleep_onset || iv.end > window.wake_time {
                return Err(ScoreError::InvalidWindow(format!(
                    "stage interval outside the night window ({} {}..{})",
                    iv.stage.as_str(),
                    iv.start,
                    iv.end
                )));
            }
        }

        let mut sorted: Vec<StageInterval> = intervals.to_vec();
        sorted.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

        for pair in sorted.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ScoreError::OverlappingIntervals(format!(
                    "{} {}..{} overlaps {} {}..{}",
                    pair[0].stage.as_str(),
                    pair[0].start,
                    pair[0].end,
                    pair[1].stage.as_str(),
                    pair[1].start,
                    pair[1].end
                )));
            }
        }

        let mut summary = StageSummary {
            awake_minutes: 0.0,
            light_minutes: 0.0,
            deep_minutes: 0.0,
            rem_minutes: 0.0,
            unscored_minutes: 0.0,
            total_minutes,
            fragmentation_index: 0,
        };

        for iv in &sorted {
            let minutes = iv.duration_minutes();
            match iv.stage {
                SleepStage::Awake => summary.awake_minutes += minutes,
                SleepStage::Light => summary.light_minutes += minutes,
                SleepStage::Deep => summary.deep_minutes += minutes,
                SleepStage::Rem => summary.rem_minutes += minutes,
            }
        }
        summary.unscored_minutes = (total_minutes - summary.scored_minutes()).max(0.0);

        // Awake↔sleep flips between consecutive intervals in time order
        summary.fragmentation_index = sorted
            .windows(2)
            .filter(|pair| pair[0].stage.is_sleep() != pair[1].stage.is_sleep())
            .count() as u32;

        if summary.unscored_minutes > 0.0 {
            debug!(
                unscored_minutes = summary.unscored_minutes,
                "night has unclassified stage time"
            );
        }

        Ok(summary)
    }
}
