//! Rollout strategies.
//!
//! A rollout only ever answers "is this subject in?". Turning that into a
//! flag value is the orchestrator's job.

use crate::bucket::bucket;
use chrono::{DateTime, Utc};
use flagstone_model::{GradualStep, RolloutStrategy};

/// Returns true when the subject is inside the rollout at `at`.
pub fn is_in_rollout(
    strategy: &RolloutStrategy,
    subject_id: &str,
    flag_key: &str,
    at: DateTime<Utc>,
) -> bool {
    match strategy {
        RolloutStrategy::Percentage {
            percentage,
            sticky: true,
        } => within(bucket(subject_id, flag_key), *percentage),
        RolloutStrategy::Percentage {
            percentage,
            sticky: false,
        } => {
            let salt = format!("{flag_key}:{}", at.timestamp_millis());
            within(bucket(subject_id, &salt), *percentage)
        }
        RolloutStrategy::Scheduled {
            start_date,
            end_date,
        } => {
            start_date.map_or(true, |start| at >= start) && end_date.map_or(true, |end| at <= end)
        }
        RolloutStrategy::Gradual { increments } => within(
            bucket(subject_id, flag_key),
            effective_percentage(increments, at),
        ),
    }
}

/// Returns the percentage of the latest step already reached, or 0 before the first.
pub fn effective_percentage(increments: &[GradualStep], at: DateTime<Utc>) -> f64 {
    increments
        .iter()
        .filter(|step| step.date <= at)
        .max_by_key(|step| step.date)
        .map_or(0.0, |step| step.percentage)
}

fn within(bucket: u32, percentage: f64) -> bool {
    f64::from(bucket) < percentage
}
