//! Admission scoring.
//!
//! Each scheduling pass scores every session with queued work and admits from
//! the top. The default blends class weight, available credits, staleness and
//! queue depth; deployments with different priorities swap in their own
//! [`ScoreFn`].

use std::sync::Arc;

use crate::session::{Candidate, PriorityClass};

/// Scoring hook. Higher scores are admitted first.
pub type ScoreFn = Arc<dyn Fn(&Candidate) -> f64 + Send + Sync>;

const WEIGHT_INTERACTIVE: f64 = 100.0;
const WEIGHT_OPERATIONAL: f64 = 50.0;
const WEIGHT_MAINTENANCE: f64 = 10.0;

/// Cap on the staleness contribution, in seconds.
const STALENESS_CAP_SECS: f64 = 60.0;

/// Each queued event adds 5 points, capped at 50.
const QUEUE_DEPTH_POINTS: f64 = 5.0;
const QUEUE_DEPTH_CAP: f64 = 50.0;

pub fn class_weight(class: PriorityClass) -> f64 {
    match class {
        PriorityClass::Interactive => WEIGHT_INTERACTIVE,
        PriorityClass::Operational => WEIGHT_OPERATIONAL,
        PriorityClass::Maintenance => WEIGHT_MAINTENANCE,
    }
}

/// Default admission score.
pub fn default_score(candidate: &Candidate) -> f64 {
    class_weight(candidate.priority_class)
        + candidate.credits
        + candidate.staleness_secs.min(STALENESS_CAP_SECS)
        + (candidate.queue_depth as f64 * QUEUE_DEPTH_POINTS).min(QUEUE_DEPTH_CAP)
}

/// The default score as a [`ScoreFn`].
pub fn default_score_fn() -> ScoreFn {
    Arc::new(default_score)
}
