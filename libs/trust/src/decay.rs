//! Stepped inactivity decay.
//!
//! Computed at read time from `last_activity_at`, never persisted. The
//! milestone table is linearly interpolated; beyond the final milestone the
//! multiplier holds at 0.50, and any trust-positive signal collapses decay
//! back to 1.0 by resetting the activity timestamp.

const MILESTONES: [(f64, f64); 7] = [
    (0.0, 1.00),
    (7.0, 0.92),
    (14.0, 0.83),
    (28.0, 0.75),
    (56.0, 0.67),
    (112.0, 0.58),
    (182.0, 0.50),
];

/// Decay multiplier for a given number of inactive days.
pub fn decay_multiplier(days_inactive: f64) -> f64 {
    if days_inactive <= 0.0 {
        return 1.0;
    }
    let (last_days, last_factor) = MILESTONES[MILESTONES.len() - 1];
    if days_inactive >= last_days {
        return last_factor;
    }
    for window in MILESTONES.windows(2) {
        let (from_days, from_factor) = window[0];
        let (to_days, to_factor) = window[1];
        if days_inactive <= to_days {
            let progress = (days_inactive - from_days) / (to_days - from_days);
            return from_factor + (to_factor - from_factor) * progress;
        }
    }
    last_factor
}
