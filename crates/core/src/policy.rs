use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::QuizSettings;

/// Whether a learner may clear their answers and take a quiz again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetakeDecision {
    Allowed,
    /// Permanent: the attempt limit has been used up.
    AttemptLimitReached { attempts: u32, limit: u32 },
    /// Temporary: allowed again once `until` has passed.
    CoolingDown { until: DateTime<Utc> },
}

impl RetakeDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RetakeDecision::Allowed)
    }
}

/// Decide whether a retake is allowed at `now`.
///
/// The attempt limit is checked first and denies regardless of cooldown. The
/// cooldown is measured from the last scored attempt; no recorded attempt or no
/// cooldown setting means no wait. A manual regrade does not move the last
/// attempt, so it does not restart the cooldown.
///
/// A cooldown that ends past the last representable instant never elapses.
#[must_use]
pub fn retake_decision(
    attempts: u32,
    attempts_limit: Option<u32>,
    last_attempt_at: Option<DateTime<Utc>>,
    cooldown_hours: Option<u32>,
    now: DateTime<Utc>,
) -> RetakeDecision {
    if let Some(limit) = attempts_limit.filter(|limit| attempts >= *limit) {
        return RetakeDecision::AttemptLimitReached { attempts, limit };
    }

    if let (Some(hours), Some(last)) = (cooldown_hours, last_attempt_at) {
        let until = last
            .checked_add_signed(Duration::hours(i64::from(hours)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < until {
            return RetakeDecision::CoolingDown { until };
        }
    }

    RetakeDecision::Allowed
}

/// Boolean form of [`retake_decision`].
#[must_use]
pub fn can_retake(
    attempts: u32,
    attempts_limit: Option<u32>,
    last_attempt_at: Option<DateTime<Utc>>,
    cooldown_hours: Option<u32>,
    now: DateTime<Utc>,
) -> bool {
    retake_decision(attempts, attempts_limit, last_attempt_at, cooldown_hours, now).is_allowed()
}

/// Convenience wrapper reading limits from a lesson's quiz settings.
#[must_use]
pub fn retake_decision_for(
    settings: &QuizSettings,
    attempts: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RetakeDecision {
    retake_decision(
        attempts,
        settings.attempts_limit(),
        last_attempt_at,
        settings.cooldown_hours(),
        now,
    )
}
