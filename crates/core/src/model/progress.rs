use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::course::LessonKind;
use crate::model::ids::{ChapterId, CourseId, LessonId, PaymentRef, StudentId};
use crate::scoring::QuizOutcome;

/// Attempt counter value for a lesson that has never been retaken.
pub const FIRST_ATTEMPT: u32 = 1;

//
// ─── LESSON PROGRESS ──────────────────────────────────────────────────────────
//

/// Per (student, lesson) progress row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub student_id: StudentId,
    pub lesson_id: LessonId,
    pub chapter_id: ChapterId,
    pub is_started: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_question_count: u32,
    /// `Some` for quiz lessons only.
    pub quiz_score: Option<u8>,
    pub is_quiz_passed: bool,
    pub attempts: u32,
    /// When the last scored submission happened; drives retake cooldowns.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    /// Zeroed row, as created at enrollment or on a freemium learner's first visit.
    #[must_use]
    pub fn new(
        student_id: StudentId,
        lesson_id: LessonId,
        chapter_id: ChapterId,
        kind: LessonKind,
    ) -> Self {
        Self {
            student_id,
            lesson_id,
            chapter_id,
            is_started: false,
            completed_at: None,
            completed_question_count: 0,
            quiz_score: kind.is_quiz().then_some(0),
            is_quiz_passed: false,
            attempts: FIRST_ATTEMPT,
            last_attempt_at: None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns `true` if the row changed.
    pub fn mark_started(&mut self) -> bool {
        let changed = !self.is_started;
        self.is_started = true;
        changed
    }

    /// Completion for lessons that complete on view. Returns `true` if the row changed.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> bool {
        let started = self.mark_started();
        if self.completed_at.is_some() {
            return started;
        }
        self.completed_at = Some(now);
        true
    }

    /// First scored submission: completes the lesson and starts the cooldown clock.
    pub fn record_submission(&mut self, outcome: &QuizOutcome, now: DateTime<Utc>) {
        self.is_started = true;
        self.completed_at = Some(now);
        self.last_attempt_at = Some(now);
        self.overwrite_outcome(outcome);
    }

    /// Regrade path: overwrite the quiz fields, keep completion and cooldown timestamps.
    pub fn overwrite_outcome(&mut self, outcome: &QuizOutcome) {
        self.completed_question_count = outcome.question_count();
        self.quiz_score = Some(outcome.score());
        self.is_quiz_passed = outcome.is_passed();
    }

    /// Clears the quiz result so the learner can answer again.
    pub fn reset_for_retake(&mut self) {
        self.completed_at = None;
        self.completed_question_count = 0;
        self.quiz_score = Some(0);
        self.is_quiz_passed = false;
        self.attempts = self.attempts.saturating_add(1);
    }
}

//
// ─── CHAPTER PROGRESS ─────────────────────────────────────────────────────────
//

/// Per (student, chapter) aggregate, present only for enrolled students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProgress {
    pub student_id: StudentId,
    pub chapter_id: ChapterId,
    pub course_id: CourseId,
    pub completed_lesson_count: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChapterProgress {
    #[must_use]
    pub fn new(student_id: StudentId, chapter_id: ChapterId, course_id: CourseId) -> Self {
        Self {
            student_id,
            chapter_id,
            course_id,
            completed_lesson_count: 0,
            completed_at: None,
        }
    }
}

//
// ─── COURSE ENROLLMENT ────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl CourseProgressStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CourseProgressStatus::NotStarted => "not_started",
            CourseProgressStatus::InProgress => "in_progress",
            CourseProgressStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(CourseProgressStatus::NotStarted),
            "in_progress" => Some(CourseProgressStatus::InProgress),
            "completed" => Some(CourseProgressStatus::Completed),
            _ => None,
        }
    }
}

/// Per (student, course) enrollment; anchors every other progress row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseEnrollment {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub payment: Option<PaymentRef>,
    pub enrolled_at: DateTime<Utc>,
    pub finished_chapter_count: u32,
    pub status: CourseProgressStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CourseEnrollment {
    #[must_use]
    pub fn new(
        student_id: StudentId,
        course_id: CourseId,
        payment: Option<PaymentRef>,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id,
            course_id,
            payment,
            enrolled_at,
            finished_chapter_count: 0,
            status: CourseProgressStatus::NotStarted,
            completed_at: None,
        }
    }
}

//
// ─── QUIZ ATTEMPT ─────────────────────────────────────────────────────────────
//

/// History row for one scored quiz attempt. Regrading updates the latest row in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: Option<i64>,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub score: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizAttempt {
    #[must_use]
    pub fn from_outcome(
        student_id: StudentId,
        course_id: CourseId,
        lesson_id: LessonId,
        outcome: &QuizOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            student_id,
            course_id,
            lesson_id,
            correct_answers: outcome.correct_count(),
            wrong_answers: outcome.wrong_count(),
            score: outcome.score(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn overwrite(&mut self, outcome: &QuizOutcome, now: DateTime<Utc>) {
        self.correct_answers = outcome.correct_count();
        self.wrong_answers = outcome.wrong_count();
        self.score = outcome.score();
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn quiz_row() -> LessonProgress {
        LessonProgress::new(
            StudentId::new(1),
            LessonId::new(1),
            ChapterId::new(1),
            LessonKind::Quiz,
        )
    }

    #[test]
    fn new_rows_are_zeroed_by_kind() {
        let quiz = quiz_row();
        assert_eq!(quiz.quiz_score, Some(0));
        assert_eq!(quiz.attempts, FIRST_ATTEMPT);

        let text = LessonProgress::new(
            StudentId::new(1),
            LessonId::new(2),
            ChapterId::new(1),
            LessonKind::Text,
        );
        assert_eq!(text.quiz_score, None);
        assert!(!text.is_completed());
    }

    #[test]
    fn mark_completed_is_idempotent() {
        let mut row = quiz_row();
        let first = fixed_now();
        assert!(row.mark_completed(first));
        assert!(!row.mark_completed(first + chrono::Duration::hours(1)));
        assert_eq!(row.completed_at, Some(first));
    }

    #[test]
    fn retake_keeps_started_and_bumps_attempts() {
        let mut row = quiz_row();
        let outcome = QuizOutcome::from_counts(1, 2, 50);
        row.record_submission(&outcome, fixed_now());
        assert_eq!(row.quiz_score, Some(50));

        row.reset_for_retake();
        assert!(row.is_started);
        assert!(!row.is_completed());
        assert_eq!(row.quiz_score, Some(0));
        assert!(!row.is_quiz_passed);
        assert_eq!(row.attempts, 2);
        assert_eq!(row.last_attempt_at, Some(fixed_now()));
    }

    #[test]
    fn status_round_trips() {
        for s in [
            CourseProgressStatus::NotStarted,
            CourseProgressStatus::InProgress,
            CourseProgressStatus::Completed,
        ] {
            assert_eq!(CourseProgressStatus::parse(s.as_str()), Some(s));
        }
    }
}
