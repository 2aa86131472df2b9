//! Derivation rules for chapter and course aggregates.
//!
//! Storage backends count completed rows and hand the counts to these functions
//! instead of applying deltas, so concurrent completions converge on the same
//! state. Completion is sticky: once a chapter or course completes it stays
//! complete until the enrollment is removed.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ChapterProgress, CourseEnrollment, CourseProgressStatus};

/// Counts for one chapter, for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterTally {
    pub lesson_count: u32,
    pub completed_lessons: u32,
}

/// Counts for one course, for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseTally {
    /// Chapters with at least one lesson.
    pub required_chapters: u32,
    pub completed_chapters: u32,
    /// Any lesson in the course started or completed.
    pub has_activity: bool,
}

/// What a single ledger write changed; used for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReport {
    pub lesson_changed: bool,
    pub chapter_completed: bool,
    pub course_completed: bool,
}

/// Apply a recount to a chapter row. Returns `true` if the chapter completed now.
pub fn settle_chapter(
    progress: &mut ChapterProgress,
    tally: ChapterTally,
    now: DateTime<Utc>,
) -> bool {
    let counted = tally.completed_lessons.min(tally.lesson_count);
    progress.completed_lesson_count = progress.completed_lesson_count.max(counted);

    let all_done = tally.lesson_count > 0 && progress.completed_lesson_count >= tally.lesson_count;
    if all_done && progress.completed_at.is_none() {
        progress.completed_at = Some(now);
        return true;
    }
    false
}

/// Apply a recount to a course enrollment. Returns `true` if the course completed now.
pub fn settle_course(
    enrollment: &mut CourseEnrollment,
    tally: CourseTally,
    now: DateTime<Utc>,
) -> bool {
    enrollment.finished_chapter_count = enrollment
        .finished_chapter_count
        .max(tally.completed_chapters);

    if enrollment.status == CourseProgressStatus::Completed {
        return false;
    }

    let finished = tally.required_chapters > 0
        && enrollment.finished_chapter_count >= tally.required_chapters;
    if finished {
        enrollment.status = CourseProgressStatus::Completed;
        enrollment.completed_at = Some(now);
        return true;
    }

    if tally.has_activity || enrollment.finished_chapter_count > 0 {
        enrollment.status = CourseProgressStatus::InProgress;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterId, CourseId, StudentId};
    use crate::time::fixed_now;

    fn chapter() -> ChapterProgress {
        ChapterProgress::new(StudentId::new(1), ChapterId::new(1), CourseId::new(1))
    }

    fn enrollment() -> CourseEnrollment {
        CourseEnrollment::new(StudentId::new(1), CourseId::new(1), None, fixed_now())
    }

    #[test]
    fn chapter_completes_when_every_lesson_is_done() {
        let mut row = chapter();
        let tally = ChapterTally {
            lesson_count: 2,
            completed_lessons: 1,
        };
        assert!(!settle_chapter(&mut row, tally, fixed_now()));
        assert_eq!(row.completed_lesson_count, 1);
        assert!(row.completed_at.is_none());

        let tally = ChapterTally {
            lesson_count: 2,
            completed_lessons: 2,
        };
        assert!(settle_chapter(&mut row, tally, fixed_now()));
        assert_eq!(row.completed_at, Some(fixed_now()));
    }

    #[test]
    fn recounting_a_complete_chapter_is_a_no_op() {
        let mut row = chapter();
        let tally = ChapterTally {
            lesson_count: 1,
            completed_lessons: 1,
        };
        settle_chapter(&mut row, tally, fixed_now());
        let before = row.clone();

        let later = fixed_now() + chrono::Duration::hours(2);
        assert!(!settle_chapter(&mut row, tally, later));
        assert_eq!(row, before);
    }

    #[test]
    fn chapter_counts_never_decrease() {
        let mut row = chapter();
        let full = ChapterTally {
            lesson_count: 2,
            completed_lessons: 2,
        };
        settle_chapter(&mut row, full, fixed_now());

        let after_retake = ChapterTally {
            lesson_count: 2,
            completed_lessons: 1,
        };
        settle_chapter(&mut row, after_retake, fixed_now());
        assert_eq!(row.completed_lesson_count, 2);
        assert!(row.completed_at.is_some());
    }

    #[test]
    fn empty_chapter_never_completes() {
        let mut row = chapter();
        let tally = ChapterTally {
            lesson_count: 0,
            completed_lessons: 0,
        };
        assert!(!settle_chapter(&mut row, tally, fixed_now()));
        assert!(row.completed_at.is_none());
    }

    #[test]
    fn course_moves_through_statuses() {
        let mut row = enrollment();
        let idle = CourseTally {
            required_chapters: 2,
            completed_chapters: 0,
            has_activity: false,
        };
        settle_course(&mut row, idle, fixed_now());
        assert_eq!(row.status, CourseProgressStatus::NotStarted);

        let started = CourseTally {
            has_activity: true,
            ..idle
        };
        settle_course(&mut row, started, fixed_now());
        assert_eq!(row.status, CourseProgressStatus::InProgress);

        let done = CourseTally {
            required_chapters: 2,
            completed_chapters: 2,
            has_activity: true,
        };
        assert!(settle_course(&mut row, done, fixed_now()));
        assert_eq!(row.status, CourseProgressStatus::Completed);
        assert_eq!(row.finished_chapter_count, 2);
        assert!(!settle_course(&mut row, done, fixed_now()));
    }
}
