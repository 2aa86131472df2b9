use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use progress_core::{
    ledger::LedgerReport,
    model::{ChapterProgress, CourseEnrollment, CourseId, LessonId, LessonProgress, StudentId},
    time::Clock,
};
use storage::repository::{LedgerPersistence, LessonAccess, ProgressRepository};

use crate::error::ProgressError;

/// Everything recorded for one student in one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub enrollment: Option<CourseEnrollment>,
    pub chapters: Vec<ChapterProgress>,
    pub lessons: Vec<LessonProgress>,
}

/// Open/complete tracking for lessons that do not go through quiz scoring.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    progress: Arc<dyn ProgressRepository>,
    ledger: Arc<dyn LedgerPersistence>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        progress: Arc<dyn ProgressRepository>,
        ledger: Arc<dyn LedgerPersistence>,
    ) -> Self {
        Self {
            clock,
            progress,
            ledger,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Record that the student opened the lesson. Repeating it is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::LessonNotFound`, `NotAssigned`, or `Storage`.
    #[instrument(skip(self), fields(lesson_id = %lesson_id, student_id = %student_id))]
    pub async fn mark_lesson_started(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<LedgerReport, ProgressError> {
        let now = self.clock.now();
        let access = self.assigned(lesson_id, student_id).await?;
        let report = self
            .ledger
            .mark_started(student_id, &access.lesson, now)
            .await?;
        if report.lesson_changed {
            info!("lesson started");
        }
        Ok(report)
    }

    /// Complete a text, presentation, video or embed lesson on view and cascade
    /// to chapter and course. Completing twice changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::QuizLesson` for quizzes, which complete through
    /// submission, plus `LessonNotFound`, `NotAssigned`, or `Storage`.
    #[instrument(skip(self), fields(lesson_id = %lesson_id, student_id = %student_id))]
    pub async fn mark_lesson_completed(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<LedgerReport, ProgressError> {
        let now = self.clock.now();
        let access = self.assigned(lesson_id, student_id).await?;
        if access.lesson.kind.is_quiz() {
            return Err(ProgressError::QuizLesson(lesson_id));
        }
        let report = self
            .ledger
            .mark_completed(student_id, &access.lesson, now)
            .await?;
        if report.lesson_changed {
            info!(
                chapter_completed = report.chapter_completed,
                course_completed = report.course_completed,
                "lesson completed"
            );
        }
        Ok(report)
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` on read failures.
    pub async fn course_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressError> {
        Ok(CourseProgress {
            enrollment: self.progress.enrollment(student_id, course_id).await?,
            chapters: self
                .progress
                .chapter_progress_for_course(student_id, course_id)
                .await?,
            lessons: self
                .progress
                .lesson_progress_for_course(student_id, course_id)
                .await?,
        })
    }

    async fn assigned(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<LessonAccess, ProgressError> {
        let access = self
            .progress
            .lesson_access(lesson_id, student_id)
            .await?
            .ok_or(ProgressError::LessonNotFound(lesson_id))?;
        if !access.is_assigned() {
            tracing::warn!("student is not assigned to this lesson");
            return Err(ProgressError::NotAssigned);
        }
        Ok(access)
    }
}
