use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use progress_core::ledger::LedgerReport;
use progress_core::model::{
    Chapter, ChapterProgress, Course, CourseEnrollment, CourseId, CourseOutline, Lesson, LessonId,
    LessonProgress, ManualEvaluation, PaymentRef, Question, QuizAttempt, StudentAnswer, StudentId,
};
use progress_core::scoring::QuizOutcome;
use progress_core::statistics::{
    CourseStatistics, CourseSummaryStats, PurchaseKind, QuizAverage, QuizResultQuery,
    QuizResultRow,
};
use thiserror::Error;

pub use crate::memory::InMemoryRepository;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A guarded write found the row in an unexpected state, or a uniqueness
    /// constraint tripped. Nothing was written.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── CATALOG ──────────────────────────────────────────────────────────────────
//

/// Read/write access to authored course content.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course is missing.
    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the chapter is missing.
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError>;

    /// Persist a question and replace its answer key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson is missing.
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// Questions with their answer keys, in display order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn questions_for_lesson(&self, id: LessonId) -> Result<Vec<Question>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn course_outline(&self, id: CourseId) -> Result<Option<CourseOutline>, StorageError>;
}

//
// ─── PROGRESS READS ───────────────────────────────────────────────────────────
//

/// Result of the assignment check for one lesson and student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonAccess {
    pub lesson: Lesson,
    pub is_enrolled: bool,
    pub is_freemium: bool,
    pub progress: Option<LessonProgress>,
}

impl LessonAccess {
    /// Enrolled students and anyone on a freemium chapter may work on the lesson.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.is_enrolled || self.is_freemium
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.progress
            .as_ref()
            .is_some_and(LessonProgress::is_completed)
    }
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Assignment check. `None` if the lesson does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn lesson_access(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<Option<LessonAccess>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn lesson_progress(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn chapter_progress_for_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ChapterProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn lesson_progress_for_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<LessonProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn enrollment(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<CourseEnrollment>, StorageError>;

    /// Answers in question display order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn answers_for_lesson(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Vec<StudentAnswer>, StorageError>;

    /// Attempt history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn attempts_for_lesson(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Vec<QuizAttempt>, StorageError>;
}

//
// ─── LEDGER WRITES ────────────────────────────────────────────────────────────
//

/// A scored first-time submission, written atomically with its cascade.
#[derive(Debug, Clone)]
pub struct QuizSubmissionWrite {
    pub student_id: StudentId,
    pub lesson: Lesson,
    pub answers: Vec<StudentAnswer>,
    pub outcome: QuizOutcome,
    pub now: DateTime<Utc>,
}

/// Instructor overrides plus what is needed to recompute the outcome in-transaction.
#[derive(Debug, Clone)]
pub struct ManualGradeWrite {
    pub student_id: StudentId,
    pub lesson: Lesson,
    pub evaluations: Vec<ManualEvaluation>,
    pub threshold: u8,
    pub now: DateTime<Utc>,
}

/// Clears a completed quiz. `expected_attempts` guards against concurrent retakes.
#[derive(Debug, Clone)]
pub struct RetakeWrite {
    pub student_id: StudentId,
    pub lesson: Lesson,
    pub expected_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub attempt_id: i64,
    pub report: LedgerReport,
}

/// Transactional progress writes. Every method applies lesson, chapter and course
/// changes together or not at all.
#[async_trait]
pub trait LedgerPersistence: Send + Sync {
    /// Store answers, complete the lesson, append an attempt row and cascade.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the lesson is already completed or an
    /// answer already exists for one of the questions.
    async fn record_submission(
        &self,
        write: &QuizSubmissionWrite,
    ) -> Result<SubmissionReceipt, StorageError>;

    /// Overwrite correctness flags, recount every stored answer, update the
    /// latest attempt (or insert one) and re-apply lesson/chapter/course progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the lesson is not completed.
    async fn apply_manual_grade(&self, write: &ManualGradeWrite)
    -> Result<QuizOutcome, StorageError>;

    /// Delete the student's answers for the lesson and reset its progress row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the lesson is not completed or the
    /// attempt counter moved.
    async fn reset_for_retake(&self, write: &RetakeWrite) -> Result<LessonProgress, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn mark_started(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<LedgerReport, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn mark_completed(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<LedgerReport, StorageError>;
}

//
// ─── ENROLLMENT ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct EnrollmentWrite {
    pub student_id: StudentId,
    pub payment: Option<PaymentRef>,
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Enroll every student or none. Creates progress rows, records the purchase
    /// counter per student and settles aggregates from any freemium progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if any student is already enrolled.
    async fn enroll(
        &self,
        outline: &CourseOutline,
        students: &[EnrollmentWrite],
        now: DateTime<Utc>,
    ) -> Result<Vec<PurchaseKind>, StorageError>;

    /// Remove the enrollment and every progress row and answer under it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the student is not enrolled.
    async fn unenroll(
        &self,
        outline: &CourseOutline,
        student_id: StudentId,
    ) -> Result<(), StorageError>;

    /// Which of `students` are already enrolled in the course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn enrolled_among(
        &self,
        course_id: CourseId,
        students: &[StudentId],
    ) -> Result<Vec<StudentId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn summary_stats(&self, course_id: CourseId) -> Result<CourseSummaryStats, StorageError>;
}

//
// ─── REPORTING ────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn course_statistics(&self, course_id: CourseId)
    -> Result<CourseStatistics, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn average_quiz_scores(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<QuizAverage>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn quiz_results(&self, query: &QuizResultQuery)
    -> Result<Vec<QuizResultRow>, StorageError>;
}

//
// ─── STORAGE ──────────────────────────────────────────────────────────────────
//

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn CatalogRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub ledger: Arc<dyn LedgerPersistence>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wire every repository slot to clones of one backend.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: CatalogRepository
            + ProgressRepository
            + LedgerPersistence
            + EnrollmentRepository
            + StatisticsRepository
            + Clone
            + 'static,
    {
        Self {
            catalog: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            ledger: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            statistics: Arc::new(repo),
        }
    }
}
