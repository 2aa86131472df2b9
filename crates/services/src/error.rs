//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::evaluator::EvaluationError;
use progress_core::model::{CourseId, LessonId, QuestionId, StudentId};
use progress_core::policy::RetakeDecision;
use progress_core::scoring::ScoringError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `QuizService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizError {
    #[error("lesson {0} not found")]
    LessonNotFound(LessonId),
    #[error("lesson {0} is not a quiz")]
    NotAQuiz(LessonId),
    #[error("student is not assigned to this lesson")]
    NotAssigned,
    #[error("quiz has already been answered")]
    AlreadyCompleted,
    #[error("quiz has not been answered yet")]
    NotYetCompleted,
    #[error("quiz is not completed: {answered} of {expected} questions answered")]
    QuizIncomplete { expected: usize, answered: usize },
    #[error("questions do not belong to this lesson: {question_ids:?}")]
    ForeignQuestion { question_ids: Vec<QuestionId> },
    #[error("retake not allowed: {0:?}")]
    RetakeNotAllowed(RetakeDecision),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Scoring(ScoringError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QuizError {
    /// User-facing rule violations. Only storage faults are worth retrying.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        !matches!(self, QuizError::Storage(_))
    }
}

impl From<ScoringError> for QuizError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::Incomplete { expected, answered } => {
                QuizError::QuizIncomplete { expected, answered }
            }
            ScoringError::UnknownQuestion(id) => QuizError::ForeignQuestion {
                question_ids: vec![id],
            },
            ScoringError::Evaluation(inner) => QuizError::Evaluation(inner),
            other => QuizError::Scoring(other),
        }
    }
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("lesson {0} not found")]
    LessonNotFound(LessonId),
    #[error("student is not assigned to this lesson")]
    NotAssigned,
    #[error("lesson {0} is a quiz and completes on submission")]
    QuizLesson(LessonId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `EnrollmentService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("students already enrolled: {student_ids:?}")]
    AlreadyEnrolled { student_ids: Vec<StudentId> },
    #[error("student is not enrolled in this course")]
    NotEnrolled,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `StatisticsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatisticsError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_errors_map_to_quiz_preconditions() {
        let incomplete = QuizError::from(ScoringError::Incomplete {
            expected: 2,
            answered: 1,
        });
        assert!(matches!(
            incomplete,
            QuizError::QuizIncomplete {
                expected: 2,
                answered: 1
            }
        ));

        let foreign = QuizError::from(ScoringError::UnknownQuestion(QuestionId::new(9)));
        assert!(
            matches!(foreign, QuizError::ForeignQuestion { ref question_ids } if question_ids == &[QuestionId::new(9)])
        );
        assert!(foreign.is_precondition());
    }

    #[test]
    fn storage_faults_are_not_preconditions() {
        let err = QuizError::from(StorageError::Connection("pool timed out".into()));
        assert!(!err.is_precondition());
        assert_eq!(err.to_string(), "connection error: pool timed out");
    }
}
