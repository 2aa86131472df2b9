use serde::Serialize;

use crate::model::{CourseId, LessonId, StudentId};
use crate::scoring::QuizOutcome;

/// Published once a quiz submission has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizCompleted {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub correct_answer_count: u32,
    pub wrong_answer_count: u32,
    pub score: u8,
}

impl QuizCompleted {
    #[must_use]
    pub fn new(
        student_id: StudentId,
        course_id: CourseId,
        lesson_id: LessonId,
        outcome: &QuizOutcome,
    ) -> Self {
        Self {
            student_id,
            course_id,
            lesson_id,
            correct_answer_count: outcome.correct_count(),
            wrong_answer_count: outcome.wrong_count(),
            score: outcome.score(),
        }
    }
}
