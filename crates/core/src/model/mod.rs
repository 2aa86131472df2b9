mod answer;
mod course;
mod ids;
mod progress;
mod question;

pub use ids::{ChapterId, CourseId, LessonId, OptionId, ParseIdError, PaymentRef, QuestionId, StudentId};

pub use answer::{AnswerPart, GradingState, ManualEvaluation, QuestionSubmission, StudentAnswer};
pub use course::{
    CatalogError, Chapter, ChapterOutline, Course, CourseOutline, Lesson, LessonKind, QuizSettings,
};
pub use progress::{
    ChapterProgress, CourseEnrollment, CourseProgressStatus, FIRST_ATTEMPT, LessonProgress,
    QuizAttempt,
};
pub use question::{AnswerKeyOption, GradingRule, Question, QuestionError, QuestionType};
