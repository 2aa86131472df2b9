#![allow(dead_code)]

use progress_core::model::{
    AnswerKeyOption, AnswerPart, Chapter, ChapterId, Course, CourseId, Lesson, LessonId,
    LessonKind, Question, QuestionId, QuestionSubmission, QuestionType, QuizSettings,
};
use storage::repository::CatalogRepository;

pub const COURSE: CourseId = CourseId::new(1);
pub const PAID_CHAPTER: ChapterId = ChapterId::new(1);
pub const FREEMIUM_CHAPTER: ChapterId = ChapterId::new(2);

/// Threshold 50, no attempt limit, 24h cooldown. Questions 100 and 101.
pub const QUIZ: LessonId = LessonId::new(10);
/// Freemium text lesson.
pub const TEXT: LessonId = LessonId::new(20);
/// Freemium quiz with a free-text question (200) and a single choice (201).
/// Threshold 100, three attempts, 1h cooldown.
pub const GRADED_QUIZ: LessonId = LessonId::new(21);

pub async fn seed(catalog: &dyn CatalogRepository) {
    catalog
        .upsert_course(&Course {
            id: COURSE,
            title: "Rust ownership".into(),
        })
        .await
        .unwrap();

    let paid = Chapter {
        id: PAID_CHAPTER,
        course_id: COURSE,
        title: "Moves".into(),
        display_order: 1,
        is_freemium: false,
    };
    let freemium = Chapter {
        id: FREEMIUM_CHAPTER,
        course_id: COURSE,
        title: "Preview".into(),
        display_order: 2,
        is_freemium: true,
    };
    catalog.upsert_chapter(&paid).await.unwrap();
    catalog.upsert_chapter(&freemium).await.unwrap();

    let quiz = Lesson::new(
        QUIZ,
        &paid,
        "Checkpoint",
        LessonKind::Quiz,
        1,
        Some(QuizSettings::new(Some(50), None, Some(24)).unwrap()),
    )
    .unwrap();
    let text = Lesson::new(TEXT, &freemium, "Reading", LessonKind::Text, 1, None).unwrap();
    let graded = Lesson::new(
        GRADED_QUIZ,
        &freemium,
        "Explain it",
        LessonKind::Quiz,
        2,
        Some(QuizSettings::new(Some(100), Some(3), Some(1)).unwrap()),
    )
    .unwrap();
    for lesson in [&quiz, &text, &graded] {
        catalog.upsert_lesson(lesson).await.unwrap();
    }

    let questions = [
        Question::new(
            QuestionId::new(100),
            QUIZ,
            QuestionType::SingleChoice,
            1,
            "Who owns a moved value?",
            vec![
                AnswerKeyOption::choice(1, 1, "The receiver", true),
                AnswerKeyOption::choice(2, 2, "The sender", false),
            ],
        )
        .unwrap(),
        Question::new(
            QuestionId::new(101),
            QUIZ,
            QuestionType::TrueOrFalse,
            2,
            "A reference may outlive its referent.",
            vec![
                AnswerKeyOption::choice(3, 1, "True", false),
                AnswerKeyOption::choice(4, 2, "False", true),
            ],
        )
        .unwrap(),
        Question::new(
            QuestionId::new(200),
            GRADED_QUIZ,
            QuestionType::BriefResponse,
            1,
            "Why does a move invalidate the source?",
            Vec::new(),
        )
        .unwrap(),
        Question::new(
            QuestionId::new(201),
            GRADED_QUIZ,
            QuestionType::SingleChoice,
            2,
            "Which trait opts out of moves?",
            vec![
                AnswerKeyOption::choice(5, 1, "Copy", true),
                AnswerKeyOption::choice(6, 2, "Send", false),
            ],
        )
        .unwrap(),
    ];
    for question in &questions {
        catalog.upsert_question(question).await.unwrap();
    }
}

pub fn choice(question: u64, option: u64) -> QuestionSubmission {
    QuestionSubmission::new(QuestionId::new(question), vec![AnswerPart::choice(option)])
}

pub fn text(question: u64, value: &str) -> QuestionSubmission {
    QuestionSubmission::new(QuestionId::new(question), vec![AnswerPart::text(value)])
}

/// One right, one wrong on `QUIZ`.
pub fn half_right() -> Vec<QuestionSubmission> {
    vec![choice(100, 1), choice(101, 3)]
}

/// Free text plus a correct choice on `GRADED_QUIZ`.
pub fn free_text_submission() -> Vec<QuestionSubmission> {
    vec![text(200, "the old binding no longer owns it"), choice(201, 5)]
}
