//! Demo course used by `progressctl seed` and the CLI tests.

use progress_core::model::{
    AnswerKeyOption, Chapter, ChapterId, Course, CourseId, Lesson, LessonId, LessonKind,
    Question, QuestionId, QuestionType, QuizSettings,
};
use serde::Serialize;
use storage::repository::CatalogRepository;

pub const DEMO_COURSE: CourseId = CourseId::new(1);

pub struct DemoCourse {
    pub course: Course,
    pub chapters: Vec<Chapter>,
    pub lessons: Vec<Lesson>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSummary {
    pub course_id: CourseId,
    pub chapters: usize,
    pub lessons: usize,
    pub questions: usize,
}

/// Two chapters: a paid one ending in a two-question quiz (threshold 50, three
/// attempts, 24h cooldown) and a freemium preview with a manually graded quiz.
///
/// # Errors
///
/// Returns `progress_core::Error` if any catalog entry is inconsistent.
pub fn demo_course() -> Result<DemoCourse, progress_core::Error> {
    let course = Course {
        id: DEMO_COURSE,
        title: "Ownership basics".into(),
    };
    let moves = Chapter {
        id: ChapterId::new(1),
        course_id: DEMO_COURSE,
        title: "Moves and borrows".into(),
        display_order: 1,
        is_freemium: false,
    };
    let preview = Chapter {
        id: ChapterId::new(2),
        course_id: DEMO_COURSE,
        title: "Free preview".into(),
        display_order: 2,
        is_freemium: true,
    };

    let lessons = vec![
        Lesson::new(LessonId::new(1), &moves, "What a move does", LessonKind::Text, 1, None)?,
        Lesson::new(
            LessonId::new(2),
            &moves,
            "Checkpoint",
            LessonKind::Quiz,
            2,
            Some(QuizSettings::new(Some(50), Some(3), Some(24))?),
        )?,
        Lesson::new(LessonId::new(3), &preview, "Why ownership", LessonKind::Video, 1, None)?,
        Lesson::new(
            LessonId::new(4),
            &preview,
            "In your own words",
            LessonKind::Quiz,
            2,
            Some(QuizSettings::new(Some(100), None, None)?),
        )?,
    ];

    let questions = vec![
        Question::new(
            QuestionId::new(1),
            LessonId::new(2),
            QuestionType::SingleChoice,
            1,
            "After `let b = a;` for a `String`, who owns the buffer?",
            vec![
                AnswerKeyOption::choice(1, 1, "b", true),
                AnswerKeyOption::choice(2, 2, "a", false),
            ],
        )?
        .with_solution("Assignment moves ownership; `a` can no longer be used."),
        Question::new(
            QuestionId::new(2),
            LessonId::new(2),
            QuestionType::TrueOrFalse,
            2,
            "A shared reference may outlive the value it points to.",
            vec![
                AnswerKeyOption::choice(3, 1, "True", false),
                AnswerKeyOption::choice(4, 2, "False", true),
            ],
        )?,
        Question::new(
            QuestionId::new(3),
            LessonId::new(4),
            QuestionType::BriefResponse,
            1,
            "Why does Rust not need a garbage collector?",
            Vec::new(),
        )?,
        Question::new(
            QuestionId::new(4),
            LessonId::new(4),
            QuestionType::FillInTheBlanksText,
            2,
            "Every value has exactly one [word].",
            vec![
                AnswerKeyOption::choice(5, 1, "owner", true),
                AnswerKeyOption::choice(6, 2, "borrower", false),
            ],
        )?,
    ];

    Ok(DemoCourse {
        course,
        chapters: vec![moves, preview],
        lessons,
        questions,
    })
}

/// Write the demo course through the catalog. Safe to run repeatedly.
///
/// # Errors
///
/// Returns an error if the demo content is invalid or storage rejects it.
pub async fn seed(catalog: &dyn CatalogRepository) -> anyhow::Result<SeedSummary> {
    let demo = demo_course()?;
    catalog.upsert_course(&demo.course).await?;
    for chapter in &demo.chapters {
        catalog.upsert_chapter(chapter).await?;
    }
    for lesson in &demo.lessons {
        catalog.upsert_lesson(lesson).await?;
    }
    for question in &demo.questions {
        catalog.upsert_question(question).await?;
    }
    tracing::info!(course_id = %demo.course.id, "demo course seeded");

    Ok(SeedSummary {
        course_id: demo.course.id,
        chapters: demo.chapters.len(),
        lessons: demo.lessons.len(),
        questions: demo.questions.len(),
    })
}
