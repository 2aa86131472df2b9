use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ChapterId, CourseId, LessonId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("threshold score must be between 0 and 100, got {0}")]
    InvalidThreshold(u8),

    #[error("unknown lesson kind: {0}")]
    UnknownLessonKind(String),

    #[error("quiz settings are only allowed on quiz lessons")]
    SettingsOnNonQuiz,
}

//
// ─── COURSE / CHAPTER ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub course_id: CourseId,
    pub title: String,
    pub display_order: u32,
    /// Freemium chapters are open to students who have not purchased the course.
    pub is_freemium: bool,
}

//
// ─── LESSONS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Text,
    Presentation,
    Video,
    Embed,
    Quiz,
}

impl LessonKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonKind::Text => "text",
            LessonKind::Presentation => "presentation",
            LessonKind::Video => "video",
            LessonKind::Embed => "embed",
            LessonKind::Quiz => "quiz",
        }
    }

    /// Parses the storage/wire representation.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::UnknownLessonKind` for unrecognised values.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        match raw {
            "text" => Ok(LessonKind::Text),
            "presentation" => Ok(LessonKind::Presentation),
            "video" => Ok(LessonKind::Video),
            "embed" => Ok(LessonKind::Embed),
            "quiz" => Ok(LessonKind::Quiz),
            other => Err(CatalogError::UnknownLessonKind(other.to_owned())),
        }
    }

    #[must_use]
    pub fn is_quiz(self) -> bool {
        matches!(self, LessonKind::Quiz)
    }
}

/// Pass/retry policy authored on a quiz lesson.
///
/// Every field is optional: a missing threshold always passes, a missing
/// attempts limit allows unlimited retakes, a missing cooldown means no wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawQuizSettings")]
pub struct QuizSettings {
    threshold_score: Option<u8>,
    attempts_limit: Option<u32>,
    cooldown_hours: Option<u32>,
}

#[derive(Deserialize)]
struct RawQuizSettings {
    threshold_score: Option<u8>,
    attempts_limit: Option<u32>,
    cooldown_hours: Option<u32>,
}

impl TryFrom<RawQuizSettings> for QuizSettings {
    type Error = CatalogError;

    fn try_from(raw: RawQuizSettings) -> Result<Self, Self::Error> {
        Self::new(raw.threshold_score, raw.attempts_limit, raw.cooldown_hours)
    }
}

impl QuizSettings {
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidThreshold` if the threshold exceeds 100.
    pub fn new(
        threshold_score: Option<u8>,
        attempts_limit: Option<u32>,
        cooldown_hours: Option<u32>,
    ) -> Result<Self, CatalogError> {
        if let Some(threshold) = threshold_score.filter(|t| *t > 100) {
            return Err(CatalogError::InvalidThreshold(threshold));
        }
        Ok(Self {
            threshold_score,
            attempts_limit,
            cooldown_hours,
        })
    }

    /// Threshold as a percentage; unset reads as zero, which always passes.
    #[must_use]
    pub fn threshold(&self) -> u8 {
        self.threshold_score.unwrap_or(0)
    }

    #[must_use]
    pub fn threshold_score(&self) -> Option<u8> {
        self.threshold_score
    }

    #[must_use]
    pub fn attempts_limit(&self) -> Option<u32> {
        self.attempts_limit
    }

    #[must_use]
    pub fn cooldown_hours(&self) -> Option<u32> {
        self.cooldown_hours
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLesson")]
pub struct Lesson {
    pub id: LessonId,
    pub chapter_id: ChapterId,
    pub course_id: CourseId,
    pub title: String,
    pub kind: LessonKind,
    pub display_order: u32,
    quiz_settings: Option<QuizSettings>,
}

#[derive(Deserialize)]
struct RawLesson {
    id: LessonId,
    chapter_id: ChapterId,
    course_id: CourseId,
    title: String,
    kind: LessonKind,
    display_order: u32,
    quiz_settings: Option<QuizSettings>,
}

impl TryFrom<RawLesson> for Lesson {
    type Error = CatalogError;

    fn try_from(raw: RawLesson) -> Result<Self, Self::Error> {
        Self::from_parts(
            raw.id,
            raw.chapter_id,
            raw.course_id,
            raw.title,
            raw.kind,
            raw.display_order,
            raw.quiz_settings,
        )
    }
}

impl Lesson {
    /// Builds a lesson, rejecting quiz settings on non-quiz kinds.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::SettingsOnNonQuiz` if settings are given for a
    /// lesson that is not a quiz.
    pub fn new(
        id: LessonId,
        chapter: &Chapter,
        title: impl Into<String>,
        kind: LessonKind,
        display_order: u32,
        quiz_settings: Option<QuizSettings>,
    ) -> Result<Self, CatalogError> {
        Self::from_parts(
            id,
            chapter.id,
            chapter.course_id,
            title,
            kind,
            display_order,
            quiz_settings,
        )
    }

    /// Rehydrate a lesson from stored columns.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::SettingsOnNonQuiz` for inconsistent rows.
    pub fn from_parts(
        id: LessonId,
        chapter_id: ChapterId,
        course_id: CourseId,
        title: impl Into<String>,
        kind: LessonKind,
        display_order: u32,
        quiz_settings: Option<QuizSettings>,
    ) -> Result<Self, CatalogError> {
        if quiz_settings.is_some() && !kind.is_quiz() {
            return Err(CatalogError::SettingsOnNonQuiz);
        }
        let quiz_settings = if kind.is_quiz() {
            Some(quiz_settings.unwrap_or_default())
        } else {
            None
        };
        Ok(Self {
            id,
            chapter_id,
            course_id,
            title: title.into(),
            kind,
            display_order,
            quiz_settings,
        })
    }

    /// Settings for quiz lessons; `None` for every other kind.
    #[must_use]
    pub fn quiz_settings(&self) -> Option<QuizSettings> {
        self.quiz_settings
    }
}

/// A chapter together with the lessons it contains, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterOutline {
    pub chapter: Chapter,
    pub lessons: Vec<(LessonId, LessonKind)>,
}

/// Course structure used to seed progress rows and derive completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseOutline {
    pub course: Course,
    pub chapters: Vec<ChapterOutline>,
}

impl CourseOutline {
    /// Chapters that can ever complete (at least one lesson).
    #[must_use]
    pub fn required_chapter_count(&self) -> u32 {
        let n = self
            .chapters
            .iter()
            .filter(|c| !c.lessons.is_empty())
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn lesson_ids(&self) -> Vec<LessonId> {
        self.chapters
            .iter()
            .flat_map(|c| c.lessons.iter().map(|(id, _)| *id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> Chapter {
        Chapter {
            id: ChapterId::new(1),
            course_id: CourseId::new(1),
            title: "Basics".into(),
            display_order: 1,
            is_freemium: false,
        }
    }

    #[test]
    fn threshold_above_hundred_is_rejected() {
        let err = QuizSettings::new(Some(101), None, None).unwrap_err();
        assert_eq!(err, CatalogError::InvalidThreshold(101));
    }

    #[test]
    fn quiz_lessons_always_carry_settings() {
        let lesson =
            Lesson::new(LessonId::new(1), &chapter(), "Quiz", LessonKind::Quiz, 1, None).unwrap();
        assert_eq!(lesson.quiz_settings(), Some(QuizSettings::default()));
        assert_eq!(lesson.quiz_settings().unwrap().threshold(), 0);
    }

    #[test]
    fn settings_on_text_lesson_are_rejected() {
        let settings = QuizSettings::new(Some(50), None, None).unwrap();
        let err = Lesson::new(
            LessonId::new(2),
            &chapter(),
            "Reading",
            LessonKind::Text,
            2,
            Some(settings),
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::SettingsOnNonQuiz);
    }

    #[test]
    fn deserializing_runs_the_same_checks() {
        let err = serde_json::from_str::<QuizSettings>(
            r#"{"threshold_score":150,"attempts_limit":null,"cooldown_hours":null}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("150"));

        let text_with_settings = r#"{"id":2,"chapter_id":1,"course_id":1,"title":"Reading",
            "kind":"text","display_order":2,
            "quiz_settings":{"threshold_score":50,"attempts_limit":null,"cooldown_hours":null}}"#;
        assert!(serde_json::from_str::<Lesson>(text_with_settings).is_err());

        let quiz = Lesson::new(LessonId::new(3), &chapter(), "Quiz", LessonKind::Quiz, 3, None)
            .unwrap();
        let json = serde_json::to_string(&quiz).unwrap();
        assert_eq!(serde_json::from_str::<Lesson>(&json).unwrap(), quiz);
    }

    #[test]
    fn lesson_kind_round_trips_through_str() {
        for kind in [
            LessonKind::Text,
            LessonKind::Presentation,
            LessonKind::Video,
            LessonKind::Embed,
            LessonKind::Quiz,
        ] {
            assert_eq!(LessonKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(LessonKind::parse("ai_mentor").is_err());
    }

    #[test]
    fn empty_chapters_are_not_required() {
        let outline = CourseOutline {
            course: Course {
                id: CourseId::new(1),
                title: "C".into(),
            },
            chapters: vec![
                ChapterOutline {
                    chapter: chapter(),
                    lessons: vec![(LessonId::new(1), LessonKind::Text)],
                },
                ChapterOutline {
                    chapter: Chapter {
                        id: ChapterId::new(2),
                        ..chapter()
                    },
                    lessons: vec![],
                },
            ],
        };
        assert_eq!(outline.required_chapter_count(), 1);
        assert_eq!(outline.lesson_ids(), vec![LessonId::new(1)]);
    }
}
