use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, OptionId, QuestionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("unknown question type: {0}")]
    UnknownType(String),

    #[error("question {question_id} has duplicate option {option_id}")]
    DuplicateOption {
        question_id: QuestionId,
        option_id: OptionId,
    },

    #[error("scale answer must be between 1 and 5, got {0}")]
    ScaleOutOfRange(u8),
}

//
// ─── QUESTION TYPE ────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueOrFalse,
    BriefResponse,
    DetailedResponse,
    MatchWords,
    #[serde(rename = "scale_1_5")]
    Scale1To5,
    PhotoQuestionSingleChoice,
    PhotoQuestionMultipleChoice,
    FillInTheBlanksText,
    FillInTheBlanksDnd,
}

impl QuestionType {
    pub const ALL: [QuestionType; 11] = [
        QuestionType::SingleChoice,
        QuestionType::MultipleChoice,
        QuestionType::TrueOrFalse,
        QuestionType::BriefResponse,
        QuestionType::DetailedResponse,
        QuestionType::MatchWords,
        QuestionType::Scale1To5,
        QuestionType::PhotoQuestionSingleChoice,
        QuestionType::PhotoQuestionMultipleChoice,
        QuestionType::FillInTheBlanksText,
        QuestionType::FillInTheBlanksDnd,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueOrFalse => "true_or_false",
            QuestionType::BriefResponse => "brief_response",
            QuestionType::DetailedResponse => "detailed_response",
            QuestionType::MatchWords => "match_words",
            QuestionType::Scale1To5 => "scale_1_5",
            QuestionType::PhotoQuestionSingleChoice => "photo_question_single_choice",
            QuestionType::PhotoQuestionMultipleChoice => "photo_question_multiple_choice",
            QuestionType::FillInTheBlanksText => "fill_in_the_blanks_text",
            QuestionType::FillInTheBlanksDnd => "fill_in_the_blanks_dnd",
        }
    }

    /// # Errors
    ///
    /// Returns `QuestionError::UnknownType` for unrecognised values.
    pub fn parse(raw: &str) -> Result<Self, QuestionError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == raw)
            .ok_or_else(|| QuestionError::UnknownType(raw.to_owned()))
    }

    /// The grading rule this type follows. Photo variants grade like their
    /// plain counterparts; the image is presentation only.
    #[must_use]
    pub fn rule(self) -> GradingRule {
        match self {
            QuestionType::SingleChoice
            | QuestionType::TrueOrFalse
            | QuestionType::PhotoQuestionSingleChoice => GradingRule::SingleChoice,
            QuestionType::MultipleChoice | QuestionType::PhotoQuestionMultipleChoice => {
                GradingRule::MultipleChoice
            }
            QuestionType::FillInTheBlanksText => GradingRule::Blanks { case_insensitive: true },
            QuestionType::FillInTheBlanksDnd => GradingRule::Blanks { case_insensitive: false },
            QuestionType::MatchWords => GradingRule::MatchedWords,
            QuestionType::Scale1To5 => GradingRule::Scale,
            QuestionType::BriefResponse | QuestionType::DetailedResponse => GradingRule::FreeText,
        }
    }

    /// Free-text types are never auto-graded.
    #[must_use]
    pub fn is_auto_gradable(self) -> bool {
        !matches!(self.rule(), GradingRule::FreeText)
    }
}

/// How a question type is graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingRule {
    SingleChoice,
    MultipleChoice,
    Blanks { case_insensitive: bool },
    MatchedWords,
    Scale,
    FreeText,
}

//
// ─── ANSWER KEY ───────────────────────────────────────────────────────────────
//

/// Grader-authored option. Learner submissions never write to this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKeyOption {
    pub id: OptionId,
    pub display_order: u32,
    pub text: String,
    pub is_correct: bool,
    pub matched_word: Option<String>,
    pub scale_answer: Option<u8>,
}

impl AnswerKeyOption {
    #[must_use]
    pub fn choice(id: u64, display_order: u32, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            id: OptionId::new(id),
            display_order,
            text: text.into(),
            is_correct,
            matched_word: None,
            scale_answer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub lesson_id: LessonId,
    pub kind: QuestionType,
    pub display_order: u32,
    pub title: String,
    pub solution_explanation: Option<String>,
    options: Vec<AnswerKeyOption>,
}

impl Question {
    /// Builds a question, sorting options by display order.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` for duplicate option ids or out-of-range scale answers.
    pub fn new(
        id: QuestionId,
        lesson_id: LessonId,
        kind: QuestionType,
        display_order: u32,
        title: impl Into<String>,
        mut options: Vec<AnswerKeyOption>,
    ) -> Result<Self, QuestionError> {
        options.sort_by_key(|o| (o.display_order, o.id));
        for (i, option) in options.iter().enumerate() {
            if options[..i].iter().any(|o| o.id == option.id) {
                return Err(QuestionError::DuplicateOption {
                    question_id: id,
                    option_id: option.id,
                });
            }
            if let Some(scale) = option.scale_answer.filter(|s| !(1..=5).contains(s)) {
                return Err(QuestionError::ScaleOutOfRange(scale));
            }
        }
        Ok(Self {
            id,
            lesson_id,
            kind,
            display_order,
            title: title.into(),
            solution_explanation: None,
            options,
        })
    }

    #[must_use]
    pub fn with_solution(mut self, explanation: impl Into<String>) -> Self {
        self.solution_explanation = Some(explanation.into());
        self
    }

    #[must_use]
    pub fn options(&self) -> &[AnswerKeyOption] {
        &self.options
    }

    #[must_use]
    pub fn option(&self, id: OptionId) -> Option<&AnswerKeyOption> {
        self.options.iter().find(|o| o.id == id)
    }

    /// Correct values for fill-in-the-blanks questions, one per blank.
    pub fn blanks(&self) -> impl Iterator<Item = &AnswerKeyOption> {
        self.options.iter().filter(|o| o.is_correct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_type_round_trips_through_str() {
        for kind in QuestionType::ALL {
            assert_eq!(QuestionType::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(QuestionType::parse("essay").is_err());
    }

    #[test]
    fn scale_serializes_with_original_name() {
        let json = serde_json::to_string(&QuestionType::Scale1To5).unwrap();
        assert_eq!(json, "\"scale_1_5\"");
    }

    #[test]
    fn photo_variants_share_rules() {
        assert_eq!(
            QuestionType::PhotoQuestionSingleChoice.rule(),
            QuestionType::SingleChoice.rule()
        );
        assert_eq!(
            QuestionType::PhotoQuestionMultipleChoice.rule(),
            QuestionType::MultipleChoice.rule()
        );
        assert!(!QuestionType::BriefResponse.is_auto_gradable());
        assert!(QuestionType::TrueOrFalse.is_auto_gradable());
    }

    #[test]
    fn options_are_ordered_and_unique() {
        let q = Question::new(
            QuestionId::new(1),
            LessonId::new(1),
            QuestionType::SingleChoice,
            1,
            "Pick",
            vec![
                AnswerKeyOption::choice(2, 2, "b", false),
                AnswerKeyOption::choice(1, 1, "a", true),
            ],
        )
        .unwrap();
        assert_eq!(q.options()[0].id, OptionId::new(1));

        let err = Question::new(
            QuestionId::new(1),
            LessonId::new(1),
            QuestionType::SingleChoice,
            1,
            "Pick",
            vec![
                AnswerKeyOption::choice(1, 1, "a", true),
                AnswerKeyOption::choice(1, 2, "b", false),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, QuestionError::DuplicateOption { .. }));
    }
}
