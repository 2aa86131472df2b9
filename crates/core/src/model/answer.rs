use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{LessonId, OptionId, QuestionId, StudentId};

/// One element of a learner's answer to a question.
///
/// Wire-compatible with `{answerId}`, `{value}` and `{answerId, value}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPart {
    /// An option paired with a learner-supplied value (match words, scale).
    Paired {
        #[serde(rename = "answerId")]
        option_id: OptionId,
        value: String,
    },
    /// A selected option.
    Choice {
        #[serde(rename = "answerId")]
        option_id: OptionId,
    },
    /// Free text or a blank's value.
    Text { value: String },
}

impl AnswerPart {
    #[must_use]
    pub fn choice(id: u64) -> Self {
        AnswerPart::Choice {
            option_id: OptionId::new(id),
        }
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        AnswerPart::Text {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn paired(id: u64, value: impl Into<String>) -> Self {
        AnswerPart::Paired {
            option_id: OptionId::new(id),
            value: value.into(),
        }
    }

    /// Short name of the shape, used in error messages.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            AnswerPart::Paired { .. } => "answer_id+value",
            AnswerPart::Choice { .. } => "answer_id",
            AnswerPart::Text { .. } => "value",
        }
    }
}

/// A learner's submitted answer for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSubmission {
    pub question_id: QuestionId,
    pub answers: Vec<AnswerPart>,
}

impl QuestionSubmission {
    #[must_use]
    pub fn new(question_id: QuestionId, answers: Vec<AnswerPart>) -> Self {
        Self {
            question_id,
            answers,
        }
    }
}

/// Whether a stored correctness flag came from the evaluator or an instructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingState {
    /// Scored automatically at submission.
    Auto,
    /// Free text defaulted to incorrect until an instructor grades it.
    PendingManual,
    /// Overridden by manual grading.
    Manual,
}

impl GradingState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GradingState::Auto => "auto",
            GradingState::PendingManual => "pending_manual",
            GradingState::Manual => "manual",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "auto" => Some(GradingState::Auto),
            "pending_manual" => Some(GradingState::PendingManual),
            "manual" => Some(GradingState::Manual),
            _ => None,
        }
    }
}

/// Learner-authored answer row, unique per (question, student).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentAnswer {
    pub question_id: QuestionId,
    pub lesson_id: LessonId,
    pub student_id: StudentId,
    pub answers: Vec<AnswerPart>,
    pub is_correct: bool,
    pub grading: GradingState,
    pub answered_at: DateTime<Utc>,
}

/// Instructor override for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEvaluation {
    pub question_id: QuestionId,
    pub is_correct: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_wire_shapes() {
        let parts: Vec<AnswerPart> = serde_json::from_str(
            r#"[{"answerId": 3}, {"value": "Paris"}, {"answerId": 4, "value": "cat"}]"#,
        )
        .unwrap();
        assert_eq!(
            parts,
            vec![
                AnswerPart::choice(3),
                AnswerPart::text("Paris"),
                AnswerPart::paired(4, "cat"),
            ]
        );
    }

    #[test]
    fn submission_uses_camel_case() {
        let sub: QuestionSubmission =
            serde_json::from_str(r#"{"questionId": 9, "answers": [{"answerId": 1}]}"#).unwrap();
        assert_eq!(sub.question_id, QuestionId::new(9));
        assert_eq!(sub.answers.len(), 1);
    }

    #[test]
    fn grading_state_round_trips() {
        for s in [
            GradingState::Auto,
            GradingState::PendingManual,
            GradingState::Manual,
        ] {
            assert_eq!(GradingState::parse(s.as_str()), Some(s));
        }
    }
}
