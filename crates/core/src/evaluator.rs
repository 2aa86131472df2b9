//! Scores a single question against its answer key.
//!
//! The evaluator is pure: it never touches storage and never mutates the
//! question. Free-text questions are not auto-gradable and come back as
//! incorrect with [`GradingState::PendingManual`] until an instructor grades them.

use std::collections::HashSet;

use thiserror::Error;

use crate::model::{
    AnswerKeyOption, AnswerPart, GradingRule, GradingState, OptionId, Question, QuestionId,
};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// The submitted answer does not fit the question it targets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    #[error("question {question_id} expects {expected}, got {found}")]
    ShapeMismatch {
        question_id: QuestionId,
        expected: &'static str,
        found: String,
    },

    #[error("question {question_id} expects {expected} answer parts, got {found}")]
    PartCount {
        question_id: QuestionId,
        expected: usize,
        found: usize,
    },

    #[error("option {option_id} does not belong to question {question_id}")]
    UnknownOption {
        question_id: QuestionId,
        option_id: OptionId,
    },

    #[error("option {option_id} answered more than once for question {question_id}")]
    DuplicateOption {
        question_id: QuestionId,
        option_id: OptionId,
    },
}

/// Outcome for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub question_id: QuestionId,
    pub is_correct: bool,
    pub grading: GradingState,
}

impl Evaluation {
    fn auto(question_id: QuestionId, is_correct: bool) -> Self {
        Self {
            question_id,
            is_correct,
            grading: GradingState::Auto,
        }
    }
}

//
// ─── EVALUATION ───────────────────────────────────────────────────────────────
//

/// Evaluate a learner's answer parts for `question`.
///
/// # Errors
///
/// Returns `EvaluationError` when the parts have the wrong shape or count for the
/// question type, or reference options that are not on the question.
pub fn evaluate(question: &Question, parts: &[AnswerPart]) -> Result<Evaluation, EvaluationError> {
    let id = question.id;
    match question.kind.rule() {
        GradingRule::SingleChoice => {
            let [part] = parts else {
                return Err(EvaluationError::PartCount {
                    question_id: id,
                    expected: 1,
                    found: parts.len(),
                });
            };
            let option = lookup(question, choice_id(id, part)?)?;
            Ok(Evaluation::auto(id, option.is_correct))
        }
        GradingRule::MultipleChoice => {
            let mut selected = HashSet::with_capacity(parts.len());
            for part in parts {
                let option = lookup(question, choice_id(id, part)?)?;
                if !selected.insert(option.id) {
                    return Err(EvaluationError::DuplicateOption {
                        question_id: id,
                        option_id: option.id,
                    });
                }
            }
            let expected: HashSet<OptionId> = question
                .options()
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.id)
                .collect();
            Ok(Evaluation::auto(id, selected == expected))
        }
        GradingRule::Blanks { case_insensitive } => {
            let blanks: Vec<&AnswerKeyOption> = question.blanks().collect();
            if blanks.len() != parts.len() {
                return Err(EvaluationError::PartCount {
                    question_id: id,
                    expected: blanks.len(),
                    found: parts.len(),
                });
            }
            let mut all_match = true;
            for (blank, part) in blanks.iter().zip(parts) {
                let submitted = match part {
                    AnswerPart::Text { value } => value.as_str(),
                    AnswerPart::Choice { option_id } if !case_insensitive => {
                        lookup(question, *option_id)?.text.as_str()
                    }
                    other => return Err(mismatch(id, "one value per blank", other)),
                };
                let matches = if case_insensitive {
                    submitted.trim().to_lowercase() == blank.text.trim().to_lowercase()
                } else {
                    submitted == blank.text
                };
                all_match &= matches;
            }
            Ok(Evaluation::auto(id, all_match))
        }
        GradingRule::MatchedWords => evaluate_pairs(question, parts, |option, value| {
            Ok(option
                .matched_word
                .as_deref()
                .is_some_and(|word| word.trim() == value.trim()))
        }),
        GradingRule::Scale => evaluate_pairs(question, parts, |option, value| {
            let picked: u8 = value.trim().parse().map_err(|_| EvaluationError::ShapeMismatch {
                question_id: question.id,
                expected: "a scale value from 1 to 5",
                found: format!("{value:?}"),
            })?;
            Ok(option.scale_answer == Some(picked))
        }),
        GradingRule::FreeText => match parts {
            [AnswerPart::Text { .. }] => Ok(Evaluation {
                question_id: id,
                is_correct: false,
                grading: GradingState::PendingManual,
            }),
            [other] => Err(mismatch(id, "a single text value", other)),
            _ => Err(EvaluationError::PartCount {
                question_id: id,
                expected: 1,
                found: parts.len(),
            }),
        },
    }
}

/// Shared rule for match-words and scale: every keyed option must be answered
/// exactly once and every pair must match.
fn evaluate_pairs<F>(
    question: &Question,
    parts: &[AnswerPart],
    mut is_match: F,
) -> Result<Evaluation, EvaluationError>
where
    F: FnMut(&AnswerKeyOption, &str) -> Result<bool, EvaluationError>,
{
    let id = question.id;
    let keyed = question
        .options()
        .iter()
        .filter(|o| o.matched_word.is_some() || o.scale_answer.is_some())
        .count();
    if keyed != parts.len() {
        return Err(EvaluationError::PartCount {
            question_id: id,
            expected: keyed,
            found: parts.len(),
        });
    }

    let mut seen = HashSet::with_capacity(parts.len());
    let mut all_match = true;
    for part in parts {
        let AnswerPart::Paired { option_id, value } = part else {
            return Err(mismatch(id, "answer id paired with a value", part));
        };
        let option = lookup(question, *option_id)?;
        if option.matched_word.is_none() && option.scale_answer.is_none() {
            return Err(EvaluationError::UnknownOption {
                question_id: id,
                option_id: *option_id,
            });
        }
        if !seen.insert(*option_id) {
            return Err(EvaluationError::DuplicateOption {
                question_id: id,
                option_id: *option_id,
            });
        }
        all_match &= is_match(option, value)?;
    }
    Ok(Evaluation::auto(id, all_match))
}

fn choice_id(question_id: QuestionId, part: &AnswerPart) -> Result<OptionId, EvaluationError> {
    match part {
        AnswerPart::Choice { option_id } => Ok(*option_id),
        other => Err(mismatch(question_id, "a selected answer id", other)),
    }
}

fn lookup(question: &Question, option_id: OptionId) -> Result<&AnswerKeyOption, EvaluationError> {
    question
        .option(option_id)
        .ok_or(EvaluationError::UnknownOption {
            question_id: question.id,
            option_id,
        })
}

fn mismatch(question_id: QuestionId, expected: &'static str, found: &AnswerPart) -> EvaluationError {
    EvaluationError::ShapeMismatch {
        question_id,
        expected,
        found: found.shape().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LessonId, QuestionType};

    fn question(kind: QuestionType, options: Vec<AnswerKeyOption>) -> Question {
        Question::new(QuestionId::new(1), LessonId::new(1), kind, 1, "Q", options).unwrap()
    }

    fn choices() -> Vec<AnswerKeyOption> {
        vec![
            AnswerKeyOption::choice(1, 1, "Paris", true),
            AnswerKeyOption::choice(2, 2, "Rome", false),
            AnswerKeyOption::choice(3, 3, "Lyon", true),
        ]
    }

    fn keyed(id: u64, order: u32, word: Option<&str>, scale: Option<u8>) -> AnswerKeyOption {
        AnswerKeyOption {
            matched_word: word.map(str::to_owned),
            scale_answer: scale,
            ..AnswerKeyOption::choice(id, order, format!("opt{id}"), false)
        }
    }

    #[test]
    fn single_choice_follows_selected_option() {
        let q = question(QuestionType::SingleChoice, choices());
        assert!(evaluate(&q, &[AnswerPart::choice(1)]).unwrap().is_correct);
        assert!(!evaluate(&q, &[AnswerPart::choice(2)]).unwrap().is_correct);
    }

    #[test]
    fn single_choice_rejects_multiple_values() {
        let q = question(QuestionType::TrueOrFalse, choices());
        let err = evaluate(&q, &[AnswerPart::choice(1), AnswerPart::choice(2)]).unwrap_err();
        assert!(matches!(err, EvaluationError::PartCount { expected: 1, found: 2, .. }));

        let err = evaluate(&q, &[AnswerPart::text("true")]).unwrap_err();
        assert!(matches!(err, EvaluationError::ShapeMismatch { .. }));
    }

    #[test]
    fn unknown_option_is_reported() {
        let q = question(QuestionType::PhotoQuestionSingleChoice, choices());
        let err = evaluate(&q, &[AnswerPart::choice(99)]).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::UnknownOption {
                question_id: QuestionId::new(1),
                option_id: OptionId::new(99),
            }
        );
    }

    #[test]
    fn multiple_choice_requires_exact_set() {
        let q = question(QuestionType::MultipleChoice, choices());
        let exact = [AnswerPart::choice(3), AnswerPart::choice(1)];
        assert!(evaluate(&q, &exact).unwrap().is_correct);

        let partial = [AnswerPart::choice(1)];
        assert!(!evaluate(&q, &partial).unwrap().is_correct);

        let extra = [AnswerPart::choice(1), AnswerPart::choice(2), AnswerPart::choice(3)];
        assert!(!evaluate(&q, &extra).unwrap().is_correct);

        assert!(!evaluate(&q, &[]).unwrap().is_correct);
    }

    #[test]
    fn multiple_choice_rejects_duplicates() {
        let q = question(QuestionType::PhotoQuestionMultipleChoice, choices());
        let err = evaluate(&q, &[AnswerPart::choice(1), AnswerPart::choice(1)]).unwrap_err();
        assert!(matches!(err, EvaluationError::DuplicateOption { .. }));
    }

    #[test]
    fn text_blanks_ignore_case_and_surrounding_space() {
        let q = question(
            QuestionType::FillInTheBlanksText,
            vec![
                AnswerKeyOption::choice(1, 1, "Rust", true),
                AnswerKeyOption::choice(2, 2, "Cargo", true),
            ],
        );
        let ok = [AnswerPart::text(" rust"), AnswerPart::text("CARGO")];
        assert!(evaluate(&q, &ok).unwrap().is_correct);

        let swapped = [AnswerPart::text("cargo"), AnswerPart::text("rust")];
        assert!(!evaluate(&q, &swapped).unwrap().is_correct);

        let short = [AnswerPart::text("rust")];
        assert!(matches!(
            evaluate(&q, &short).unwrap_err(),
            EvaluationError::PartCount { expected: 2, found: 1, .. }
        ));
    }

    #[test]
    fn drag_and_drop_blanks_are_exact_and_accept_option_ids() {
        let q = question(
            QuestionType::FillInTheBlanksDnd,
            vec![
                AnswerKeyOption::choice(1, 1, "borrow", true),
                AnswerKeyOption::choice(2, 2, "garbage", false),
                AnswerKeyOption::choice(3, 3, "move", true),
            ],
        );
        assert!(
            evaluate(&q, &[AnswerPart::choice(1), AnswerPart::text("move")])
                .unwrap()
                .is_correct
        );
        assert!(
            !evaluate(&q, &[AnswerPart::text("Borrow"), AnswerPart::text("move")])
                .unwrap()
                .is_correct
        );
        assert!(
            !evaluate(&q, &[AnswerPart::choice(2), AnswerPart::choice(3)])
                .unwrap()
                .is_correct
        );
    }

    #[test]
    fn match_words_needs_every_pair() {
        let q = question(
            QuestionType::MatchWords,
            vec![
                keyed(1, 1, Some("dog"), None),
                keyed(2, 2, Some("cat"), None),
            ],
        );
        let ok = [AnswerPart::paired(1, "dog"), AnswerPart::paired(2, "cat")];
        assert!(evaluate(&q, &ok).unwrap().is_correct);

        let wrong = [AnswerPart::paired(1, "cat"), AnswerPart::paired(2, "dog")];
        assert!(!evaluate(&q, &wrong).unwrap().is_correct);

        let dup = [AnswerPart::paired(1, "dog"), AnswerPart::paired(1, "dog")];
        assert!(matches!(
            evaluate(&q, &dup).unwrap_err(),
            EvaluationError::DuplicateOption { .. }
        ));
    }

    #[test]
    fn scale_compares_numeric_values() {
        let q = question(
            QuestionType::Scale1To5,
            vec![keyed(1, 1, None, Some(4)), keyed(2, 2, None, Some(1))],
        );
        let ok = [AnswerPart::paired(1, "4"), AnswerPart::paired(2, " 1 ")];
        assert!(evaluate(&q, &ok).unwrap().is_correct);

        let off = [AnswerPart::paired(1, "5"), AnswerPart::paired(2, "1")];
        assert!(!evaluate(&q, &off).unwrap().is_correct);

        let junk = [AnswerPart::paired(1, "four"), AnswerPart::paired(2, "1")];
        assert!(matches!(
            evaluate(&q, &junk).unwrap_err(),
            EvaluationError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn free_text_defaults_to_pending_incorrect() {
        let q = question(QuestionType::DetailedResponse, vec![]);
        let eval = evaluate(&q, &[AnswerPart::text("An essay")]).unwrap();
        assert!(!eval.is_correct);
        assert_eq!(eval.grading, GradingState::PendingManual);

        let err = evaluate(&q, &[AnswerPart::choice(1)]).unwrap_err();
        assert!(matches!(err, EvaluationError::ShapeMismatch { .. }));
    }
}
