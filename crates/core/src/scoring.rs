use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::evaluator::{Evaluation, EvaluationError, evaluate};
use crate::model::{Question, QuestionId, QuestionSubmission};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScoringError {
    #[error("quiz is not completed: {answered} of {expected} questions answered")]
    Incomplete { expected: usize, answered: usize },

    #[error("question {0} answered more than once")]
    DuplicateQuestion(QuestionId),

    #[error("question {0} does not belong to this quiz")]
    UnknownQuestion(QuestionId),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

//
// ─── OUTCOME ──────────────────────────────────────────────────────────────────
//

/// Submission-level result derived from correctness counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOutcome {
    correct_count: u32,
    wrong_count: u32,
    score: u8,
    is_passed: bool,
}

impl QuizOutcome {
    /// Derive an outcome from `correct` out of `total` answers.
    ///
    /// - `score = floor(100 * correct / total)`, 0 when there are no questions.
    /// - `required = ceil(threshold * total / 100)`; a zero threshold always passes.
    ///
    /// `correct` is clamped to `total`.
    #[must_use]
    pub fn from_counts(correct: u32, total: u32, threshold: u8) -> Self {
        let correct = correct.min(total);
        let score = if total == 0 {
            0
        } else {
            let pct = u64::from(correct) * 100 / u64::from(total);
            u8::try_from(pct).unwrap_or(100)
        };
        let is_passed = threshold == 0 || required_correct(threshold, total) <= correct;
        Self {
            correct_count: correct,
            wrong_count: total - correct,
            score,
            is_passed,
        }
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn wrong_count(&self) -> u32 {
        self.wrong_count
    }

    #[must_use]
    pub fn question_count(&self) -> u32 {
        self.correct_count + self.wrong_count
    }

    #[must_use]
    pub fn score(&self) -> u8 {
        self.score
    }

    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.is_passed
    }
}

/// Minimum number of correct answers needed to reach `threshold` percent.
#[must_use]
pub fn required_correct(threshold: u8, total: u32) -> u32 {
    let needed = (u64::from(threshold) * u64::from(total)).div_ceil(100);
    u32::try_from(needed).unwrap_or(u32::MAX)
}

/// Per-question evaluations plus the aggregate outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredQuiz {
    pub evaluations: Vec<Evaluation>,
    pub outcome: QuizOutcome,
}

/// Score a full submission.
///
/// Every question must be answered exactly once; evaluations come back in
/// question order.
///
/// # Errors
///
/// Returns `ScoringError::Incomplete` when the number of answers differs from the
/// number of questions, `DuplicateQuestion`/`UnknownQuestion` for answers that do
/// not map one-to-one onto the questions, and `Evaluation` for malformed answers.
pub fn score_quiz(
    questions: &[Question],
    submissions: &[QuestionSubmission],
    threshold: u8,
) -> Result<ScoredQuiz, ScoringError> {
    if submissions.len() != questions.len() {
        return Err(ScoringError::Incomplete {
            expected: questions.len(),
            answered: submissions.len(),
        });
    }

    let mut by_question: HashMap<QuestionId, &QuestionSubmission> =
        HashMap::with_capacity(submissions.len());
    for submission in submissions {
        if !questions.iter().any(|q| q.id == submission.question_id) {
            return Err(ScoringError::UnknownQuestion(submission.question_id));
        }
        if by_question.insert(submission.question_id, submission).is_some() {
            return Err(ScoringError::DuplicateQuestion(submission.question_id));
        }
    }

    let mut evaluations = Vec::with_capacity(questions.len());
    for question in questions {
        let submission = by_question
            .get(&question.id)
            .ok_or(ScoringError::Incomplete {
                expected: questions.len(),
                answered: by_question.len(),
            })?;
        evaluations.push(evaluate(question, &submission.answers)?);
    }

    let correct = evaluations.iter().filter(|e| e.is_correct).count();
    let total = evaluations.len();
    let outcome = QuizOutcome::from_counts(
        u32::try_from(correct).unwrap_or(u32::MAX),
        u32::try_from(total).unwrap_or(u32::MAX),
        threshold,
    );

    Ok(ScoredQuiz {
        evaluations,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerKeyOption, AnswerPart, LessonId, QuestionType};

    fn single(id: u64) -> Question {
        Question::new(
            QuestionId::new(id),
            LessonId::new(1),
            QuestionType::SingleChoice,
            u32::try_from(id).unwrap(),
            format!("Q{id}"),
            vec![
                AnswerKeyOption::choice(id * 10 + 1, 1, "right", true),
                AnswerKeyOption::choice(id * 10 + 2, 2, "wrong", false),
            ],
        )
        .unwrap()
    }

    fn answer(id: u64, correct: bool) -> QuestionSubmission {
        let option = if correct { id * 10 + 1 } else { id * 10 + 2 };
        QuestionSubmission::new(QuestionId::new(id), vec![AnswerPart::choice(option)])
    }

    #[test]
    fn score_truncates() {
        let outcome = QuizOutcome::from_counts(3, 7, 0);
        assert_eq!(outcome.score(), 42);
        assert_eq!(outcome.wrong_count(), 4);
        assert_eq!(QuizOutcome::from_counts(2, 3, 0).score(), 66);
    }

    #[test]
    fn zero_threshold_always_passes() {
        for correct in 0..=5 {
            assert!(QuizOutcome::from_counts(correct, 5, 0).is_passed());
        }
    }

    #[test]
    fn threshold_rounds_required_up() {
        assert_eq!(required_correct(70, 10), 7);
        assert!(!QuizOutcome::from_counts(6, 10, 70).is_passed());
        assert!(QuizOutcome::from_counts(7, 10, 70).is_passed());

        // 50% of 3 questions needs 2 correct answers, not 1.5.
        assert_eq!(required_correct(50, 3), 2);
        assert!(!QuizOutcome::from_counts(1, 3, 50).is_passed());
    }

    #[test]
    fn empty_quiz_scores_zero() {
        let outcome = QuizOutcome::from_counts(0, 0, 80);
        assert_eq!(outcome.score(), 0);
        assert!(outcome.is_passed());
    }

    #[test]
    fn scores_in_question_order() {
        let questions = vec![single(1), single(2)];
        let answers = vec![answer(2, false), answer(1, true)];
        let scored = score_quiz(&questions, &answers, 50).unwrap();

        assert_eq!(scored.evaluations[0].question_id, QuestionId::new(1));
        assert!(scored.evaluations[0].is_correct);
        assert_eq!(scored.outcome.correct_count(), 1);
        assert_eq!(scored.outcome.wrong_count(), 1);
        assert_eq!(scored.outcome.score(), 50);
        assert!(scored.outcome.is_passed());
    }

    #[test]
    fn missing_answers_are_incomplete() {
        let questions = vec![single(1), single(2)];
        let err = score_quiz(&questions, &[answer(1, true)], 0).unwrap_err();
        assert_eq!(
            err,
            ScoringError::Incomplete {
                expected: 2,
                answered: 1
            }
        );
    }

    #[test]
    fn duplicate_and_foreign_answers_are_rejected() {
        let questions = vec![single(1), single(2)];
        let err = score_quiz(&questions, &[answer(1, true), answer(1, false)], 0).unwrap_err();
        assert_eq!(err, ScoringError::DuplicateQuestion(QuestionId::new(1)));

        let err = score_quiz(&questions, &[answer(1, true), answer(3, true)], 0).unwrap_err();
        assert_eq!(err, ScoringError::UnknownQuestion(QuestionId::new(3)));
    }
}
