use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use progress_core::{
    events::QuizCompleted,
    model::{
        FIRST_ATTEMPT, GradingState, LessonId, LessonProgress, ManualEvaluation, QuestionId,
        QuestionSubmission, StudentAnswer, StudentId,
    },
    policy::{RetakeDecision, retake_decision_for},
    scoring::{QuizOutcome, score_quiz},
    time::Clock,
};
use storage::repository::{
    CatalogRepository, LedgerPersistence, LessonAccess, ManualGradeWrite, ProgressRepository,
    QuizSubmissionWrite, RetakeWrite, StorageError,
};

use crate::error::QuizError;
use crate::events::QuizEventSink;

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Counts returned to the learner after a submission or a regrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmissionResult {
    pub correct_answer_count: u32,
    pub wrong_answer_count: u32,
    pub question_count: u32,
    pub score: u8,
    pub is_passed: bool,
}

impl From<&QuizOutcome> for QuizSubmissionResult {
    fn from(outcome: &QuizOutcome) -> Self {
        Self {
            correct_answer_count: outcome.correct_count(),
            wrong_answer_count: outcome.wrong_count(),
            question_count: outcome.question_count(),
            score: outcome.score(),
            is_passed: outcome.is_passed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: QuestionId,
    pub is_correct: bool,
    pub grading: GradingState,
}

/// Stored result of a completed quiz, as shown on the lesson page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub lesson_id: LessonId,
    pub student_id: StudentId,
    #[serde(flatten)]
    pub summary: QuizSubmissionResult,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
    pub questions: Vec<QuestionResult>,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Scores submissions, applies manual grades and gates retakes.
#[derive(Clone)]
pub struct QuizService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    progress: Arc<dyn ProgressRepository>,
    ledger: Arc<dyn LedgerPersistence>,
    events: Arc<dyn QuizEventSink>,
}

impl QuizService {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<dyn CatalogRepository>,
        progress: Arc<dyn ProgressRepository>,
        ledger: Arc<dyn LedgerPersistence>,
        events: Arc<dyn QuizEventSink>,
    ) -> Self {
        Self {
            clock,
            catalog,
            progress,
            ledger,
            events,
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Score a first submission, persist it with its progress cascade and
    /// publish `QuizCompleted`.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::AlreadyCompleted`, `NotAssigned` or `QuizIncomplete`
    /// for rule violations, `Evaluation` for malformed answers, and `Storage` if
    /// persistence fails. Nothing is written on error.
    #[instrument(skip(self, submissions), fields(lesson_id = %lesson_id, student_id = %student_id))]
    pub async fn submit_quiz_answers(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
        submissions: Vec<QuestionSubmission>,
    ) -> Result<QuizSubmissionResult, QuizError> {
        self.submit(lesson_id, student_id, submissions)
            .await
            .inspect_err(log_rejection)
    }

    async fn submit(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
        submissions: Vec<QuestionSubmission>,
    ) -> Result<QuizSubmissionResult, QuizError> {
        let now = self.clock.now();
        let access = self.quiz_access(lesson_id, student_id).await?;
        if access.is_completed() {
            return Err(QuizError::AlreadyCompleted);
        }
        if !access.is_assigned() {
            return Err(QuizError::NotAssigned);
        }

        let threshold = access.lesson.quiz_settings().unwrap_or_default().threshold();
        let questions = self.catalog.questions_for_lesson(lesson_id).await?;
        let scored = score_quiz(&questions, &submissions, threshold)?;

        let mut parts: HashMap<QuestionId, _> = submissions
            .into_iter()
            .map(|s| (s.question_id, s.answers))
            .collect();
        let answers = scored
            .evaluations
            .iter()
            .map(|evaluation| StudentAnswer {
                question_id: evaluation.question_id,
                lesson_id,
                student_id,
                answers: parts.remove(&evaluation.question_id).unwrap_or_default(),
                is_correct: evaluation.is_correct,
                grading: evaluation.grading,
                answered_at: now,
            })
            .collect();

        let outcome = scored.outcome;
        let course_id = access.lesson.course_id;
        let receipt = self
            .ledger
            .record_submission(&QuizSubmissionWrite {
                student_id,
                lesson: access.lesson,
                answers,
                outcome,
                now,
            })
            .await
            .map_err(|err| conflict_as(err, QuizError::AlreadyCompleted))?;

        self.events.publish(&QuizCompleted::new(
            student_id, course_id, lesson_id, &outcome,
        ));
        info!(
            score = outcome.score(),
            passed = outcome.is_passed(),
            attempt_id = receipt.attempt_id,
            chapter_completed = receipt.report.chapter_completed,
            course_completed = receipt.report.course_completed,
            "quiz completed"
        );
        Ok(QuizSubmissionResult::from(&outcome))
    }

    /// Overwrite correctness for the named questions and recompute the stored
    /// result from every persisted answer. Repeating a call changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NotYetCompleted` if the student has not submitted the
    /// quiz, `ForeignQuestion` listing ids that are not on the lesson, and
    /// `Storage` if persistence fails.
    #[instrument(skip(self, evaluations), fields(lesson_id = %lesson_id, student_id = %student_id))]
    pub async fn manual_grade(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
        evaluations: Vec<ManualEvaluation>,
    ) -> Result<QuizSubmissionResult, QuizError> {
        self.regrade(lesson_id, student_id, evaluations)
            .await
            .inspect_err(log_rejection)
    }

    async fn regrade(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
        evaluations: Vec<ManualEvaluation>,
    ) -> Result<QuizSubmissionResult, QuizError> {
        let now = self.clock.now();
        let access = self.quiz_access(lesson_id, student_id).await?;
        if !access.is_completed() {
            return Err(QuizError::NotYetCompleted);
        }

        let questions = self.catalog.questions_for_lesson(lesson_id).await?;
        let mut foreign: Vec<QuestionId> = evaluations
            .iter()
            .map(|e| e.question_id)
            .filter(|id| !questions.iter().any(|q| q.id == *id))
            .collect();
        if !foreign.is_empty() {
            foreign.sort();
            foreign.dedup();
            return Err(QuizError::ForeignQuestion {
                question_ids: foreign,
            });
        }

        let threshold = access.lesson.quiz_settings().unwrap_or_default().threshold();
        let outcome = self
            .ledger
            .apply_manual_grade(&ManualGradeWrite {
                student_id,
                lesson: access.lesson,
                evaluations,
                threshold,
                now,
            })
            .await
            .map_err(|err| conflict_as(err, QuizError::NotYetCompleted))?;

        info!(
            score = outcome.score(),
            passed = outcome.is_passed(),
            "quiz regraded"
        );
        Ok(QuizSubmissionResult::from(&outcome))
    }

    /// Clear the student's answers so the quiz can be taken again.
    ///
    /// A lesson without questions has nothing to clear and succeeds unchanged.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NotYetCompleted` if there is no completed attempt,
    /// `RetakeNotAllowed` when the attempt limit or cooldown denies it, and
    /// `Storage` if persistence fails.
    #[instrument(skip(self), fields(lesson_id = %lesson_id, student_id = %student_id))]
    pub async fn delete_answers_for_retake(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<(), QuizError> {
        self.retake(lesson_id, student_id)
            .await
            .inspect_err(log_rejection)
    }

    async fn retake(&self, lesson_id: LessonId, student_id: StudentId) -> Result<(), QuizError> {
        let now = self.clock.now();
        let access = self.quiz_access(lesson_id, student_id).await?;
        let Some(progress) = access.progress.filter(LessonProgress::is_completed) else {
            return Err(QuizError::NotYetCompleted);
        };

        let settings = access.lesson.quiz_settings().unwrap_or_default();
        let decision =
            retake_decision_for(&settings, progress.attempts, progress.last_attempt_at, now);
        if !decision.is_allowed() {
            return Err(QuizError::RetakeNotAllowed(decision));
        }

        if self.catalog.questions_for_lesson(lesson_id).await?.is_empty() {
            debug!("lesson has no questions, nothing to clear");
            return Ok(());
        }

        let row = self
            .ledger
            .reset_for_retake(&RetakeWrite {
                student_id,
                lesson: access.lesson,
                expected_attempts: progress.attempts,
            })
            .await
            .map_err(|err| conflict_as(err, QuizError::NotYetCompleted))?;

        info!(attempts = row.attempts, "retake granted");
        Ok(())
    }

    /// Whether a retake would be allowed right now, and if not, why.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::LessonNotFound` or `NotAQuiz` for unknown or non-quiz
    /// lessons and `Storage` on read failures.
    pub async fn retake_status(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<RetakeDecision, QuizError> {
        let now = self.clock.now();
        let access = self.quiz_access(lesson_id, student_id).await?;
        let settings = access.lesson.quiz_settings().unwrap_or_default();
        let (attempts, last) = access
            .progress
            .map_or((FIRST_ATTEMPT, None), |p| (p.attempts, p.last_attempt_at));
        Ok(retake_decision_for(&settings, attempts, last, now))
    }

    /// Stored result for a completed quiz; `None` until the student submits.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Storage` on read failures.
    pub async fn quiz_result(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<Option<QuizResult>, QuizError> {
        let Some(progress) = self.progress.lesson_progress(student_id, lesson_id).await? else {
            return Ok(None);
        };
        let Some(completed_at) = progress.completed_at else {
            return Ok(None);
        };

        let answers = self.progress.answers_for_lesson(student_id, lesson_id).await?;
        let correct = answers.iter().filter(|a| a.is_correct).count();
        let correct = u32::try_from(correct).unwrap_or(u32::MAX);
        let question_count = progress.completed_question_count;

        Ok(Some(QuizResult {
            lesson_id,
            student_id,
            summary: QuizSubmissionResult {
                correct_answer_count: correct,
                wrong_answer_count: question_count.saturating_sub(correct),
                question_count,
                score: progress.quiz_score.unwrap_or(0),
                is_passed: progress.is_quiz_passed,
            },
            attempts: progress.attempts,
            completed_at,
            questions: answers
                .iter()
                .map(|a| QuestionResult {
                    question_id: a.question_id,
                    is_correct: a.is_correct,
                    grading: a.grading,
                })
                .collect(),
        }))
    }

    async fn quiz_access(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<LessonAccess, QuizError> {
        let access = self
            .progress
            .lesson_access(lesson_id, student_id)
            .await?
            .ok_or(QuizError::LessonNotFound(lesson_id))?;
        if !access.lesson.kind.is_quiz() {
            return Err(QuizError::NotAQuiz(lesson_id));
        }
        Ok(access)
    }
}

fn conflict_as(err: StorageError, precondition: QuizError) -> QuizError {
    match err {
        StorageError::Conflict => precondition,
        other => QuizError::Storage(other),
    }
}

fn log_rejection(err: &QuizError) {
    if err.is_precondition() {
        warn!(error = %err, "quiz request rejected");
    }
}
