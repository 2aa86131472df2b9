use chrono::{DateTime, Utc};
use progress_core::ledger::{ChapterTally, CourseTally, LedgerReport, settle_chapter, settle_course};
use progress_core::model::{
    ChapterProgress, CourseEnrollment, Lesson, LessonProgress, QuizAttempt, StudentId,
};
use progress_core::scoring::QuizOutcome;
use sqlx::SqliteConnection;

use super::{
    SqliteRepository,
    mapping::{
        db_err, encode_answer, id_i64, map_chapter_progress_row, map_enrollment_row,
        map_lesson_progress_row, u32_from_i64,
    },
};
use crate::repository::{
    LedgerPersistence, ManualGradeWrite, QuizSubmissionWrite, RetakeWrite, StorageError,
    SubmissionReceipt,
};

//
// ─── ROW HELPERS ──────────────────────────────────────────────────────────────
//
// Shared by the ledger and enrollment writes; every helper runs on the caller's
// connection so it joins the caller's transaction.

pub(super) async fn load_lesson_progress(
    conn: &mut SqliteConnection,
    student: i64,
    lesson: i64,
) -> Result<Option<LessonProgress>, StorageError> {
    let row = sqlx::query(
        r"
            SELECT
                student_id, lesson_id, chapter_id, is_started, completed_at,
                completed_question_count, quiz_score, is_quiz_passed,
                attempts, last_attempt_at
            FROM student_lesson_progress
            WHERE student_id = ?1 AND lesson_id = ?2
        ",
    )
    .bind(student)
    .bind(lesson)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    row.as_ref().map(map_lesson_progress_row).transpose()
}

pub(super) async fn upsert_lesson_progress(
    conn: &mut SqliteConnection,
    progress: &LessonProgress,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            INSERT INTO student_lesson_progress (
                student_id, lesson_id, chapter_id, is_started, completed_at,
                completed_question_count, quiz_score, is_quiz_passed,
                attempts, last_attempt_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(student_id, lesson_id) DO UPDATE SET
                is_started = excluded.is_started,
                completed_at = excluded.completed_at,
                completed_question_count = excluded.completed_question_count,
                quiz_score = excluded.quiz_score,
                is_quiz_passed = excluded.is_quiz_passed,
                attempts = excluded.attempts,
                last_attempt_at = excluded.last_attempt_at
        ",
    )
    .bind(id_i64("student_id", progress.student_id.value())?)
    .bind(id_i64("lesson_id", progress.lesson_id.value())?)
    .bind(id_i64("chapter_id", progress.chapter_id.value())?)
    .bind(progress.is_started)
    .bind(progress.completed_at)
    .bind(i64::from(progress.completed_question_count))
    .bind(progress.quiz_score.map(i64::from))
    .bind(progress.is_quiz_passed)
    .bind(i64::from(progress.attempts))
    .bind(progress.last_attempt_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Insert a zeroed lesson row unless one already exists (freemium rows are kept).
pub(super) async fn ensure_lesson_progress(
    conn: &mut SqliteConnection,
    progress: &LessonProgress,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            INSERT INTO student_lesson_progress (
                student_id, lesson_id, chapter_id, is_started,
                completed_question_count, quiz_score, is_quiz_passed, attempts
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(student_id, lesson_id) DO NOTHING
        ",
    )
    .bind(id_i64("student_id", progress.student_id.value())?)
    .bind(id_i64("lesson_id", progress.lesson_id.value())?)
    .bind(id_i64("chapter_id", progress.chapter_id.value())?)
    .bind(progress.is_started)
    .bind(i64::from(progress.completed_question_count))
    .bind(progress.quiz_score.map(i64::from))
    .bind(progress.is_quiz_passed)
    .bind(i64::from(progress.attempts))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn load_chapter_progress(
    conn: &mut SqliteConnection,
    student: i64,
    chapter: i64,
) -> Result<Option<ChapterProgress>, StorageError> {
    let row = sqlx::query(
        r"
            SELECT student_id, chapter_id, course_id, completed_lesson_count, completed_at
            FROM student_chapter_progress
            WHERE student_id = ?1 AND chapter_id = ?2
        ",
    )
    .bind(student)
    .bind(chapter)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    row.as_ref().map(map_chapter_progress_row).transpose()
}

pub(super) async fn upsert_chapter_progress(
    conn: &mut SqliteConnection,
    progress: &ChapterProgress,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            INSERT INTO student_chapter_progress (
                student_id, chapter_id, course_id, completed_lesson_count, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(student_id, chapter_id) DO UPDATE SET
                completed_lesson_count = excluded.completed_lesson_count,
                completed_at = excluded.completed_at
        ",
    )
    .bind(id_i64("student_id", progress.student_id.value())?)
    .bind(id_i64("chapter_id", progress.chapter_id.value())?)
    .bind(id_i64("course_id", progress.course_id.value())?)
    .bind(i64::from(progress.completed_lesson_count))
    .bind(progress.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(super) async fn load_enrollment(
    conn: &mut SqliteConnection,
    student: i64,
    course: i64,
) -> Result<Option<CourseEnrollment>, StorageError> {
    let row = sqlx::query(
        r"
            SELECT
                student_id, course_id, payment_id, enrolled_at,
                finished_chapter_count, progress, completed_at
            FROM student_courses
            WHERE student_id = ?1 AND course_id = ?2
        ",
    )
    .bind(student)
    .bind(course)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    row.as_ref().map(map_enrollment_row).transpose()
}

pub(super) async fn upsert_enrollment(
    conn: &mut SqliteConnection,
    enrollment: &CourseEnrollment,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            INSERT INTO student_courses (
                student_id, course_id, payment_id, enrolled_at,
                finished_chapter_count, progress, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(student_id, course_id) DO UPDATE SET
                finished_chapter_count = excluded.finished_chapter_count,
                progress = excluded.progress,
                completed_at = excluded.completed_at
        ",
    )
    .bind(id_i64("student_id", enrollment.student_id.value())?)
    .bind(id_i64("course_id", enrollment.course_id.value())?)
    .bind(enrollment.payment.as_ref().map(|p| p.as_str().to_owned()))
    .bind(enrollment.enrolled_at)
    .bind(i64::from(enrollment.finished_chapter_count))
    .bind(enrollment.status.as_str())
    .bind(enrollment.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn count(
    conn: &mut SqliteConnection,
    sql: &str,
    binds: &[i64],
) -> Result<u32, StorageError> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for value in binds {
        query = query.bind(*value);
    }
    let n = query.fetch_one(&mut *conn).await.map_err(db_err)?;
    u32_from_i64("count", n)
}

/// Recount chapter and course aggregates from the lesson rows.
///
/// Students without an enrollment (freemium learners) have no aggregates to
/// settle; the call is a no-op for them.
pub(super) async fn settle(
    conn: &mut SqliteConnection,
    student_id: StudentId,
    lesson_chapter: i64,
    lesson_course: i64,
    now: DateTime<Utc>,
) -> Result<(bool, bool), StorageError> {
    let student = id_i64("student_id", student_id.value())?;

    let Some(mut enrollment) = load_enrollment(conn, student, lesson_course).await? else {
        return Ok((false, false));
    };

    let mut chapter = match load_chapter_progress(conn, student, lesson_chapter).await? {
        Some(row) => row,
        None => ChapterProgress::new(
            student_id,
            super::mapping::chapter_id_from_i64(lesson_chapter)?,
            enrollment.course_id,
        ),
    };

    let tally = ChapterTally {
        lesson_count: count(
            conn,
            "SELECT COUNT(*) FROM lessons WHERE chapter_id = ?1",
            &[lesson_chapter],
        )
        .await?,
        completed_lessons: count(
            conn,
            r"
                SELECT COUNT(*)
                FROM student_lesson_progress p
                JOIN lessons l ON l.id = p.lesson_id
                WHERE p.student_id = ?1 AND l.chapter_id = ?2 AND p.completed_at IS NOT NULL
            ",
            &[student, lesson_chapter],
        )
        .await?,
    };
    let chapter_completed = settle_chapter(&mut chapter, tally, now);
    upsert_chapter_progress(conn, &chapter).await?;

    let tally = CourseTally {
        required_chapters: count(
            conn,
            r"
                SELECT COUNT(*)
                FROM chapters c
                WHERE c.course_id = ?1
                  AND EXISTS (SELECT 1 FROM lessons l WHERE l.chapter_id = c.id)
            ",
            &[lesson_course],
        )
        .await?,
        completed_chapters: count(
            conn,
            r"
                SELECT COUNT(*)
                FROM student_chapter_progress
                WHERE student_id = ?1 AND course_id = ?2 AND completed_at IS NOT NULL
            ",
            &[student, lesson_course],
        )
        .await?,
        has_activity: count(
            conn,
            r"
                SELECT COUNT(*)
                FROM student_lesson_progress p
                JOIN lessons l ON l.id = p.lesson_id
                WHERE p.student_id = ?1
                  AND l.course_id = ?2
                  AND (p.is_started = 1 OR p.completed_at IS NOT NULL)
            ",
            &[student, lesson_course],
        )
        .await?
            > 0,
    };
    let course_completed = settle_course(&mut enrollment, tally, now);
    upsert_enrollment(conn, &enrollment).await?;

    tracing::debug!(
        student = student,
        chapter = lesson_chapter,
        completed_lessons = chapter.completed_lesson_count,
        finished_chapters = enrollment.finished_chapter_count,
        status = enrollment.status.as_str(),
        "recounted progress aggregates"
    );
    Ok((chapter_completed, course_completed))
}

async fn insert_attempt(
    conn: &mut SqliteConnection,
    attempt: &QuizAttempt,
) -> Result<i64, StorageError> {
    let res = sqlx::query(
        r"
            INSERT INTO quiz_attempts (
                student_id, course_id, lesson_id,
                correct_answers, wrong_answers, score, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
    )
    .bind(id_i64("student_id", attempt.student_id.value())?)
    .bind(id_i64("course_id", attempt.course_id.value())?)
    .bind(id_i64("lesson_id", attempt.lesson_id.value())?)
    .bind(i64::from(attempt.correct_answers))
    .bind(i64::from(attempt.wrong_answers))
    .bind(i64::from(attempt.score))
    .bind(attempt.created_at)
    .bind(attempt.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(res.last_insert_rowid())
}

struct LessonKeys {
    student: i64,
    lesson: i64,
    chapter: i64,
    course: i64,
}

impl LessonKeys {
    fn new(student_id: StudentId, lesson: &Lesson) -> Result<Self, StorageError> {
        Ok(Self {
            student: id_i64("student_id", student_id.value())?,
            lesson: id_i64("lesson_id", lesson.id.value())?,
            chapter: id_i64("chapter_id", lesson.chapter_id.value())?,
            course: id_i64("course_id", lesson.course_id.value())?,
        })
    }
}

impl SqliteRepository {
    async fn apply_lesson_write(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
        change: impl FnOnce(&mut LessonProgress) -> bool + Send,
    ) -> Result<LedgerReport, StorageError> {
        let keys = LessonKeys::new(student_id, lesson)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut row = load_lesson_progress(&mut tx, keys.student, keys.lesson)
            .await?
            .unwrap_or_else(|| LessonProgress::new(student_id, lesson.id, lesson.chapter_id, lesson.kind));
        let lesson_changed = change(&mut row);
        upsert_lesson_progress(&mut tx, &row).await?;

        let (chapter_completed, course_completed) =
            settle(&mut tx, student_id, keys.chapter, keys.course, now).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(LedgerReport {
            lesson_changed,
            chapter_completed,
            course_completed,
        })
    }
}

//
// ─── LEDGER WRITES ────────────────────────────────────────────────────────────
//

#[async_trait::async_trait]
impl LedgerPersistence for SqliteRepository {
    async fn record_submission(
        &self,
        write: &QuizSubmissionWrite,
    ) -> Result<SubmissionReceipt, StorageError> {
        let lesson = &write.lesson;
        let keys = LessonKeys::new(write.student_id, lesson)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let fresh =
            LessonProgress::new(write.student_id, lesson.id, lesson.chapter_id, lesson.kind);
        let mut row = load_lesson_progress(&mut tx, keys.student, keys.lesson)
            .await?
            .unwrap_or_else(|| fresh.clone());
        if row.is_completed() {
            return Err(StorageError::Conflict);
        }
        row.record_submission(&write.outcome, write.now);
        ensure_lesson_progress(&mut tx, &fresh).await?;

        // Completion guard: a concurrent submission that committed first leaves
        // completed_at set and this update matches nothing.
        let guarded = sqlx::query(
            r"
                UPDATE student_lesson_progress
                SET is_started = ?3,
                    completed_at = ?4,
                    last_attempt_at = ?5,
                    completed_question_count = ?6,
                    quiz_score = ?7,
                    is_quiz_passed = ?8
                WHERE student_id = ?1 AND lesson_id = ?2 AND completed_at IS NULL
            ",
        )
        .bind(keys.student)
        .bind(keys.lesson)
        .bind(row.is_started)
        .bind(row.completed_at)
        .bind(row.last_attempt_at)
        .bind(i64::from(row.completed_question_count))
        .bind(row.quiz_score.map(i64::from))
        .bind(row.is_quiz_passed)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if guarded.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        for answer in &write.answers {
            sqlx::query(
                r"
                    INSERT INTO student_question_answers (
                        question_id, student_id, lesson_id, answer,
                        is_correct, grading, answered_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
            )
            .bind(id_i64("question_id", answer.question_id.value())?)
            .bind(id_i64("student_id", answer.student_id.value())?)
            .bind(id_i64("lesson_id", answer.lesson_id.value())?)
            .bind(encode_answer(&answer.answers)?)
            .bind(answer.is_correct)
            .bind(answer.grading.as_str())
            .bind(answer.answered_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let attempt_id = insert_attempt(
            &mut tx,
            &QuizAttempt::from_outcome(
                write.student_id,
                lesson.course_id,
                lesson.id,
                &write.outcome,
                write.now,
            ),
        )
        .await?;

        let (chapter_completed, course_completed) =
            settle(&mut tx, write.student_id, keys.chapter, keys.course, write.now).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(SubmissionReceipt {
            attempt_id,
            report: LedgerReport {
                lesson_changed: true,
                chapter_completed,
                course_completed,
            },
        })
    }

    async fn apply_manual_grade(
        &self,
        write: &ManualGradeWrite,
    ) -> Result<QuizOutcome, StorageError> {
        let lesson = &write.lesson;
        let keys = LessonKeys::new(write.student_id, lesson)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut row = load_lesson_progress(&mut tx, keys.student, keys.lesson)
            .await?
            .filter(LessonProgress::is_completed)
            .ok_or(StorageError::Conflict)?;

        for evaluation in &write.evaluations {
            sqlx::query(
                r"
                    UPDATE student_question_answers
                    SET is_correct = ?4, grading = 'manual'
                    WHERE question_id = ?1 AND student_id = ?2 AND lesson_id = ?3
                ",
            )
            .bind(id_i64("question_id", evaluation.question_id.value())?)
            .bind(keys.student)
            .bind(keys.lesson)
            .bind(evaluation.is_correct)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let (correct, total): (i64, i64) = sqlx::query_as(
            r"
                SELECT COALESCE(SUM(is_correct), 0), COUNT(*)
                FROM student_question_answers
                WHERE student_id = ?1 AND lesson_id = ?2
            ",
        )
        .bind(keys.student)
        .bind(keys.lesson)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let outcome = QuizOutcome::from_counts(
            u32_from_i64("correct", correct)?,
            u32_from_i64("total", total)?,
            write.threshold,
        );

        row.overwrite_outcome(&outcome);
        upsert_lesson_progress(&mut tx, &row).await?;

        let latest: Option<i64> = sqlx::query_scalar(
            r"
                SELECT id FROM quiz_attempts
                WHERE student_id = ?1 AND lesson_id = ?2
                ORDER BY id DESC
                LIMIT 1
            ",
        )
        .bind(keys.student)
        .bind(keys.lesson)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        match latest {
            Some(id) => {
                sqlx::query(
                    r"
                        UPDATE quiz_attempts
                        SET correct_answers = ?2, wrong_answers = ?3, score = ?4, updated_at = ?5
                        WHERE id = ?1
                    ",
                )
                .bind(id)
                .bind(i64::from(outcome.correct_count()))
                .bind(i64::from(outcome.wrong_count()))
                .bind(i64::from(outcome.score()))
                .bind(write.now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            None => {
                insert_attempt(
                    &mut tx,
                    &QuizAttempt::from_outcome(
                        write.student_id,
                        lesson.course_id,
                        lesson.id,
                        &outcome,
                        write.now,
                    ),
                )
                .await?;
            }
        }

        settle(&mut tx, write.student_id, keys.chapter, keys.course, write.now).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    async fn reset_for_retake(&self, write: &RetakeWrite) -> Result<LessonProgress, StorageError> {
        let keys = LessonKeys::new(write.student_id, &write.lesson)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut row = load_lesson_progress(&mut tx, keys.student, keys.lesson)
            .await?
            .filter(|p| p.is_completed() && p.attempts == write.expected_attempts)
            .ok_or(StorageError::Conflict)?;
        row.reset_for_retake();

        let guarded = sqlx::query(
            r"
                UPDATE student_lesson_progress
                SET completed_at = NULL,
                    completed_question_count = ?4,
                    quiz_score = ?5,
                    is_quiz_passed = ?6,
                    attempts = ?7
                WHERE student_id = ?1
                  AND lesson_id = ?2
                  AND attempts = ?3
                  AND completed_at IS NOT NULL
            ",
        )
        .bind(keys.student)
        .bind(keys.lesson)
        .bind(i64::from(write.expected_attempts))
        .bind(i64::from(row.completed_question_count))
        .bind(row.quiz_score.map(i64::from))
        .bind(row.is_quiz_passed)
        .bind(i64::from(row.attempts))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if guarded.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        sqlx::query("DELETE FROM student_question_answers WHERE student_id = ?1 AND lesson_id = ?2")
            .bind(keys.student)
            .bind(keys.lesson)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(row)
    }

    async fn mark_started(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<LedgerReport, StorageError> {
        self.apply_lesson_write(student_id, lesson, now, LessonProgress::mark_started)
            .await
    }

    async fn mark_completed(
        &self,
        student_id: StudentId,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<LedgerReport, StorageError> {
        self.apply_lesson_write(student_id, lesson, now, |row| row.mark_completed(now))
            .await
    }
}
