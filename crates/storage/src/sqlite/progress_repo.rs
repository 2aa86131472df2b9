use progress_core::model::{
    ChapterProgress, CourseEnrollment, CourseId, LessonId, LessonProgress, QuizAttempt,
    StudentAnswer, StudentId,
};
use sqlx::Row;

use super::{
    SqliteRepository, ledger,
    mapping::{
        db_err, id_i64, map_answer_row, map_attempt_row, map_chapter_progress_row,
        map_lesson_progress_row, map_lesson_row, ser,
    },
};
use crate::repository::{LessonAccess, ProgressRepository, StorageError};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn lesson_access(
        &self,
        lesson_id: LessonId,
        student_id: StudentId,
    ) -> Result<Option<LessonAccess>, StorageError> {
        let lesson = id_i64("lesson_id", lesson_id.value())?;
        let student = id_i64("student_id", student_id.value())?;

        let row = sqlx::query(
            r"
                SELECT
                    l.id, l.chapter_id, l.course_id, l.title, l.kind, l.display_order,
                    l.threshold_score, l.attempts_limit, l.cooldown_hours,
                    c.is_freemium,
                    EXISTS (
                        SELECT 1 FROM student_courses sc
                        WHERE sc.student_id = ?2 AND sc.course_id = l.course_id
                    ) AS is_enrolled
                FROM lessons l
                JOIN chapters c ON c.id = l.chapter_id
                WHERE l.id = ?1
            ",
        )
        .bind(lesson)
        .bind(student)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let progress = ledger::load_lesson_progress(&mut conn, student, lesson).await?;

        Ok(Some(LessonAccess {
            lesson: map_lesson_row(&row)?,
            is_enrolled: row.try_get("is_enrolled").map_err(ser)?,
            is_freemium: row.try_get("is_freemium").map_err(ser)?,
            progress,
        }))
    }

    async fn lesson_progress(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        ledger::load_lesson_progress(
            &mut conn,
            id_i64("student_id", student_id.value())?,
            id_i64("lesson_id", lesson_id.value())?,
        )
        .await
    }

    async fn chapter_progress_for_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ChapterProgress>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT p.student_id, p.chapter_id, p.course_id, p.completed_lesson_count, p.completed_at
                FROM student_chapter_progress p
                JOIN chapters c ON c.id = p.chapter_id
                WHERE p.student_id = ?1 AND p.course_id = ?2
                ORDER BY c.display_order ASC, c.id ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_chapter_progress_row).collect()
    }

    async fn lesson_progress_for_course(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    p.student_id, p.lesson_id, p.chapter_id, p.is_started, p.completed_at,
                    p.completed_question_count, p.quiz_score, p.is_quiz_passed,
                    p.attempts, p.last_attempt_at
                FROM student_lesson_progress p
                JOIN lessons l ON l.id = p.lesson_id
                JOIN chapters c ON c.id = l.chapter_id
                WHERE p.student_id = ?1 AND l.course_id = ?2
                ORDER BY c.display_order ASC, l.display_order ASC, l.id ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_lesson_progress_row).collect()
    }

    async fn enrollment(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<CourseEnrollment>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        ledger::load_enrollment(
            &mut conn,
            id_i64("student_id", student_id.value())?,
            id_i64("course_id", course_id.value())?,
        )
        .await
    }

    async fn answers_for_lesson(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Vec<StudentAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    a.question_id, a.student_id, a.lesson_id, a.answer,
                    a.is_correct, a.grading, a.answered_at
                FROM student_question_answers a
                JOIN questions q ON q.id = a.question_id
                WHERE a.student_id = ?1 AND a.lesson_id = ?2
                ORDER BY q.display_order ASC, q.id ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("lesson_id", lesson_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_answer_row).collect()
    }

    async fn attempts_for_lesson(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    id, student_id, course_id, lesson_id,
                    correct_answers, wrong_answers, score, created_at, updated_at
                FROM quiz_attempts
                WHERE student_id = ?1 AND lesson_id = ?2
                ORDER BY id ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("lesson_id", lesson_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_attempt_row(&row)?);
        }
        Ok(out)
    }
}
