use chrono::{DateTime, Utc};
use progress_core::model::{CourseEnrollment, CourseId, CourseOutline, LessonProgress, StudentId};
use progress_core::statistics::{CourseSummaryStats, PurchaseKind};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::{
    SqliteRepository, ledger,
    mapping::{db_err, id_i64, ser, student_id_from_i64, u32_from_i64},
};
use crate::repository::{EnrollmentRepository, EnrollmentWrite, StorageError};

async fn record_purchase(
    conn: &mut SqliteConnection,
    course_id: CourseId,
    kind: PurchaseKind,
) -> Result<(), StorageError> {
    let mut delta = CourseSummaryStats::empty(course_id);
    delta.record(kind);

    sqlx::query(
        r"
            INSERT INTO course_summary_stats (
                course_id, free_purchased_count, paid_purchased_count,
                paid_purchased_after_freemium_count
            )
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(course_id) DO UPDATE SET
                free_purchased_count =
                    free_purchased_count + excluded.free_purchased_count,
                paid_purchased_count =
                    paid_purchased_count + excluded.paid_purchased_count,
                paid_purchased_after_freemium_count =
                    paid_purchased_after_freemium_count
                    + excluded.paid_purchased_after_freemium_count
        ",
    )
    .bind(id_i64("course_id", course_id.value())?)
    .bind(i64::from(delta.free_purchased_count))
    .bind(i64::from(delta.paid_purchased_count))
    .bind(i64::from(delta.paid_purchased_after_freemium_count))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(super) async fn load_summary(
    conn: &mut SqliteConnection,
    course_id: CourseId,
) -> Result<CourseSummaryStats, StorageError> {
    let row = sqlx::query(
        r"
            SELECT free_purchased_count, paid_purchased_count, paid_purchased_after_freemium_count
            FROM course_summary_stats
            WHERE course_id = ?1
        ",
    )
    .bind(id_i64("course_id", course_id.value())?)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    let Some(row) = row else {
        return Ok(CourseSummaryStats::empty(course_id));
    };
    Ok(CourseSummaryStats {
        course_id,
        free_purchased_count: u32_from_i64(
            "free_purchased_count",
            row.try_get("free_purchased_count").map_err(ser)?,
        )?,
        paid_purchased_count: u32_from_i64(
            "paid_purchased_count",
            row.try_get("paid_purchased_count").map_err(ser)?,
        )?,
        paid_purchased_after_freemium_count: u32_from_i64(
            "paid_purchased_after_freemium_count",
            row.try_get("paid_purchased_after_freemium_count")
                .map_err(ser)?,
        )?,
    })
}

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn enroll(
        &self,
        outline: &CourseOutline,
        students: &[EnrollmentWrite],
        now: DateTime<Utc>,
    ) -> Result<Vec<PurchaseKind>, StorageError> {
        let course_id = outline.course.id;
        let course = id_i64("course_id", course_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut kinds = Vec::with_capacity(students.len());
        for student in students {
            let student_id = student.student_id;
            let sid = id_i64("student_id", student_id.value())?;

            let prior: i64 = sqlx::query_scalar(
                r"
                    SELECT COUNT(*)
                    FROM student_lesson_progress p
                    JOIN lessons l ON l.id = p.lesson_id
                    WHERE p.student_id = ?1 AND l.course_id = ?2
                ",
            )
            .bind(sid)
            .bind(course)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            let kind = PurchaseKind::classify(student.payment.as_ref(), prior > 0);

            let enrollment =
                CourseEnrollment::new(student_id, course_id, student.payment.clone(), now);
            sqlx::query(
                r"
                    INSERT INTO student_courses (
                        student_id, course_id, payment_id, enrolled_at,
                        finished_chapter_count, progress, completed_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
            )
            .bind(sid)
            .bind(course)
            .bind(enrollment.payment.as_ref().map(|p| p.as_str().to_owned()))
            .bind(enrollment.enrolled_at)
            .bind(i64::from(enrollment.finished_chapter_count))
            .bind(enrollment.status.as_str())
            .bind(enrollment.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            for chapter in &outline.chapters {
                let chapter_id = chapter.chapter.id;
                sqlx::query(
                    r"
                        INSERT INTO student_chapter_progress (
                            student_id, chapter_id, course_id, completed_lesson_count
                        )
                        VALUES (?1, ?2, ?3, 0)
                        ON CONFLICT(student_id, chapter_id) DO NOTHING
                    ",
                )
                .bind(sid)
                .bind(id_i64("chapter_id", chapter_id.value())?)
                .bind(course)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                for (lesson_id, lesson_kind) in &chapter.lessons {
                    ledger::ensure_lesson_progress(
                        &mut tx,
                        &LessonProgress::new(student_id, *lesson_id, chapter_id, *lesson_kind),
                    )
                    .await?;
                }
            }

            record_purchase(&mut tx, course_id, kind).await?;

            for chapter in &outline.chapters {
                let chapter_id = id_i64("chapter_id", chapter.chapter.id.value())?;
                ledger::settle(&mut tx, student_id, chapter_id, course, now).await?;
            }
            kinds.push(kind);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(kinds)
    }

    async fn unenroll(
        &self,
        outline: &CourseOutline,
        student_id: StudentId,
    ) -> Result<(), StorageError> {
        let course = id_i64("course_id", outline.course.id.value())?;
        let student = id_i64("student_id", student_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let removed = sqlx::query("DELETE FROM student_courses WHERE student_id = ?1 AND course_id = ?2")
            .bind(student)
            .bind(course)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if removed.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        for statement in [
            "DELETE FROM student_chapter_progress WHERE student_id = ?1 AND course_id = ?2",
            r"
                DELETE FROM student_question_answers
                WHERE student_id = ?1
                  AND lesson_id IN (SELECT id FROM lessons WHERE course_id = ?2)
            ",
            r"
                DELETE FROM student_lesson_progress
                WHERE student_id = ?1
                  AND lesson_id IN (SELECT id FROM lessons WHERE course_id = ?2)
            ",
        ] {
            sqlx::query(statement)
                .bind(student)
                .bind(course)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn enrolled_among(
        &self,
        course_id: CourseId,
        students: &[StudentId],
    ) -> Result<Vec<StudentId>, StorageError> {
        if students.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT student_id FROM student_courses WHERE course_id = ");
        qb.push_bind(id_i64("course_id", course_id.value())?);
        qb.push(" AND student_id IN (");
        let mut ids = qb.separated(", ");
        for student in students {
            ids.push_bind(id_i64("student_id", student.value())?);
        }
        ids.push_unseparated(") ORDER BY student_id ASC");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter()
            .map(|row| student_id_from_i64(row.try_get("student_id").map_err(ser)?))
            .collect()
    }

    async fn summary_stats(&self, course_id: CourseId) -> Result<CourseSummaryStats, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_summary(&mut conn, course_id).await
    }
}
